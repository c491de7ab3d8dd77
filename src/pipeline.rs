//! Publication of accepted readings.
//!
//! The pipeline owns the per-device session state: the unit every reading is
//! published in and whether the discovery message went out. Readings that are
//! not settled are only logged. Accepted readings are converted to the locked
//! unit, enriched with body metrics and published to the state topic.

use crate::config::{Config, DiscoverySettings};
use crate::discovery::{DiscoveryDescriptor, Topics};
use crate::mac_address::MacAddress;
use crate::measurement::Measurement;
use crate::metrics::{BodyMetrics, BodyMetricsEstimator};
use crate::transport::DeviceIdentity;
use crate::unit::WeightUnit;
use crate::user::UserResolver;
use log::{debug, error, info, warn};
use rumqttc::QoS;
use serde::Serialize;
use thiserror::Error;

/// Errors returned by a [`Publisher`].
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(String),
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Message bus the pipeline publishes to.
///
/// Publishing hands the message to the client and returns; delivery is the
/// client's concern.
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError>;
}

/// Unit lock and discovery bookkeeping for one scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceUnitState {
    locked_unit: Option<WeightUnit>,
    discovery_sent: bool,
}

impl DeviceUnitState {
    /// A forced unit locks the state right away.
    pub fn new(forced_unit: Option<WeightUnit>) -> Self {
        DeviceUnitState {
            locked_unit: forced_unit,
            discovery_sent: false,
        }
    }

    pub fn locked_unit(&self) -> Option<WeightUnit> {
        self.locked_unit
    }

    pub fn discovery_sent(&self) -> bool {
        self.discovery_sent
    }

    /// Lock `unit` unless a unit is already locked; returns the locked unit.
    fn lock(&mut self, unit: WeightUnit) -> WeightUnit {
        *self.locked_unit.get_or_insert_with(|| {
            debug!("Received unit information. Scale uses \"{unit}\" for measurement");
            unit
        })
    }

    fn mark_discovery_sent(&mut self) {
        self.discovery_sent = true;
    }
}

/// JSON body published on the state topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatePayload {
    #[serde(rename = "Weight")]
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BodyMetrics>,
}

/// What happened to a reading handed to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Not settled or the user stepped off; logged only
    Observed,
    /// Published in the locked unit
    Published { weight: f64, unit: WeightUnit },
    /// Accepted but publishing failed
    Dropped,
}

/// Turns accepted readings into bus messages for one scale.
pub struct PublicationPipeline {
    address: MacAddress,
    topics: Topics,
    discovery: DiscoverySettings,
    state: DeviceUnitState,
    identity: DeviceIdentity,
    publisher: Box<dyn Publisher>,
    resolver: Box<dyn UserResolver>,
    estimator: BodyMetricsEstimator,
}

impl PublicationPipeline {
    pub fn new(
        address: MacAddress,
        config: &Config,
        publisher: Box<dyn Publisher>,
        resolver: Box<dyn UserResolver>,
        estimator: BodyMetricsEstimator,
    ) -> Self {
        if let Some(unit) = config.force_unit {
            debug!("Forcing unit conversion to: {unit}");
        }

        PublicationPipeline {
            address,
            topics: Topics::new(&address, &config.discovery.prefix),
            discovery: config.discovery.clone(),
            state: DeviceUnitState::new(config.force_unit),
            identity: DeviceIdentity::default(),
            publisher,
            resolver,
            estimator,
        }
    }

    pub fn state(&self) -> &DeviceUnitState {
        &self.state
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Called after every (re)connect, once the device identity is known.
    ///
    /// With eager discovery the discovery message goes out here, locking
    /// kilograms when no unit is known yet.
    pub fn begin_session(&mut self, identity: DeviceIdentity) {
        self.identity = identity;

        if self.discovery.enabled && !self.discovery.lazy && !self.state.discovery_sent() {
            let unit = match self.state.locked_unit() {
                Some(unit) => unit,
                None => {
                    warn!("Using kilograms as the default unit");
                    self.state.lock(WeightUnit::Kg)
                }
            };
            self.publish_discovery(unit);
        }
    }

    /// Handle one decoded reading.
    pub fn process(&mut self, measurement: Measurement) -> Outcome {
        if !measurement.is_accepted() {
            debug!("Current weight: {} {}", measurement.value, measurement.unit);
            return Outcome::Observed;
        }
        info!(
            "Received stabilized weight information: {} {}",
            measurement.value, measurement.unit
        );

        let unit = self.state.lock(measurement.unit);

        if self.discovery.enabled && self.discovery.lazy && !self.state.discovery_sent() {
            self.publish_discovery(unit);
        }

        let measurement = if measurement.unit != unit {
            warn!(
                "Received weight in unit \"{}\", although expected unit is \"{unit}\". \
                 This might either be a protocol error or a configuration mistake. Fixing.",
                measurement.unit
            );
            let converted = measurement.converted_to(unit);
            debug!("Converted weight: {} {}", converted.value, converted.unit);
            converted
        } else {
            measurement
        };

        let user = self.resolver.resolve(&measurement);
        let metrics = match self.estimator.estimate(&measurement, user) {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!("Body metrics unavailable for user {}: {e}", user.name);
                None
            }
        };

        let payload = StatePayload {
            weight: measurement.value,
            metrics,
        };
        match self.publish_state(&payload) {
            Ok(()) => {
                debug!("Body metrics published");
                Outcome::Published {
                    weight: measurement.value,
                    unit,
                }
            }
            Err(e) => {
                error!("Failed to publish weight to {}: {e}", self.topics.state);
                Outcome::Dropped
            }
        }
    }

    fn publish_state(&self, payload: &StatePayload) -> Result<(), PublishError> {
        let body = serde_json::to_vec(payload)?;
        debug!(
            "Publishing data with topic \"{}\" (MQTT message: \"{}\")",
            self.topics.state,
            String::from_utf8_lossy(&body)
        );
        self.publisher
            .publish(&self.topics.state, body, QoS::AtMostOnce, false)
    }

    fn publish_discovery(&mut self, unit: WeightUnit) {
        let descriptor = DiscoveryDescriptor::new(&self.topics, &self.address, unit, &self.identity);
        let result = descriptor.to_json().map_err(PublishError::from).and_then(|body| {
            info!("Publishing HomeAssistant MQTT Discovery message");
            debug!("HASS Discovery topic {}", self.topics.discovery);
            debug!("HASS Discovery message {}", String::from_utf8_lossy(&body));
            self.publisher
                .publish(&self.topics.discovery, body, QoS::AtMostOnce, true)
        });

        match result {
            Ok(()) => self.state.mark_discovery_sent(),
            Err(e) => error!("Failed to publish discovery message: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{FormulaInput, FormulaLibrary, FormulaOutput, MetricsError};
    use crate::test_utils::{
        RecordingPublisher, TEST_MAC, identity, measurement, test_config,
        test_pipeline as pipeline,
    };
    use crate::user::SingleProfileResolver;
    use serde_json::Value;

    fn discovery_config(lazy: bool) -> Config {
        let mut config = test_config();
        config.discovery.enabled = true;
        config.discovery.lazy = lazy;
        config
    }

    #[test]
    fn test_unsettled_readings_are_not_published() {
        let publisher = RecordingPublisher::default();
        let mut pipeline = pipeline(&test_config(), &publisher);

        let mut fluctuating = measurement(70.0, WeightUnit::Kg);
        fluctuating.stable = false;
        assert_eq!(pipeline.process(fluctuating), Outcome::Observed);

        let mut stepped_off = measurement(70.0, WeightUnit::Kg);
        stepped_off.removed = true;
        assert_eq!(pipeline.process(stepped_off), Outcome::Observed);

        assert!(publisher.messages().is_empty());
        assert_eq!(pipeline.state().locked_unit(), None);
    }

    #[test]
    fn test_first_accepted_reading_locks_unit() {
        let publisher = RecordingPublisher::default();
        let mut pipeline = pipeline(&test_config(), &publisher);

        assert_eq!(
            pipeline.process(measurement(154.3, WeightUnit::Lbs)),
            Outcome::Published {
                weight: 154.3,
                unit: WeightUnit::Lbs
            }
        );
        assert_eq!(pipeline.state().locked_unit(), Some(WeightUnit::Lbs));

        // a later kilogram reading is converted to the locked unit
        assert_eq!(
            pipeline.process(measurement(70.0, WeightUnit::Kg)),
            Outcome::Published {
                weight: 154.3,
                unit: WeightUnit::Lbs
            }
        );
        assert_eq!(pipeline.state().locked_unit(), Some(WeightUnit::Lbs));
    }

    #[test]
    fn test_drifting_unit_is_converted() {
        let publisher = RecordingPublisher::default();
        let mut config = test_config();
        config.force_unit = Some(WeightUnit::Kg);
        let mut pipeline = pipeline(&config, &publisher);
        assert_eq!(pipeline.state().locked_unit(), Some(WeightUnit::Kg));

        let outcome = pipeline.process(measurement(10.0, WeightUnit::Lbs));
        assert_eq!(
            outcome,
            Outcome::Published {
                weight: 4.5,
                unit: WeightUnit::Kg
            }
        );

        let messages = publisher.messages();
        assert_eq!(messages.len(), 1);
        let body: Value = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(body["Weight"], 4.5);
    }

    #[test]
    fn test_state_payload_with_metrics() {
        let publisher = RecordingPublisher::default();
        let mut pipeline = pipeline(&test_config(), &publisher);
        pipeline.process(measurement(70.0, WeightUnit::Kg));

        let messages = publisher.messages();
        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.topic, "sensor/miscale_aabbccddeeff/state");
        assert_eq!(message.qos, QoS::AtMostOnce);
        assert!(!message.retain);

        let body: Value = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(body["Weight"], 70.0);
        assert_eq!(body["metrics"]["BMI"], 21.6);
        assert_eq!(body["metrics"]["Basal Metabolism"], 1584.79);
        assert!(body["metrics"]["Visceral Fat"].is_number());
    }

    #[test]
    fn test_light_reading_is_published_without_metrics() {
        let publisher = RecordingPublisher::default();
        let mut pipeline = pipeline(&test_config(), &publisher);

        assert_eq!(
            pipeline.process(measurement(5.0, WeightUnit::Kg)),
            Outcome::Published {
                weight: 5.0,
                unit: WeightUnit::Kg
            }
        );
        let messages = publisher.messages();
        assert_eq!(messages[0].payload, br#"{"Weight":5.0}"#.to_vec());
    }

    #[test]
    fn test_lazy_discovery_sent_once_on_first_accepted_reading() {
        let publisher = RecordingPublisher::default();
        let mut pipeline = pipeline(&discovery_config(true), &publisher);

        pipeline.begin_session(identity());
        let mut fluctuating = measurement(70.0, WeightUnit::Kg);
        fluctuating.stable = false;
        pipeline.process(fluctuating);
        assert!(publisher.messages().is_empty());

        for _ in 0..3 {
            pipeline.process(measurement(70.0, WeightUnit::Kg));
        }

        let messages = publisher.messages();
        let discovery: Vec<_> = messages
            .iter()
            .filter(|m| m.topic == "homeassistant/sensor/miscale_aabbccddeeff/config")
            .collect();
        assert_eq!(discovery.len(), 1);
        assert!(discovery[0].retain);
        assert_eq!(messages[0].topic, discovery[0].topic);
        assert_eq!(messages.len(), 4);

        let body: Value = serde_json::from_slice(&discovery[0].payload).unwrap();
        assert_eq!(body["unit_of_measurement"], "kg");
        assert_eq!(body["device"]["sw_version"], "1.0.2_0008");
        assert!(pipeline.state().discovery_sent());
    }

    #[test]
    fn test_eager_discovery_sent_at_session_start_with_kg_placeholder() {
        let publisher = RecordingPublisher::default();
        let mut pipeline = pipeline(&discovery_config(false), &publisher);

        pipeline.begin_session(identity());
        assert_eq!(publisher.messages().len(), 1);
        assert_eq!(pipeline.state().locked_unit(), Some(WeightUnit::Kg));

        // reconnecting does not resend it
        pipeline.begin_session(identity());
        pipeline.process(measurement(154.3, WeightUnit::Lbs));

        let messages = publisher.messages();
        assert_eq!(messages.len(), 2);
        let body: Value = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(body["unit_of_measurement"], "kg");
        let state: Value = serde_json::from_slice(&messages[1].payload).unwrap();
        assert_eq!(state["Weight"], 70.0);
    }

    #[test]
    fn test_eager_discovery_uses_forced_unit() {
        let publisher = RecordingPublisher::default();
        let mut config = discovery_config(false);
        config.force_unit = Some(WeightUnit::Jin);
        let mut pipeline = pipeline(&config, &publisher);

        pipeline.begin_session(identity());
        let body: Value = serde_json::from_slice(&publisher.messages()[0].payload).unwrap();
        assert_eq!(body["unit_of_measurement"], "jin");
    }

    #[test]
    fn test_discovery_disabled() {
        let publisher = RecordingPublisher::default();
        let mut pipeline = pipeline(&test_config(), &publisher);
        pipeline.begin_session(identity());
        pipeline.process(measurement(70.0, WeightUnit::Kg));

        assert_eq!(publisher.messages().len(), 1);
        assert!(!pipeline.state().discovery_sent());
    }

    #[test]
    fn test_failed_discovery_is_retried() {
        let publisher = RecordingPublisher::failing();
        let mut pipeline = pipeline(&discovery_config(true), &publisher);

        assert_eq!(
            pipeline.process(measurement(70.0, WeightUnit::Kg)),
            Outcome::Dropped
        );
        assert!(!pipeline.state().discovery_sent());

        publisher.set_failing(false);
        pipeline.process(measurement(70.0, WeightUnit::Kg));
        assert!(pipeline.state().discovery_sent());
        assert_eq!(publisher.messages().len(), 2);
    }

    struct FixedFormulas;

    impl FormulaLibrary for FixedFormulas {
        fn evaluate(&self, input: &FormulaInput) -> Result<FormulaOutput, MetricsError> {
            Ok(FormulaOutput {
                bmi: input.weight_kg,
                bmr: 1.0,
                visceral_fat: 2.0,
            })
        }
    }

    #[test]
    fn test_metrics_use_kilograms_whatever_the_locked_unit() {
        let publisher = RecordingPublisher::default();
        let mut config = test_config();
        config.force_unit = Some(WeightUnit::Jin);
        let mut pipeline = PublicationPipeline::new(
            TEST_MAC,
            &config,
            Box::new(publisher.clone()),
            Box::new(SingleProfileResolver::default()),
            BodyMetricsEstimator::new(Box::new(FixedFormulas)),
        );

        pipeline.process(measurement(70.0, WeightUnit::Kg));
        let body: Value = serde_json::from_slice(&publisher.messages()[0].payload).unwrap();
        assert_eq!(body["Weight"], 140.0);
        assert_eq!(body["metrics"]["BMI"], 70.0);
    }
}
