use crate::config::Config;
use crate::mac_address::MacAddress;
use crate::measurement::Measurement;
use crate::metrics::BodyMetricsEstimator;
use crate::pipeline::{PublicationPipeline, PublishError, Publisher};
use crate::protocol::{Clock, StatusFlags, WeightFrame};
use crate::transport::{
    BoxFuture, DeviceIdentity, RawNotification, ScaleCharacteristic, ScaleSession,
    ScaleTransport, TransportError,
};
use crate::unit::WeightUnit;
use crate::user::SingleProfileResolver;
use chrono::{NaiveDate, NaiveDateTime};
use rumqttc::QoS;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

fn frame_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 17)
        .unwrap()
        .and_hms_opt(8, 30, 45)
        .unwrap()
}

/// Host clock reading used by the fakes: 2024-05-17 09:00:00.
pub fn host_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 17)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

/// Clock frozen at a given instant.
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// A weight frame stamped 2024-05-17 08:30:45.
pub fn weight_frame(status: u8, raw_weight: u16) -> WeightFrame {
    WeightFrame {
        status: StatusFlags(status),
        raw_weight,
        year: 2024,
        month: 5,
        day: 17,
        hour: 8,
        minute: 30,
        second: 45,
    }
}

pub fn weight_notification(frame: WeightFrame) -> RawNotification {
    RawNotification {
        characteristic: ScaleCharacteristic::WeightMeasurement,
        payload: frame.to_bytes().to_vec(),
    }
}

/// A settled reading.
pub fn measurement(value: f64, unit: WeightUnit) -> Measurement {
    Measurement {
        value,
        unit,
        stable: true,
        removed: false,
        timestamp: Some(frame_time()),
    }
}

pub fn identity() -> DeviceIdentity {
    DeviceIdentity {
        serial: "0000123".to_string(),
        firmware: "1.0.2_0008".to_string(),
        name: "MI_SCALE".to_string(),
        appearance: "0".to_string(),
    }
}

/// Configuration for [`TEST_MAC`] with discovery off.
pub fn test_config() -> Config {
    Config {
        address: Some(TEST_MAC),
        ..Config::default()
    }
}

pub fn test_pipeline(config: &Config, publisher: &RecordingPublisher) -> PublicationPipeline {
    PublicationPipeline::new(
        TEST_MAC,
        config,
        Box::new(publisher.clone()),
        Box::new(SingleProfileResolver::default()),
        BodyMetricsEstimator::default(),
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Publisher that keeps every message; clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    messages: Arc<Mutex<Vec<PublishedMessage>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingPublisher {
    /// A publisher that rejects everything until `set_failing(false)`.
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.set_failing(true);
        publisher
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Client("broker unavailable".to_string()));
        }
        self.messages.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }
}

/// Writes and subscriptions made on fake sessions; clones share the record.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    writes: Arc<Mutex<Vec<(ScaleCharacteristic, Vec<u8>)>>>,
    subscriptions: Arc<Mutex<Vec<ScaleCharacteristic>>>,
}

impl SessionLog {
    pub fn writes(&self) -> Vec<(ScaleCharacteristic, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<ScaleCharacteristic> {
        self.subscriptions.lock().unwrap().clone()
    }
}

type ScriptedEvent = Result<Option<RawNotification>, TransportError>;

/// Scripted scale session.
///
/// Notifications are handed out in order; once the script runs out the
/// session reports a disconnect.
pub struct FakeSession {
    identity: DeviceIdentity,
    current_time: Vec<u8>,
    events: VecDeque<ScriptedEvent>,
    fail_writes: bool,
    log: SessionLog,
}

impl FakeSession {
    pub fn new(events: Vec<ScriptedEvent>) -> Self {
        FakeSession {
            identity: identity(),
            // same date as host_time()
            current_time: vec![0xE8, 0x07, 5, 17, 9, 0, 0, 0, 0, 0],
            events: events.into(),
            fail_writes: false,
            log: SessionLog::default(),
        }
    }

    pub fn with_log(mut self, log: SessionLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_time(mut self, current_time: Vec<u8>) -> Self {
        self.current_time = current_time;
        self
    }

    /// Every write fails as if the link dropped.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }
}

impl Default for FakeSession {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ScaleSession for FakeSession {
    fn identity(&self) -> BoxFuture<'_, Result<DeviceIdentity, TransportError>> {
        let identity = self.identity.clone();
        Box::pin(async move { Ok(identity) })
    }

    fn read(
        &self,
        characteristic: ScaleCharacteristic,
    ) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        let value = match characteristic {
            ScaleCharacteristic::CurrentTime => self.current_time.clone(),
            _ => Vec::new(),
        };
        Box::pin(async move { Ok(value) })
    }

    fn write(
        &self,
        characteristic: ScaleCharacteristic,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self.fail_writes {
                return Err(TransportError::Disconnected);
            }
            self.log
                .writes
                .lock()
                .unwrap()
                .push((characteristic, payload));
            Ok(())
        })
    }

    fn subscribe(
        &mut self,
        characteristic: ScaleCharacteristic,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        self.log.subscriptions.lock().unwrap().push(characteristic);
        Box::pin(async { Ok(()) })
    }

    fn next_notification(
        &mut self,
        _timeout: Duration,
    ) -> BoxFuture<'_, Result<Option<RawNotification>, TransportError>> {
        let event = self
            .events
            .pop_front()
            .unwrap_or(Err(TransportError::Disconnected));
        Box::pin(async move { event })
    }
}

/// Transport handing out scripted sessions in order.
pub struct FakeTransport {
    sessions: Mutex<VecDeque<Result<FakeSession, TransportError>>>,
    connects: Mutex<Vec<MacAddress>>,
    scan_result: Result<Option<MacAddress>, TransportError>,
    scans: Mutex<Vec<(String, Duration)>>,
}

impl FakeTransport {
    pub fn new(sessions: Vec<Result<FakeSession, TransportError>>) -> Self {
        FakeTransport {
            sessions: Mutex::new(sessions.into()),
            connects: Mutex::new(Vec::new()),
            scan_result: Ok(None),
            scans: Mutex::new(Vec::new()),
        }
    }

    pub fn with_scan_result(mut self, result: Result<Option<MacAddress>, TransportError>) -> Self {
        self.scan_result = result;
        self
    }

    pub fn connects(&self) -> Vec<MacAddress> {
        self.connects.lock().unwrap().clone()
    }

    pub fn scans(&self) -> Vec<(String, Duration)> {
        self.scans.lock().unwrap().clone()
    }
}

impl ScaleTransport for FakeTransport {
    fn scan<'a>(
        &'a self,
        name: &'a str,
        duration: Duration,
    ) -> BoxFuture<'a, Result<Option<MacAddress>, TransportError>> {
        self.scans.lock().unwrap().push((name.to_string(), duration));
        let result = self.scan_result.clone();
        Box::pin(async move { result })
    }

    fn connect(
        &self,
        address: MacAddress,
    ) -> BoxFuture<'_, Result<Box<dyn ScaleSession>, TransportError>> {
        self.connects.lock().unwrap().push(address);
        let next = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Bluetooth("no scale in range".to_string())));
        Box::pin(async move { next.map(|session| Box::new(session) as Box<dyn ScaleSession>) })
    }
}
