//! Application wiring for `miscale-bridge`.
//!
//! Parsing the command line and exit codes are the binary's business; this
//! module turns [`Options`] into a [`Config`] and connects the transport, the
//! publication pipeline and the supervisor. [`run_with`] takes every outside
//! dependency as an argument so the whole chain can be driven by fakes.

use crate::config::{Config, DiscoverySettings, MqttSettings};
use crate::mac_address::MacAddress;
use crate::metrics::BodyMetricsEstimator;
use crate::pipeline::{PublicationPipeline, Publisher};
use crate::protocol::{Clock, SCALE_ADVERTISED_NAME};
use crate::router::NotificationRouter;
use crate::supervisor::{ReconnectSupervisor, RetryPolicy, SupervisorError};
use crate::transport::{ScaleTransport, TransportError};
use crate::unit::WeightUnit;
use crate::user::{RosterError, SingleProfileResolver, load_roster};
use clap::builder::{BoolishValueParser, NonEmptyStringValueParser};
use clap::{ArgAction, Parser};
use log::info;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// How long to look for the scale when no address is configured.
pub const SCAN_DURATION: Duration = Duration::from_secs(10);

/// Command line options. Every option can also be given as an environment
/// variable.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// MAC address of the scale. Scans for a device named MI_SCALE when omitted.
    #[arg(long = "mac", env = "MISCALE_MAC")]
    pub mac: Option<MacAddress>,

    /// User slot that history records are requested for
    #[arg(long, env = "USER_IDENTIFIER", default_value_t = 1)]
    pub user_identifier: u16,

    /// Publish every reading in this unit instead of the scale's own
    #[arg(long, env = "FORCE_UNIT", value_enum)]
    pub force_unit: Option<WeightUnit>,

    /// Announce the scale through Home Assistant MQTT discovery
    #[arg(
        long = "homeassistant-discovery",
        env = "HOMEASSISTANT_DISCOVERY",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub discovery: bool,

    /// Delay the discovery message until the first stable reading
    #[arg(
        long = "homeassistant-lazy-discovery",
        env = "HOMEASSISTANT_LAZY_DISCOVERY",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub lazy_discovery: bool,

    /// Topic prefix Home Assistant listens on for discovery messages
    #[arg(
        long = "homeassistant-discovery-prefix",
        env = "HOMEASSISTANT_DISCOVERY_PREFIX",
        default_value = "homeassistant"
    )]
    pub discovery_prefix: String,

    #[arg(long, env = "MQTT_HOST", default_value = "localhost")]
    pub mqtt_host: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    pub mqtt_port: u16,

    #[arg(long, env = "MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// MQTT keep-alive interval in seconds
    #[arg(long, env = "MQTT_TIMEOUT", default_value_t = 60)]
    pub mqtt_timeout: u64,

    #[arg(
        long,
        env = "MQTT_CLIENT_ID",
        default_value = "miscale-bridge",
        value_parser = NonEmptyStringValueParser::new()
    )]
    pub mqtt_client_id: String,

    /// CSV file with user profiles (name,weight_min,weight_max,height,age,sex)
    #[arg(long, env = "USER_ROSTER")]
    pub user_roster: Option<PathBuf>,

    /// Verbose output, log every notification
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn into_config(self) -> Config {
        Config {
            address: self.mac,
            user_identifier: self.user_identifier,
            force_unit: self.force_unit,
            discovery: DiscoverySettings {
                enabled: self.discovery,
                lazy: self.lazy_discovery,
                prefix: self.discovery_prefix,
            },
            mqtt: MqttSettings {
                host: self.mqtt_host,
                port: self.mqtt_port,
                client_id: self.mqtt_client_id,
                username: self.mqtt_username,
                password: self.mqtt_password,
                keep_alive: Duration::from_secs(self.mqtt_timeout),
            },
            user_roster: self.user_roster,
        }
    }
}

/// Errors that stop the bridge.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("device scan failed: {0}")]
    DeviceScanFailure(TransportError),
    #[error("no device named {0} found")]
    DeviceNotFound(&'static str),
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// The configured scale address, or the first scale found by scanning.
pub async fn resolve_address(
    config: &Config,
    transport: &dyn ScaleTransport,
) -> Result<MacAddress, RunError> {
    if let Some(address) = config.address {
        return Ok(address);
    }

    match transport.scan(SCALE_ADVERTISED_NAME, SCAN_DURATION).await {
        Ok(Some(address)) => {
            info!("Found {SCALE_ADVERTISED_NAME} at {address}");
            Ok(address)
        }
        Ok(None) => Err(RunError::DeviceNotFound(SCALE_ADVERTISED_NAME)),
        Err(e) => Err(RunError::DeviceScanFailure(e)),
    }
}

fn user_resolver(config: &Config) -> Result<SingleProfileResolver, RunError> {
    let Some(path) = &config.user_roster else {
        return Ok(SingleProfileResolver::default());
    };
    let users = load_roster(path)?;
    info!("Loaded {} users from {}", users.len(), path.display());
    Ok(SingleProfileResolver::from_roster(users))
}

/// Run the bridge against the given transport and publisher.
///
/// Returns when the retry policy gives up or an unrecoverable error occurs.
pub async fn run_with(
    config: &Config,
    transport: &dyn ScaleTransport,
    publisher: Box<dyn Publisher>,
    clock: Box<dyn Clock>,
    policy: Box<dyn RetryPolicy>,
) -> Result<(), RunError> {
    let resolver = user_resolver(config)?;
    let address = resolve_address(config, transport).await?;

    let pipeline = PublicationPipeline::new(
        address,
        config,
        publisher,
        Box::new(resolver),
        BodyMetricsEstimator::default(),
    );
    let router = NotificationRouter::new(config.user_identifier, clock);
    let mut supervisor = ReconnectSupervisor::new(address, transport, router, pipeline, policy);

    supervisor.run().await?;
    Ok(())
}

/// Run the bridge with BlueZ and an MQTT broker, reconnecting forever.
#[cfg(feature = "bluer")]
pub async fn run(config: &Config) -> Result<(), RunError> {
    use crate::mqtt::{MqttPublisher, spawn_event_loop};
    use crate::protocol::LocalClock;
    use crate::supervisor::RetryForever;
    use crate::transport::bluer::BluerTransport;

    let transport = BluerTransport::new().await?;
    let (publisher, event_loop) = MqttPublisher::connect(&config.mqtt);
    let mqtt = spawn_event_loop(event_loop);

    let result = run_with(
        config,
        &transport,
        Box::new(publisher),
        Box::new(LocalClock),
        Box::new(RetryForever),
    )
    .await;

    mqtt.abort();
    result
}
