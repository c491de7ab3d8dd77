//! Runtime configuration.
//!
//! Built once from the command line (see [`crate::app::Options`]) and passed
//! by reference to everything that needs it.

use crate::mac_address::MacAddress;
use crate::unit::WeightUnit;
use std::path::PathBuf;
use std::time::Duration;

/// Home Assistant discovery behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub enabled: bool,
    /// Wait for the first accepted reading instead of announcing on connect
    pub lazy: bool,
    pub prefix: String,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        DiscoverySettings {
            enabled: false,
            lazy: false,
            prefix: "homeassistant".to_string(),
        }
    }
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        MqttSettings {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "miscale-bridge".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Scale address; scanned for when absent
    pub address: Option<MacAddress>,
    /// User slot the scale tags history records with
    pub user_identifier: u16,
    pub force_unit: Option<WeightUnit>,
    pub discovery: DiscoverySettings,
    pub mqtt: MqttSettings,
    pub user_roster: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            address: None,
            user_identifier: 1,
            force_unit: None,
            discovery: DiscoverySettings::default(),
            mqtt: MqttSettings::default(),
            user_roster: None,
        }
    }
}
