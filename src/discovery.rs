//! Home Assistant MQTT discovery.
//!
//! A retained config message lets Home Assistant register the scale as a
//! sensor on its own. The weight is taken from the state payload with a value
//! template and the body metrics become the sensor's attributes.

use crate::mac_address::MacAddress;
use crate::transport::DeviceIdentity;
use crate::unit::WeightUnit;
use serde::Serialize;

const MANUFACTURER: &str = "Xiaomi Inc.";
const MODEL: &str = "Mi Scale v1";
const ICON: &str = "mdi:scale";

/// MQTT topics used for one scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    /// `miscale_<normalized address>`
    pub object_id: String,
    /// Measurement topic
    pub state: String,
    /// Discovery config topic
    pub discovery: String,
}

impl Topics {
    pub fn new(address: &MacAddress, discovery_prefix: &str) -> Self {
        let object_id = format!("miscale_{}", address.normalized());
        Topics {
            state: format!("sensor/{object_id}/state"),
            discovery: format!("{discovery_prefix}/sensor/{object_id}/config"),
            object_id,
        }
    }
}

/// Device block of a discovery message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDescriptor {
    pub identifiers: Vec<String>,
    pub manufacturer: String,
    pub model: String,
    pub name: String,
    pub sw_version: String,
}

/// Discovery config message for the weight sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryDescriptor {
    pub name: String,
    pub state_topic: String,
    pub unit_of_measurement: WeightUnit,
    pub icon: String,
    pub unique_id: String,
    pub value_template: String,
    pub json_attributes_topic: String,
    pub json_attributes_template: String,
    pub device: DeviceDescriptor,
}

impl DiscoveryDescriptor {
    pub fn new(
        topics: &Topics,
        address: &MacAddress,
        unit: WeightUnit,
        identity: &DeviceIdentity,
    ) -> Self {
        let display_name = format!("Mi Scale {}", address.normalized());
        DiscoveryDescriptor {
            name: display_name.clone(),
            state_topic: topics.state.clone(),
            unit_of_measurement: unit,
            icon: ICON.to_string(),
            unique_id: topics.object_id.clone(),
            value_template: "{{ value_json.Weight }}".to_string(),
            json_attributes_topic: topics.state.clone(),
            json_attributes_template: "{{ value_json.metrics | tojson }}".to_string(),
            device: DeviceDescriptor {
                identifiers: vec![
                    topics.object_id.clone(),
                    format!("miscale_{}", identity.serial),
                ],
                manufacturer: MANUFACTURER.to_string(),
                model: MODEL.to_string(),
                name: display_name,
                sw_version: identity.firmware.clone(),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
