//! BLE transport abstraction for the scale.
//!
//! The supervisor and router only talk to the scale through [`ScaleTransport`]
//! and [`ScaleSession`], which keeps them testable without Bluetooth hardware.
//! The BlueZ implementation lives in [`bluer`] behind the `bluer` feature.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::mac_address::MacAddress;
use crate::protocol::{
    CURRENT_TIME_CHARACTERISTIC, WEIGHT_HISTORY_CHARACTERISTIC, WEIGHT_MEASUREMENT_CHARACTERISTIC,
};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Boxed future returned by the transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The scale characteristics the bridge reads, writes or listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleCharacteristic {
    CurrentTime,
    WeightMeasurement,
    WeightHistory,
}

impl ScaleCharacteristic {
    pub fn uuid(&self) -> Uuid {
        match self {
            ScaleCharacteristic::CurrentTime => CURRENT_TIME_CHARACTERISTIC,
            ScaleCharacteristic::WeightMeasurement => WEIGHT_MEASUREMENT_CHARACTERISTIC,
            ScaleCharacteristic::WeightHistory => WEIGHT_HISTORY_CHARACTERISTIC,
        }
    }
}

/// A notification as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub characteristic: ScaleCharacteristic,
    pub payload: Vec<u8>,
}

/// Identity strings read from the scale when connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub serial: String,
    pub firmware: String,
    pub name: String,
    pub appearance: String,
}

/// Error type for transport operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The link to the scale was lost
    #[error("device disconnected")]
    Disconnected,
    /// Adapter or D-Bus level error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    #[error("GATT service {0} not found")]
    MissingService(Uuid),
    #[error("GATT characteristic {0} not found")]
    MissingCharacteristic(Uuid),
}

impl TransportError {
    /// Whether reconnecting can fix the error.
    ///
    /// A scale that lacks one of the expected services is the wrong device
    /// and reconnecting will not change that.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::Disconnected | TransportError::Bluetooth(_)
        )
    }
}

/// Entry point to the Bluetooth stack.
pub trait ScaleTransport: Send + Sync {
    /// Scan for `duration` and return the first device advertising `name`.
    fn scan<'a>(
        &'a self,
        name: &'a str,
        duration: Duration,
    ) -> BoxFuture<'a, Result<Option<MacAddress>, TransportError>>;

    /// Connect to the scale and discover its services.
    fn connect(
        &self,
        address: MacAddress,
    ) -> BoxFuture<'_, Result<Box<dyn ScaleSession>, TransportError>>;
}

/// An established connection to the scale.
pub trait ScaleSession: Send {
    /// Read serial, firmware, name and appearance.
    fn identity(&self) -> BoxFuture<'_, Result<DeviceIdentity, TransportError>>;

    fn read(
        &self,
        characteristic: ScaleCharacteristic,
    ) -> BoxFuture<'_, Result<Vec<u8>, TransportError>>;

    fn write(
        &self,
        characteristic: ScaleCharacteristic,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Enable notifications for `characteristic`.
    fn subscribe(
        &mut self,
        characteristic: ScaleCharacteristic,
    ) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Wait up to `timeout` for the next notification.
    ///
    /// `Ok(None)` means nothing arrived in time. Link loss is reported as
    /// `TransportError::Disconnected`.
    fn next_notification(
        &mut self,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Option<RawNotification>, TransportError>>;
}
