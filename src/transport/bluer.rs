//! BlueZ D-Bus backend for the scale.
//!
//! This backend uses the `bluer` crate to talk to the BlueZ daemon, so
//! `bluetoothd` has to be running. BlueZ keeps the Generic Access service to
//! itself on most setups; when it is not exposed the device name and
//! appearance come from the device properties instead.

use super::{
    BoxFuture, DeviceIdentity, RawNotification, ScaleCharacteristic, ScaleSession,
    ScaleTransport, TransportError,
};
use crate::mac_address::MacAddress;
use crate::protocol::{
    APPEARANCE_CHARACTERISTIC, DEVICE_INFORMATION_SERVICE, DEVICE_NAME_CHARACTERISTIC,
    FIRMWARE_CHARACTERISTIC, GENERIC_ACCESS_SERVICE, SERIAL_NUMBER_CHARACTERISTIC,
    WEIGHT_MEASUREMENT_SERVICE, decode_appearance, decode_text,
};
use bluer::gatt::remote::{Characteristic, Service};
use bluer::{Adapter, AdapterEvent, Device, DeviceEvent, DeviceProperty, Session};
use futures::stream::{SelectAll, Stream, StreamExt};
use log::{debug, info};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

impl From<bluer::Error> for TransportError {
    fn from(err: bluer::Error) -> Self {
        TransportError::Bluetooth(err.to_string())
    }
}

enum SessionEvent {
    Notification(RawNotification),
    LinkLost,
}

type EventStream = Pin<Box<dyn Stream<Item = SessionEvent> + Send>>;

/// Scale transport on top of the default BlueZ adapter.
pub struct BluerTransport {
    _session: Session,
    adapter: Adapter,
}

impl BluerTransport {
    /// Open a D-Bus session and power on the default adapter.
    pub async fn new() -> Result<Self, TransportError> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        debug!("Using Bluetooth adapter {}", adapter.name());

        Ok(BluerTransport {
            _session: session,
            adapter,
        })
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<MacAddress>, TransportError> {
        let mut events = Box::pin(self.adapter.discover_devices().await?);
        while let Some(event) = events.next().await {
            if let AdapterEvent::DeviceAdded(address) = event {
                let device = self.adapter.device(address)?;
                if device.name().await?.as_deref() == Some(name) {
                    return Ok(Some(address.into()));
                }
            }
        }
        Ok(None)
    }

    async fn open(&self, address: MacAddress) -> Result<BluerSession, TransportError> {
        let device = self.adapter.device(address.into())?;
        if !device.is_connected().await? {
            device.connect().await?;
        }

        let services = device.services().await?;
        let weight_service = find_service(&services, WEIGHT_MEASUREMENT_SERVICE)
            .await?
            .ok_or(TransportError::MissingService(WEIGHT_MEASUREMENT_SERVICE))?;
        let device_information = find_service(&services, DEVICE_INFORMATION_SERVICE)
            .await?
            .ok_or(TransportError::MissingService(DEVICE_INFORMATION_SERVICE))?;
        let generic_access = find_service(&services, GENERIC_ACCESS_SERVICE).await?;

        let mut characteristics = HashMap::new();
        for kind in [
            ScaleCharacteristic::WeightMeasurement,
            ScaleCharacteristic::WeightHistory,
            ScaleCharacteristic::CurrentTime,
        ] {
            let characteristic = find_characteristic(&weight_service, kind.uuid()).await?;
            characteristics.insert(kind, characteristic);
        }

        let link_events = device.events().await?.filter_map(|event| async move {
            match event {
                DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) => {
                    Some(SessionEvent::LinkLost)
                }
                _ => None,
            }
        });
        let mut events: SelectAll<EventStream> = SelectAll::new();
        events.push(Box::pin(link_events));

        Ok(BluerSession {
            device,
            characteristics,
            device_information,
            generic_access,
            events,
        })
    }
}

impl ScaleTransport for BluerTransport {
    fn scan<'a>(
        &'a self,
        name: &'a str,
        duration: Duration,
    ) -> BoxFuture<'a, Result<Option<MacAddress>, TransportError>> {
        Box::pin(async move {
            info!("Scanning {}s for {name}...", duration.as_secs());
            match tokio::time::timeout(duration, self.find_by_name(name)).await {
                Ok(result) => result,
                Err(_) => Ok(None),
            }
        })
    }

    fn connect(
        &self,
        address: MacAddress,
    ) -> BoxFuture<'_, Result<Box<dyn ScaleSession>, TransportError>> {
        Box::pin(async move {
            let session = self.open(address).await?;
            Ok(Box::new(session) as Box<dyn ScaleSession>)
        })
    }
}

async fn find_service(services: &[Service], uuid: Uuid) -> Result<Option<Service>, TransportError> {
    for service in services {
        if service.uuid().await? == uuid {
            return Ok(Some(service.clone()));
        }
    }
    Ok(None)
}

async fn find_characteristic(
    service: &Service,
    uuid: Uuid,
) -> Result<Characteristic, TransportError> {
    for characteristic in service.characteristics().await? {
        if characteristic.uuid().await? == uuid {
            return Ok(characteristic);
        }
    }
    Err(TransportError::MissingCharacteristic(uuid))
}

async fn read_value(service: &Service, uuid: Uuid) -> Result<Vec<u8>, TransportError> {
    Ok(find_characteristic(service, uuid).await?.read().await?)
}

/// A connected scale.
pub struct BluerSession {
    device: Device,
    characteristics: HashMap<ScaleCharacteristic, Characteristic>,
    device_information: Service,
    generic_access: Option<Service>,
    events: SelectAll<EventStream>,
}

impl BluerSession {
    fn characteristic(&self, kind: ScaleCharacteristic) -> Result<Characteristic, TransportError> {
        self.characteristics
            .get(&kind)
            .cloned()
            .ok_or(TransportError::MissingCharacteristic(kind.uuid()))
    }
}

impl ScaleSession for BluerSession {
    fn identity(&self) -> BoxFuture<'_, Result<DeviceIdentity, TransportError>> {
        let device = self.device.clone();
        let device_information = self.device_information.clone();
        let generic_access = self.generic_access.clone();

        Box::pin(async move {
            let serial =
                decode_text(&read_value(&device_information, SERIAL_NUMBER_CHARACTERISTIC).await?);
            let firmware =
                decode_text(&read_value(&device_information, FIRMWARE_CHARACTERISTIC).await?);

            let (name, appearance) = match generic_access {
                Some(service) => (
                    decode_text(&read_value(&service, DEVICE_NAME_CHARACTERISTIC).await?),
                    decode_appearance(&read_value(&service, APPEARANCE_CHARACTERISTIC).await?),
                ),
                None => (
                    device.name().await?.unwrap_or_default(),
                    device
                        .appearance()
                        .await?
                        .map(|appearance| appearance.to_string())
                        .unwrap_or_default(),
                ),
            };

            Ok(DeviceIdentity {
                serial,
                firmware,
                name,
                appearance,
            })
        })
    }

    fn read(
        &self,
        characteristic: ScaleCharacteristic,
    ) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        let characteristic = self.characteristic(characteristic);
        Box::pin(async move { Ok(characteristic?.read().await?) })
    }

    fn write(
        &self,
        characteristic: ScaleCharacteristic,
        payload: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        let characteristic = self.characteristic(characteristic);
        Box::pin(async move {
            characteristic?.write(&payload).await?;
            Ok(())
        })
    }

    fn subscribe(
        &mut self,
        characteristic: ScaleCharacteristic,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            let notifications = self.characteristic(characteristic)?.notify().await?;
            debug!("Subscribed to {characteristic:?} notifications");
            self.events.push(Box::pin(notifications.map(move |payload| {
                SessionEvent::Notification(RawNotification {
                    characteristic,
                    payload,
                })
            })));
            Ok(())
        })
    }

    fn next_notification(
        &mut self,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Option<RawNotification>, TransportError>> {
        Box::pin(async move {
            match tokio::time::timeout(timeout, self.events.next()).await {
                Err(_) => Ok(None),
                Ok(Some(SessionEvent::Notification(notification))) => Ok(Some(notification)),
                Ok(Some(SessionEvent::LinkLost)) | Ok(None) => Err(TransportError::Disconnected),
            }
        })
    }
}
