//! MQTT publisher backed by `rumqttc`.
//!
//! `rumqttc` splits a connection into an [`AsyncClient`] handle and an
//! [`EventLoop`] that does the network I/O. The publisher only enqueues
//! messages; the event loop has to be polled separately, see
//! [`spawn_event_loop`].

use crate::config::MqttSettings;
use crate::pipeline::{PublishError, Publisher};
use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;

/// Capacity of the request queue between client and event loop.
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Pause after a connection error before polling again.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Build the client options for `settings`.
pub fn options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(settings.keep_alive);
    if let Some(username) = &settings.username {
        options.set_credentials(username, settings.password.as_deref().unwrap_or_default());
    }
    options
}

/// [`Publisher`] that hands messages to a `rumqttc` client.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    /// Create the client; nothing is sent until the event loop is polled.
    pub fn connect(settings: &MqttSettings) -> (Self, EventLoop) {
        info!(
            "Using MQTT broker {}:{} as {}",
            settings.host, settings.port, settings.client_id
        );
        let (client, event_loop) = AsyncClient::new(options(settings), REQUEST_QUEUE_CAPACITY);
        (MqttPublisher { client }, event_loop)
    }
}

impl Publisher for MqttPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        self.client
            .try_publish(topic, qos, retain, payload)
            .map_err(|e| PublishError::Client(e.to_string()))
    }
}

/// Drive the MQTT connection in the background.
///
/// `rumqttc` reconnects on the next poll after an error, so errors are only
/// logged.
pub fn spawn_event_loop(mut event_loop: EventLoop) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("Connected to MQTT broker ({:?})", ack.code);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!("Received message on {}", publish.topic);
                }
                Ok(Event::Outgoing(Outgoing::Publish(packet_id))) => {
                    debug!("Message published (packet id {packet_id})");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error: {e}");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    })
}
