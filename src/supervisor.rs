//! Connection lifetime of the scale.
//!
//! Connect, read the device identity, enable notifications, synchronise the
//! clock and then wait for notifications. When the link drops the whole
//! sequence starts over. How often (and how fast) that happens is up to the
//! [`RetryPolicy`]; the daemon retries immediately and forever.

use crate::mac_address::MacAddress;
use crate::pipeline::PublicationPipeline;
use crate::router::NotificationRouter;
use crate::transport::{ScaleCharacteristic, ScaleTransport, TransportError};
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::time::Duration;
use thiserror::Error;

/// How long a single wait for notifications lasts.
pub const NOTIFICATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Decides whether and when to reconnect after the link was lost.
pub trait RetryPolicy: Send {
    /// Delay before reconnect number `attempt` (starting at 1), or `None` to give up.
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;
}

/// Reconnect right away, without limit.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryForever;

impl RetryPolicy for RetryForever {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        Some(Duration::ZERO)
    }
}

/// Reconnect at most `max_attempts` times, waiting `delay` before each.
#[derive(Debug, Clone, Copy)]
pub struct LimitedRetries {
    max_attempts: u32,
    delay: Duration,
}

impl LimitedRetries {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl RetryPolicy for LimitedRetries {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        (attempt <= self.max_attempts).then_some(self.delay)
    }
}

/// Errors that end supervision.
#[derive(Error, Debug, PartialEq)]
pub enum SupervisorError {
    #[error("unrecoverable transport error: {0}")]
    Transport(TransportError),
    #[error("giving up after {0} reconnect attempts")]
    RetriesExhausted(u32),
}

/// Keeps a session with one scale alive and feeds its notifications through
/// the router.
pub struct ReconnectSupervisor<'a> {
    address: MacAddress,
    transport: &'a dyn ScaleTransport,
    router: NotificationRouter,
    pipeline: PublicationPipeline,
    policy: Box<dyn RetryPolicy>,
}

impl<'a> ReconnectSupervisor<'a> {
    pub fn new(
        address: MacAddress,
        transport: &'a dyn ScaleTransport,
        router: NotificationRouter,
        pipeline: PublicationPipeline,
        policy: Box<dyn RetryPolicy>,
    ) -> Self {
        Self {
            address,
            transport,
            router,
            pipeline,
            policy,
        }
    }

    pub fn pipeline(&self) -> &PublicationPipeline {
        &self.pipeline
    }

    /// Run until the retry policy gives up or an unrecoverable error occurs.
    pub async fn run(&mut self) -> Result<(), SupervisorError> {
        let mut attempt = 0;
        loop {
            info!("Connecting to Mi Scale {}...", self.address);
            let err = match self.run_session().await {
                Ok(never) => match never {},
                Err(err) => err,
            };

            if !err.is_recoverable() {
                error!("Cannot use Mi Scale {}: {err}", self.address);
                return Err(SupervisorError::Transport(err));
            }

            attempt += 1;
            let Some(delay) = self.policy.next_delay(attempt) else {
                warn!("Device went away ({err}), giving up after {attempt} attempts");
                return Err(SupervisorError::RetriesExhausted(attempt));
            };
            debug!("Device went away ({err}), reconnecting");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn run_session(&mut self) -> Result<Infallible, TransportError> {
        let mut session = self.transport.connect(self.address).await?;

        let identity = session.identity().await?;
        info!(
            "Connected to {} (serial {}, firmware {})",
            identity.name, identity.serial, identity.firmware
        );

        session
            .subscribe(ScaleCharacteristic::WeightMeasurement)
            .await?;

        let current_time = session.read(ScaleCharacteristic::CurrentTime).await?;
        self.router
            .sync_time(&current_time, session.as_ref())
            .await?;

        self.pipeline.begin_session(identity);

        debug!("Beginning notification loop");
        loop {
            if let Some(notification) = session
                .next_notification(NOTIFICATION_POLL_INTERVAL)
                .await?
            {
                self.router
                    .route(&notification, session.as_ref(), &mut self.pipeline)
                    .await?;
                debug!("Notification processing finished");
            }
        }
    }
}
