//! `miscale-bridge` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup and
//! process exit codes. Everything else lives here: frame decoding in
//! [`crate::protocol`], the notification flow in [`crate::router`] and
//! [`crate::pipeline`], and the connection lifetime in [`crate::supervisor`].
//! Bluetooth and MQTT sit behind the [`transport::ScaleTransport`] and
//! [`pipeline::Publisher`] traits so the flow can be tested without either.

pub mod app;
pub mod config;
pub mod discovery;
pub mod mac_address;
pub mod measurement;
pub mod metrics;
pub mod mqtt;
pub mod pipeline;
pub mod protocol;
pub mod router;
pub mod supervisor;
pub mod transport;
pub mod unit;
pub mod user;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types at the crate root
pub use config::Config;
pub use mac_address::MacAddress;
pub use measurement::Measurement;
pub use pipeline::{Outcome, PublicationPipeline, PublishError, Publisher};
pub use protocol::{DecodeError, TimeFrame, WeightFrame};
pub use router::NotificationRouter;
pub use supervisor::{ReconnectSupervisor, RetryPolicy, SupervisorError};
pub use transport::{ScaleSession, ScaleTransport, TransportError};
pub use unit::{UnitError, WeightUnit, convert};
