//! Mi Scale (v1) GATT protocol.
//!
//! The scale exposes the standard Weight Scale service with a vendor specific
//! history characteristic. Live readings and stored history both arrive as
//! 10-byte weight frames (history bursts pack two of them into 20 bytes), and
//! the scale clock is exposed through the Current Time characteristic.

pub mod time;
pub mod weight;

pub use time::{Clock, LocalClock, TimeCorrection, TimeFrame};
pub use weight::{StatusFlags, WEIGHT_FRAME_LEN, WeightFrame};

use thiserror::Error;
use uuid::{Uuid, uuid};

pub const WEIGHT_MEASUREMENT_SERVICE: Uuid = uuid!("0000181d-0000-1000-8000-00805f9b34fb");
pub const WEIGHT_MEASUREMENT_CHARACTERISTIC: Uuid = uuid!("00002a9d-0000-1000-8000-00805f9b34fb");
pub const WEIGHT_HISTORY_CHARACTERISTIC: Uuid = uuid!("00002a2f-0000-3512-2118-0009af100700");
pub const CURRENT_TIME_CHARACTERISTIC: Uuid = uuid!("00002a2b-0000-1000-8000-00805f9b34fb");

pub const DEVICE_INFORMATION_SERVICE: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");
pub const SERIAL_NUMBER_CHARACTERISTIC: Uuid = uuid!("00002a25-0000-1000-8000-00805f9b34fb");
pub const FIRMWARE_CHARACTERISTIC: Uuid = uuid!("00002a28-0000-1000-8000-00805f9b34fb");

pub const GENERIC_ACCESS_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");
pub const DEVICE_NAME_CHARACTERISTIC: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");
pub const APPEARANCE_CHARACTERISTIC: Uuid = uuid!("00002a01-0000-1000-8000-00805f9b34fb");

/// Advertised local name of the scale, used when scanning for it.
pub const SCALE_ADVERTISED_NAME: &str = "MI_SCALE";

/// First byte of a notification that ends a history transfer.
pub const STOP_MARKER: u8 = 3;

/// Acknowledgement written to the history characteristic after a stop marker.
pub const STOP_ACK: [u8; 1] = [STOP_MARKER];

/// First byte of the user identifier frame.
pub const USER_IDENTIFIER_MARKER: u8 = 4;

/// Build the 5-byte frame that tags subsequent history with a user slot.
pub fn user_identifier_frame(user_identifier: u16) -> [u8; 5] {
    let [high, low] = user_identifier.to_be_bytes();
    [USER_IDENTIFIER_MARKER, 0xFF, 0xFF, high, low]
}

/// Decode a UTF-8 string characteristic, dropping trailing NUL padding.
pub fn decode_text(value: &[u8]) -> String {
    String::from_utf8_lossy(value)
        .trim_end_matches('\0')
        .to_string()
}

/// Render the 16-bit little-endian appearance value as a decimal string.
///
/// Returns an empty string when the value is too short.
pub fn decode_appearance(value: &[u8]) -> String {
    match value {
        [low, high, ..] => u16::from_le_bytes([*low, *high]).to_string(),
        _ => String::new(),
    }
}

/// Errors returned when a notification cannot be decoded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("malformed {frame} frame: expected {expected} bytes, got {actual}")]
    MalformedFrame {
        frame: &'static str,
        expected: usize,
        actual: usize,
    },
}
