//! Weight frame decoding.
//!
//! Layout of a 10-byte weight frame:
//! - Byte 0: status bits (0: lbs, 4: jin, 5: stabilized, 7: weight removed)
//! - Bytes 1-2: weight, little-endian, 0.01 resolution
//! - Bytes 3-4: year, little-endian
//! - Bytes 5-9: month, day, hour, minute, second

use super::DecodeError;
use crate::measurement::Measurement;
use crate::unit::{WeightUnit, round1};
use chrono::{NaiveDate, NaiveDateTime};
use log::debug;

pub const WEIGHT_FRAME_LEN: usize = 10;

const LBS_BIT: u8 = 1 << 0;
const JIN_BIT: u8 = 1 << 4;
const STABILIZED_BIT: u8 = 1 << 5;
const WEIGHT_REMOVED_BIT: u8 = 1 << 7;

/// Status bitfield carried in the first byte of a weight frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(pub u8);

impl StatusFlags {
    pub fn is_lbs(&self) -> bool {
        self.0 & LBS_BIT != 0
    }

    pub fn is_jin(&self) -> bool {
        self.0 & JIN_BIT != 0
    }

    pub fn is_stabilized(&self) -> bool {
        self.0 & STABILIZED_BIT != 0
    }

    pub fn is_weight_removed(&self) -> bool {
        self.0 & WEIGHT_REMOVED_BIT != 0
    }
}

/// A raw weight frame, field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightFrame {
    pub status: StatusFlags,
    /// Weight in hundredths, before unit handling
    pub raw_weight: u16,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl WeightFrame {
    /// Decode a weight frame.
    ///
    /// # Errors
    /// Returns `DecodeError::MalformedFrame` unless `data` is exactly 10 bytes.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let bytes: &[u8; WEIGHT_FRAME_LEN] =
            data.try_into().map_err(|_| DecodeError::MalformedFrame {
                frame: "weight",
                expected: WEIGHT_FRAME_LEN,
                actual: data.len(),
            })?;

        Ok(WeightFrame {
            status: StatusFlags(bytes[0]),
            raw_weight: u16::from_le_bytes([bytes[1], bytes[2]]),
            year: u16::from_le_bytes([bytes[3], bytes[4]]),
            month: bytes[5],
            day: bytes[6],
            hour: bytes[7],
            minute: bytes[8],
            second: bytes[9],
        })
    }

    /// Encode the frame back into its wire layout.
    pub fn to_bytes(&self) -> [u8; WEIGHT_FRAME_LEN] {
        let [weight_lo, weight_hi] = self.raw_weight.to_le_bytes();
        let [year_lo, year_hi] = self.year.to_le_bytes();
        [
            self.status.0,
            weight_lo,
            weight_hi,
            year_lo,
            year_hi,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        ]
    }

    /// Weight as transmitted, scaled to units and rounded to one decimal.
    pub fn scaled_weight(&self) -> f64 {
        round1(f64::from(self.raw_weight) * 0.01)
    }

    /// Scale clock at the time of the reading.
    ///
    /// `None` when the frame carries an impossible date (history slots that were
    /// never written are zero-filled).
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?
        .and_hms_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
        )
    }

    /// Resolve the unit and turn the frame into a [`Measurement`].
    ///
    /// The lbs bit wins. Without the jin bit the scale is in kilogram mode, but
    /// still transmits a jin-based value, so the weight is halved.
    pub fn measurement(&self) -> Measurement {
        let mut value = self.scaled_weight();
        let unit = if self.status.is_lbs() {
            WeightUnit::Lbs
        } else if !self.status.is_jin() {
            value = round1(value / 2.0);
            WeightUnit::Kg
        } else {
            WeightUnit::Jin
        };
        debug!("Scale is configured to use \"{unit}\" as measurement");

        Measurement {
            value,
            unit,
            stable: self.status.is_stabilized(),
            removed: self.status.is_weight_removed(),
            timestamp: self.timestamp(),
        }
    }
}
