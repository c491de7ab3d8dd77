//! Scale clock synchronisation.
//!
//! The scale keeps its own calendar date and stamps history records with it.
//! When the date it reports differs from the host's, the host writes its local
//! date and time back to the Current Time characteristic.

use super::DecodeError;
use chrono::{Datelike, Local, NaiveDateTime, Timelike};

const TIME_FRAME_MIN_LEN: usize = 4;

/// Protocol bytes that trail every time correction.
pub const TIME_CORRECTION_RESERVED: [u8; 3] = [3, 0, 0];

/// Source of the host wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The host's local time zone clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Date reported by the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFrame {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl TimeFrame {
    /// Decode the first four bytes of a Current Time value.
    ///
    /// # Errors
    /// Returns `DecodeError::MalformedFrame` when fewer than 4 bytes are given.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < TIME_FRAME_MIN_LEN {
            return Err(DecodeError::MalformedFrame {
                frame: "time",
                expected: TIME_FRAME_MIN_LEN,
                actual: data.len(),
            });
        }

        Ok(TimeFrame {
            year: u16::from_le_bytes([data[0], data[1]]),
            month: data[2],
            day: data[3],
        })
    }

    /// Compare against the host date, ignoring the time of day.
    ///
    /// Returns the frame to write back when the dates differ.
    pub fn correction(&self, now: NaiveDateTime) -> Option<TimeCorrection> {
        let matches = i32::from(self.year) == now.year()
            && u32::from(self.month) == now.month()
            && u32::from(self.day) == now.day();

        if matches {
            None
        } else {
            Some(TimeCorrection::from_datetime(now))
        }
    }
}

/// Date and time written back to the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeCorrection {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub reserved: [u8; 3],
}

impl TimeCorrection {
    pub fn from_datetime(now: NaiveDateTime) -> Self {
        // chrono guarantees the calendar fields fit; the year is clamped for
        // dates outside the protocol's u16 range.
        TimeCorrection {
            year: u16::try_from(now.year()).unwrap_or(u16::MAX),
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
            reserved: TIME_CORRECTION_RESERVED,
        }
    }

    pub fn to_bytes(&self) -> [u8; 10] {
        let [year_lo, year_hi] = self.year.to_le_bytes();
        [
            year_lo,
            year_hi,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.reserved[0],
            self.reserved[1],
            self.reserved[2],
        ]
    }
}
