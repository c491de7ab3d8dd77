//! Decoded weight reading.

use crate::unit::{WeightUnit, convert};
use chrono::NaiveDateTime;

/// A weight reading decoded from a scale notification.
///
/// `value` always has one-decimal resolution and is expressed in `unit`, which
/// is the unit the scale reported (before any session-level correction).
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Weight in `unit`
    pub value: f64,
    /// Unit the value is expressed in
    pub unit: WeightUnit,
    /// The scale considers the reading settled
    pub stable: bool,
    /// The user stepped off while the reading was transmitted
    pub removed: bool,
    /// Scale clock at the time of the reading, if the frame carried a valid date
    pub timestamp: Option<NaiveDateTime>,
}

impl Measurement {
    /// Only settled readings with the user still on the scale are published.
    pub fn is_accepted(&self) -> bool {
        self.stable && !self.removed
    }

    /// The same reading expressed in `unit`.
    pub fn converted_to(&self, unit: WeightUnit) -> Measurement {
        Measurement {
            value: convert(self.value, self.unit, unit),
            unit,
            ..self.clone()
        }
    }

    pub fn weight_kg(&self) -> f64 {
        convert(self.value, self.unit, WeightUnit::Kg)
    }
}
