//! Weight units used by the Mi Scale family and conversion between them.
//!
//! The scale can be switched between kilograms, pounds and jin (the Chinese
//! "catty", 0.5 kg). Every conversion result is rounded to one decimal place,
//! which is the resolution the scale itself displays.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const LBS_TO_KG: f64 = 0.45359237;
const KG_TO_LBS: f64 = 2.2046226218488;
const LBS_TO_JIN: f64 = 0.90718474;

/// A weight unit reported by (or forced onto) the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    Kg,
    Lbs,
    Jin,
}

impl WeightUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeightUnit::Kg => "kg",
            WeightUnit::Lbs => "lbs",
            WeightUnit::Jin => "jin",
        }
    }
}

impl fmt::Display for WeightUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned when a unit name is not one of `kg`, `lbs` or `jin`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("unsupported weight unit: '{0}'")]
    Unsupported(String),
}

impl FromStr for WeightUnit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kg" => Ok(WeightUnit::Kg),
            "lbs" | "lb" => Ok(WeightUnit::Lbs),
            "jin" => Ok(WeightUnit::Jin),
            _ => Err(UnitError::Unsupported(s.to_string())),
        }
    }
}

/// Round a weight to one decimal place.
#[inline]
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Round a derived metric to two decimal places.
#[inline]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Convert `value` from one unit to another.
///
/// Same-unit conversion returns the value untouched. Jin is treated as
/// "two kilograms" when converting towards pounds, matching the firmware.
///
/// # Example
/// ```
/// use miscale_bridge::unit::{WeightUnit, convert};
///
/// assert_eq!(convert(10.0, WeightUnit::Lbs, WeightUnit::Kg), 4.5);
/// assert_eq!(convert(70.0, WeightUnit::Kg, WeightUnit::Jin), 140.0);
/// ```
pub fn convert(value: f64, from: WeightUnit, to: WeightUnit) -> f64 {
    use WeightUnit::*;

    let converted = match (from, to) {
        (Kg, Kg) | (Lbs, Lbs) | (Jin, Jin) => return value,
        (Jin, Kg) => value * 0.5,
        (Lbs, Kg) => value * LBS_TO_KG,
        (Kg, Lbs) => value * KG_TO_LBS,
        (Jin, Lbs) => value * KG_TO_LBS * 0.5,
        (Kg, Jin) => value * 2.0,
        (Lbs, Jin) => value * LBS_TO_JIN,
    };

    round1(converted)
}
