//! Body metrics derived from a weight reading and a user profile.
//!
//! The Xiaomi body-composition formulas need impedance for everything except
//! BMI, basal metabolism and visceral fat. The v1 scale has no impedance
//! sensor, so those three are all that is computed.

use crate::measurement::Measurement;
use crate::unit::round2;
use crate::user::{Sex, UserProfile};
use serde::Serialize;
use thiserror::Error;

/// Metrics published alongside the weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BodyMetrics {
    #[serde(rename = "BMI")]
    pub bmi: f64,
    #[serde(rename = "Basal Metabolism")]
    pub basal_metabolism: f64,
    #[serde(rename = "Visceral Fat")]
    pub visceral_fat: f64,
}

/// Errors returned when inputs are outside what the formulas support.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricsError {
    #[error("{field} {value} is out of range")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Inputs of a formula evaluation, weight in kilograms and height in centimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormulaInput {
    pub weight_kg: f64,
    pub height_cm: f64,
    pub age: u8,
    pub sex: Sex,
    pub impedance: u16,
}

/// Raw formula results, before rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormulaOutput {
    pub bmi: f64,
    pub bmr: f64,
    pub visceral_fat: f64,
}

/// A body-composition formula set.
pub trait FormulaLibrary: Send + Sync {
    fn evaluate(&self, input: &FormulaInput) -> Result<FormulaOutput, MetricsError>;
}

/// The Xiaomi formula set.
#[derive(Debug, Default, Clone, Copy)]
pub struct XiaomiFormulas;

impl XiaomiFormulas {
    fn check(input: &FormulaInput) -> Result<(), MetricsError> {
        if input.height_cm > 220.0 {
            return Err(MetricsError::OutOfRange {
                field: "height",
                value: input.height_cm,
            });
        }
        if !(10.0..=200.0).contains(&input.weight_kg) {
            return Err(MetricsError::OutOfRange {
                field: "weight",
                value: input.weight_kg,
            });
        }
        if input.age > 99 {
            return Err(MetricsError::OutOfRange {
                field: "age",
                value: f64::from(input.age),
            });
        }
        if input.impedance > 3000 {
            return Err(MetricsError::OutOfRange {
                field: "impedance",
                value: f64::from(input.impedance),
            });
        }
        Ok(())
    }

    fn bmi(input: &FormulaInput) -> f64 {
        let height_m = input.height_cm / 100.0;
        (input.weight_kg / (height_m * height_m)).clamp(10.0, 90.0)
    }

    fn bmr(input: &FormulaInput) -> f64 {
        let (weight, height, age) = (input.weight_kg, input.height_cm, f64::from(input.age));
        let bmr = match input.sex {
            Sex::Female => 864.6 + weight * 10.2036 - height * 0.39336 - age * 6.204,
            Sex::Male => 877.8 + weight * 14.916 - height * 0.726 - age * 8.976,
        };
        let cap = match input.sex {
            Sex::Female => 2996.0,
            Sex::Male => 2322.0,
        };
        let bmr = if bmr > cap { 5000.0 } else { bmr };
        bmr.clamp(500.0, 10000.0)
    }

    fn visceral_fat(input: &FormulaInput) -> f64 {
        let (weight, height, age) = (input.weight_kg, input.height_cm, f64::from(input.age));
        let vfal = match input.sex {
            Sex::Female if weight > -(13.0 - height * 0.5) => {
                let denominator = height * 1.45 + height * 0.1158 * height - 120.0;
                weight * 500.0 / denominator - 6.0 + age * 0.07
            }
            Sex::Female => {
                let factor = 0.691 + height * -0.0024 + height * -0.0024;
                -(height * 0.027 - factor * weight) + age * 0.07 - age
            }
            Sex::Male if height < weight * 1.6 => {
                let denominator = -(height * 0.4 - height * (height * 0.0826));
                weight * 305.0 / (denominator + 48.0) - 2.9 + age * 0.11
            }
            Sex::Male => {
                let factor = 0.765 + height * -0.0015;
                -(height * 0.143 - weight * factor) + age * 0.15 - 5.0
            }
        };
        vfal.clamp(1.0, 50.0)
    }
}

impl FormulaLibrary for XiaomiFormulas {
    fn evaluate(&self, input: &FormulaInput) -> Result<FormulaOutput, MetricsError> {
        Self::check(input)?;
        Ok(FormulaOutput {
            bmi: Self::bmi(input),
            bmr: Self::bmr(input),
            visceral_fat: Self::visceral_fat(input),
        })
    }
}

/// Computes [`BodyMetrics`] for a resolved reading.
pub struct BodyMetricsEstimator {
    formulas: Box<dyn FormulaLibrary>,
}

impl Default for BodyMetricsEstimator {
    fn default() -> Self {
        Self::new(Box::new(XiaomiFormulas))
    }
}

impl BodyMetricsEstimator {
    pub fn new(formulas: Box<dyn FormulaLibrary>) -> Self {
        Self { formulas }
    }

    /// Convert the reading to kilograms and evaluate the formulas for `profile`.
    ///
    /// The scale has no impedance sensor, so impedance is always 0.
    pub fn estimate(
        &self,
        measurement: &Measurement,
        profile: &UserProfile,
    ) -> Result<BodyMetrics, MetricsError> {
        let input = FormulaInput {
            weight_kg: measurement.weight_kg(),
            height_cm: profile.height,
            age: profile.age,
            sex: profile.sex,
            impedance: 0,
        };
        let output = self.formulas.evaluate(&input)?;

        Ok(BodyMetrics {
            bmi: round2(output.bmi),
            basal_metabolism: round2(output.bmr),
            visceral_fat: round2(output.visceral_fat),
        })
    }
}
