//! User profiles and resolution of a reading to a profile.
//!
//! Profiles come from an optional CSV roster with the columns
//! `name,weight_min,weight_max,height,age,sex`. The scale itself does not tell
//! users apart, so resolution is a seam: today a single profile answers for
//! every reading.

use crate::measurement::Measurement;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Sex {
    Male,
    Female,
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sex::Male => write!(f, "male"),
            Sex::Female => write!(f, "female"),
        }
    }
}

impl FromStr for Sex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Sex::Male),
            "female" => Ok(Sex::Female),
            _ => Err(format!("unknown sex: {s}")),
        }
    }
}

impl TryFrom<String> for Sex {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A person who uses the scale.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserProfile {
    pub name: String,
    /// Lower bound of the weight range this user is expected in (kg)
    #[serde(rename = "weight_min")]
    pub weight_range_low: i32,
    /// Upper bound of the weight range this user is expected in (kg)
    #[serde(rename = "weight_max")]
    pub weight_range_high: i32,
    /// Height in centimetres
    pub height: f64,
    pub age: u8,
    pub sex: Sex,
}

impl Default for UserProfile {
    fn default() -> Self {
        UserProfile {
            name: "default".to_string(),
            weight_range_low: 0,
            weight_range_high: 200,
            height: 180.0,
            age: 23,
            sex: Sex::Male,
        }
    }
}

/// Errors returned when loading the user roster.
#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read user roster: {0}")]
    Csv(#[from] csv::Error),
    #[error("user roster contains no users")]
    Empty,
}

/// Load user profiles from a CSV file.
pub fn load_roster(path: &Path) -> Result<Vec<UserProfile>, RosterError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    read_roster(reader)
}

fn read_roster<R: std::io::Read>(
    mut reader: csv::Reader<R>,
) -> Result<Vec<UserProfile>, RosterError> {
    let users = reader
        .deserialize()
        .collect::<Result<Vec<UserProfile>, csv::Error>>()?;

    if users.is_empty() {
        return Err(RosterError::Empty);
    }
    Ok(users)
}

/// Maps a reading to the user who most likely stood on the scale.
pub trait UserResolver: Send + Sync {
    fn resolve(&self, measurement: &Measurement) -> &UserProfile;
}

/// Resolves every reading to the same profile.
#[derive(Debug, Clone, Default)]
pub struct SingleProfileResolver {
    profile: UserProfile,
}

impl SingleProfileResolver {
    pub fn new(profile: UserProfile) -> Self {
        Self { profile }
    }

    /// Use the first roster entry, or the built-in default profile.
    pub fn from_roster(users: Vec<UserProfile>) -> Self {
        Self::new(users.into_iter().next().unwrap_or_default())
    }
}

impl UserResolver for SingleProfileResolver {
    fn resolve(&self, _measurement: &Measurement) -> &UserProfile {
        &self.profile
    }
}
