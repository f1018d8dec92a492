use serde::{Deserialize, Serialize};
use std::str::FromStr;

const METERS_PER_MILE: f64 = 1609.344;

/// Distance unit accepted by the `buffer` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    Kilometers,
    Miles,
    Meters,
}

impl DistanceUnit {
    /// Convert a distance in this unit to meters.
    pub fn as_meters(&self, distance: f64) -> f64 {
        match self {
            DistanceUnit::Kilometers => distance * 1000.0,
            DistanceUnit::Miles => distance * METERS_PER_MILE,
            DistanceUnit::Meters => distance,
        }
    }
}

impl FromStr for DistanceUnit {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "kilometers" => Ok(DistanceUnit::Kilometers),
            "miles" => Ok(DistanceUnit::Miles),
            "meters" => Ok(DistanceUnit::Meters),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DistanceUnit::Kilometers => "kilometers",
            DistanceUnit::Miles => "miles",
            DistanceUnit::Meters => "meters",
        };
        write!(f, "{name}")
    }
}
