//! Shared value types. No logic beyond trivial constructors.

use serde::{Deserialize, Serialize};
use time::{Date, UtcOffset};

use crate::timestamp::parse_timestamp;

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// One gauge sample as it arrives from the ingestion sheet.
///
/// `level` is the water depth in the observation pipe, in centimetres
/// (0 = pipe bottom, 15 = soil surface, 30 = gauge top).  Values outside that
/// range are kept as-is; the engine is advisory, not an interlock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub raw_timestamp: String,
    pub level: f64,
}

impl Reading {
    pub fn new(raw_timestamp: impl Into<String>, level: f64) -> Self {
        Self {
            raw_timestamp: raw_timestamp.into(),
            level,
        }
    }

    /// Resolve the raw timestamp.  `epoch_ms == 0` means it did not parse.
    pub fn normalize(&self, offset: UtcOffset) -> NormalizedReading {
        NormalizedReading {
            epoch_ms: parse_timestamp(&self.raw_timestamp, offset),
            level: self.level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedReading {
    pub epoch_ms: i64,
    pub level: f64,
}

// ---------------------------------------------------------------------------
// External inputs
// ---------------------------------------------------------------------------

/// Current conditions from the weather provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherSnapshot {
    /// Air temperature, °C.
    pub temp: f64,
    /// Probability of precipitation, 0..=100.
    pub rain_chance: f64,
    /// Forecast precipitation over the next 24 hours, mm.
    pub rain_forecast_24h: f64,
    pub is_rainy: bool,
    pub condition_text: String,
    pub location_name: String,
}

/// Planting record for one sensor's plot.  Owned and edited outside the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropPlan {
    pub sensor_id: String,
    #[serde(default, with = "crate::iso_date::option")]
    pub planting_date: Option<Date>,
}

// ===========================================================================
// Tests
// ===========================================================================
