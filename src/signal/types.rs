use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SignalError;

/// Canonical signal durations, in minutes. This is the only place the
/// allow-list is defined; the schema column is a plain integer.
pub const ALLOWED_DURATIONS_MIN: [u32; 3] = [10, 30, 60];

/// Duration used when the caller does not pick one.
pub const DEFAULT_DURATION_MIN: u32 = 60;

/// One position fix from a location sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_meters: Option<f64>,
}

impl LocationFix {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            accuracy_meters: None,
        }
    }

    pub fn with_accuracy(lat: f64, lon: f64, accuracy_meters: f64) -> Self {
        Self {
            lat,
            lon,
            accuracy_meters: Some(accuracy_meters),
        }
    }

    /// Accuracy, when present, must be a non-negative finite number.
    pub fn validate(&self) -> Result<(), SignalError> {
        if let Some(accuracy) = self.accuracy_meters {
            if !accuracy.is_finite() || accuracy < 0.0 {
                return Err(SignalError::InvalidAccuracy(accuracy));
            }
        }
        Ok(())
    }
}

/// Result of a status read. `Active` carries the authoritative expiry the
/// local countdown re-arms from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStatus {
    Active { expires_at: DateTime<Utc> },
    Inactive,
}

impl SignalStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SignalStatus::Active { .. })
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SignalStatus::Active { expires_at } => Some(*expires_at),
            SignalStatus::Inactive => None,
        }
    }
}

/// Low-precision spatial bucket of a coordinate pair: both components
/// rounded to two decimals and joined with a comma. Used as a coarse index
/// only, never for clustering.
pub fn simple_geohash(lat: f64, lon: f64) -> String {
    let lat_round = (lat * 100.0).round() / 100.0;
    let lon_round = (lon * 100.0).round() / 100.0;
    format!("{lat_round},{lon_round}")
}
