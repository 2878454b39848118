// Location acquisition
// Seam for the device position. The console has no real sensor, so the
// fixed source stands in for one; the timeout and fallback policy around
// any source lives here.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::LocationError;
use crate::signal::types::LocationFix;

/// Accuracy attached to the configured fallback position.
pub const FALLBACK_ACCURACY_METERS: f64 = 100.0;

/// A source of device position fixes.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn current_position(&self) -> Result<LocationFix, LocationError>;
}

/// Source that always reports the same position, driven by configuration.
pub struct FixedLocationSource {
    fix: LocationFix,
}

impl FixedLocationSource {
    pub fn new(fix: LocationFix) -> Self {
        Self { fix }
    }
}

#[async_trait]
impl LocationSource for FixedLocationSource {
    async fn current_position(&self) -> Result<LocationFix, LocationError> {
        Ok(self.fix)
    }
}

/// One position read with a deadline.
///
/// A sensor failure or timeout falls back to the given default position
/// when one is configured; without a fallback the error is the caller's
/// problem. Timeouts surface as [`LocationError::Timeout`], matching what
/// a sensor-side deadline would report.
pub async fn acquire_fix<S: LocationSource + ?Sized>(
    source: &S,
    deadline: Duration,
    fallback: Option<LocationFix>,
) -> Result<LocationFix, LocationError> {
    match tokio::time::timeout(deadline, source.current_position()).await {
        Ok(Ok(fix)) => Ok(fix),
        Ok(Err(err)) => match fallback {
            Some(fix) => {
                warn!(error = %err, "location source failed, using fallback position");
                Ok(fix)
            }
            None => Err(err),
        },
        Err(_) => match fallback {
            Some(fix) => {
                warn!("location request timed out, using fallback position");
                Ok(fix)
            }
            None => Err(LocationError::Timeout),
        },
    }
}
