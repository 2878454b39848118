use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// `location_status` row. One per user, only that user's client writes it,
/// never deleted; a stopped signal is an update, not a delete.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LocationStatusRecord {
    pub user_id: String,
    pub is_visible: bool,
    pub visibility_duration: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub geohash: Option<String>,
    pub accuracy_meters: Option<f64>,
    pub last_location_update: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocationStatusRecord {
    /// Visible to readers at `now`: the flag and the expiry are always
    /// checked together, never the flag alone.
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        self.is_visible && self.expires_at.is_some_and(|expiry| expiry > now)
    }

    /// Still flagged visible although the expiry has passed. Readers treat
    /// such a record as invisible; the status path lazily corrects it.
    pub fn is_stale_active(&self, now: DateTime<Utc>) -> bool {
        self.is_visible && self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// One visible user as the map consumes them: coordinates joined with the
/// public nickname and the primary vehicle, if any. Rebuilt on every read,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct VisibleUser {
    pub user_id: String,
    pub lat: f64,
    pub lon: f64,
    pub nickname: String,
    pub vehicle_brand: Option<String>,
    pub vehicle_model: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Full row written when a signal starts.
#[derive(Debug, Clone)]
pub struct SignalActivation {
    pub user_id: String,
    pub duration_minutes: u32,
    pub expires_at: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub geohash: String,
    pub accuracy_meters: Option<f64>,
    pub started_at: DateTime<Utc>,
}

/// In-place location refresh while a signal is active. Never touches
/// `expires_at`.
#[derive(Debug, Clone)]
pub struct LocationPing {
    pub lat: f64,
    pub lon: f64,
    pub geohash: String,
    pub accuracy_meters: Option<f64>,
    pub at: DateTime<Utc>,
}
