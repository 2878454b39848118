use std::env;
use std::time::Duration;

use crate::signal::types::DEFAULT_DURATION_MIN;

/// Istanbul city center, used when no default coordinate is configured.
const ISTANBUL_LAT: f64 = 41.0082;
const ISTANBUL_LON: f64 = 28.9784;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Postgres connection string. When unset the console runs against the
    /// in-memory store (mock mode).
    pub database_url: Option<String>,
    pub user_id: String,
    pub nickname: String,
    pub signal_duration_minutes: u32,
    pub location_timeout_secs: u64,
    pub location_update_secs: u64,
    pub default_lat: f64,
    pub default_lon: f64,
    pub use_fallback_location: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let user_id =
            env::var("SINYAL_USER_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
        // Works for any id, not just full-length UUIDs.
        let short_id = user_id.get(..6).unwrap_or(user_id.as_str());
        let nickname =
            env::var("SINYAL_NICKNAME").unwrap_or_else(|_| format!("Sürücü{short_id}"));

        Config {
            database_url: env::var("DATABASE_URL").ok(),
            user_id,
            nickname,
            signal_duration_minutes: env::var("SIGNAL_DURATION_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_DURATION_MIN),
            location_timeout_secs: env::var("LOCATION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(15),
            location_update_secs: env::var("LOCATION_UPDATE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            default_lat: env::var("DEFAULT_LAT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(ISTANBUL_LAT),
            default_lon: env::var("DEFAULT_LON")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(ISTANBUL_LON),
            use_fallback_location: env::var("USE_FALLBACK_LOCATION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
        }
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.location_timeout_secs)
    }

    pub fn location_update_interval(&self) -> Duration {
        Duration::from_secs(self.location_update_secs)
    }
}
