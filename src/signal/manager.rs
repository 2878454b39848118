use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::error::SignalError;
use crate::signal::types::{ALLOWED_DURATIONS_MIN, LocationFix, SignalStatus, simple_geohash};
use crate::store::{LocationPing, SignalActivation, VisibilityStore};

/// Lifecycle of one user's own signal.
///
/// Holds the user id it acts for; all writes go through the store's
/// single-row operations, so two managers for the same user converge on
/// whatever was written last. Errors surface as coarse, user-facing
/// [`SignalError`] values, the store detail stays in the log.
pub struct SignalManager<S> {
    store: Arc<S>,
    user_id: String,
}

impl<S> Clone for SignalManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            user_id: self.user_id.clone(),
        }
    }
}

impl<S: VisibilityStore> SignalManager<S> {
    pub fn new(store: Arc<S>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Open a visibility window of `duration_minutes` at the given fix and
    /// return the expiry the store now holds. Restarting while already
    /// active is allowed and simply rewrites the whole row.
    pub async fn start(
        &self,
        fix: &LocationFix,
        duration_minutes: u32,
    ) -> Result<DateTime<Utc>, SignalError> {
        if !ALLOWED_DURATIONS_MIN.contains(&duration_minutes) {
            return Err(SignalError::InvalidDuration(duration_minutes));
        }
        fix.validate()?;

        let started_at = Utc::now();
        let expires_at = started_at + Duration::minutes(i64::from(duration_minutes));
        let activation = SignalActivation {
            user_id: self.user_id.clone(),
            duration_minutes,
            expires_at,
            lat: fix.lat,
            lon: fix.lon,
            geohash: simple_geohash(fix.lat, fix.lon),
            accuracy_meters: fix.accuracy_meters,
            started_at,
        };

        match self.store.activate(&activation).await {
            Ok(()) => {
                info!(
                    user_id = %self.user_id,
                    duration_minutes,
                    expires_at = %expires_at,
                    "signal started"
                );
                Ok(expires_at)
            }
            Err(err) => {
                error!(user_id = %self.user_id, error = %err, "signal start failed");
                Err(SignalError::StartFailed)
            }
        }
    }

    /// Refresh the published coordinates while the signal is active. Never
    /// extends the expiry and never revives a stopped or expired signal;
    /// returns whether the store applied the ping. Store failures are
    /// logged and reported as not applied, the next ping tries again.
    pub async fn update_location(&self, fix: &LocationFix) -> bool {
        let ping = LocationPing {
            lat: fix.lat,
            lon: fix.lon,
            geohash: simple_geohash(fix.lat, fix.lon),
            accuracy_meters: fix.accuracy_meters,
            at: Utc::now(),
        };

        match self.store.ping_location(&self.user_id, &ping).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(user_id = %self.user_id, "location ping ignored, no active signal");
                false
            }
            Err(err) => {
                warn!(user_id = %self.user_id, error = %err, "location ping failed");
                false
            }
        }
    }

    /// Close the window now. Succeeds when there is nothing to close.
    pub async fn stop(&self) -> Result<(), SignalError> {
        match self.store.deactivate(&self.user_id, Utc::now()).await {
            Ok(()) => {
                info!(user_id = %self.user_id, "signal stopped");
                Ok(())
            }
            Err(err) => {
                error!(user_id = %self.user_id, error = %err, "signal stop failed");
                Err(SignalError::StopFailed)
            }
        }
    }

    /// Authoritative status of the own signal.
    ///
    /// A record still flagged visible past its expiry reads as `Inactive`
    /// and is deactivated on the spot, so the table heals on the next
    /// status check even when no client stopped the signal cleanly. A
    /// store failure also reads as `Inactive`; the caller may simply ask
    /// again later.
    pub async fn check_status(&self) -> SignalStatus {
        let now = Utc::now();
        let record = match self.store.find_by_user_id(&self.user_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return SignalStatus::Inactive,
            Err(err) => {
                warn!(user_id = %self.user_id, error = %err, "status check failed");
                return SignalStatus::Inactive;
            }
        };

        if let Some(expires_at) = record.expires_at {
            if record.is_visible && expires_at > now {
                return SignalStatus::Active { expires_at };
            }
        }

        if record.is_stale_active(now) {
            info!(user_id = %self.user_id, "expired signal found on status check, deactivating");
            if let Err(err) = self.stop().await {
                warn!(user_id = %self.user_id, error = %err, "lazy deactivation failed");
            }
        }

        SignalStatus::Inactive
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{Duration, Utc};

    use super::*;
    use crate::store::{LocationStatusRecord, MemoryVisibilityStore};

    fn manager(store: Arc<MemoryVisibilityStore>) -> SignalManager<MemoryVisibilityStore> {
        SignalManager::new(store, "driver-1")
    }

    fn stale_active_record(user_id: &str) -> LocationStatusRecord {
        let now = Utc::now();
        LocationStatusRecord {
            user_id: user_id.to_string(),
            is_visible: true,
            visibility_duration: Some(10),
            expires_at: Some(now - Duration::minutes(3)),
            lat: Some(41.0082),
            lon: Some(28.9784),
            geohash: Some(simple_geohash(41.0082, 28.9784)),
            accuracy_meters: Some(9.0),
            last_location_update: now - Duration::minutes(13),
            created_at: now - Duration::minutes(13),
            updated_at: now - Duration::minutes(13),
        }
    }

    #[tokio::test]
    async fn rejects_duration_outside_allow_list() {
        let store = Arc::new(MemoryVisibilityStore::new());
        let manager = manager(Arc::clone(&store));

        let result = manager.start(&LocationFix::new(41.0, 29.0), 45).await;

        assert_matches!(result, Err(SignalError::InvalidDuration(45)));
        assert!(store.find_by_user_id("driver-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn start_writes_full_activation_row() {
        let store = Arc::new(MemoryVisibilityStore::new());
        let manager = manager(Arc::clone(&store));
        let before = Utc::now();

        let expires_at = manager
            .start(&LocationFix::with_accuracy(41.0082, 28.9784, 12.5), 30)
            .await
            .unwrap();

        let lower = before + Duration::minutes(29);
        let upper = Utc::now() + Duration::minutes(31);
        assert!(expires_at > lower && expires_at < upper);

        let record = store.find_by_user_id("driver-1").await.unwrap().unwrap();
        assert!(record.is_visible);
        assert_eq!(record.visibility_duration, Some(30));
        assert_eq!(record.expires_at, Some(expires_at));
        assert_eq!(record.lat, Some(41.0082));
        assert_eq!(record.lon, Some(28.9784));
        assert_eq!(record.geohash.as_deref(), Some("41.01,28.98"));
        assert_eq!(record.accuracy_meters, Some(12.5));
    }

    #[tokio::test]
    async fn status_reports_active_with_store_expiry() {
        let store = Arc::new(MemoryVisibilityStore::new());
        let manager = manager(store);

        let expires_at = manager.start(&LocationFix::new(41.0, 29.0), 10).await.unwrap();

        assert_eq!(manager.check_status().await, SignalStatus::Active { expires_at });
    }

    #[tokio::test]
    async fn stale_active_record_reads_inactive_and_heals() {
        let store = Arc::new(MemoryVisibilityStore::new());
        store.seed_record(stale_active_record("driver-1")).await;
        let manager = manager(Arc::clone(&store));

        assert_eq!(manager.check_status().await, SignalStatus::Inactive);

        let record = store.find_by_user_id("driver-1").await.unwrap().unwrap();
        assert!(!record.is_visible);
        assert_eq!(record.expires_at, None);
    }

    #[tokio::test]
    async fn ping_moves_coordinates_without_touching_expiry() {
        let store = Arc::new(MemoryVisibilityStore::new());
        let manager = manager(Arc::clone(&store));
        let expires_at = manager.start(&LocationFix::new(41.0, 29.0), 10).await.unwrap();

        assert!(manager.update_location(&LocationFix::new(41.02, 29.03)).await);

        let record = store.find_by_user_id("driver-1").await.unwrap().unwrap();
        assert_eq!(record.lat, Some(41.02));
        assert_eq!(record.lon, Some(29.03));
        assert_eq!(record.geohash.as_deref(), Some("41.02,29.03"));
        assert_eq!(record.expires_at, Some(expires_at));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let store = Arc::new(MemoryVisibilityStore::new());
        let manager = manager(Arc::clone(&store));
        manager.start(&LocationFix::new(41.0, 29.0), 10).await.unwrap();

        manager.stop().await.unwrap();
        manager.stop().await.unwrap();
        // Stopping without any record at all is also fine.
        SignalManager::new(Arc::clone(&store), "nobody").stop().await.unwrap();

        let record = store.find_by_user_id("driver-1").await.unwrap().unwrap();
        assert!(!record.is_visible);
        assert_eq!(record.lat, None);
        assert_eq!(record.lon, None);
        assert_eq!(record.expires_at, None);
    }

    #[tokio::test]
    async fn ping_after_stop_does_not_revive_signal() {
        let store = Arc::new(MemoryVisibilityStore::new());
        let manager = manager(Arc::clone(&store));
        manager.start(&LocationFix::new(41.0, 29.0), 10).await.unwrap();
        manager.stop().await.unwrap();

        assert!(!manager.update_location(&LocationFix::new(41.5, 29.5)).await);

        let record = store.find_by_user_id("driver-1").await.unwrap().unwrap();
        assert!(!record.is_visible);
        assert_eq!(record.lat, None);
        assert_eq!(record.lon, None);
    }

    #[tokio::test]
    async fn store_failures_map_to_user_facing_errors() {
        let store = Arc::new(MemoryVisibilityStore::new());
        let manager = manager(Arc::clone(&store));
        store.set_failing(true);

        assert_matches!(
            manager.start(&LocationFix::new(41.0, 29.0), 10).await,
            Err(SignalError::StartFailed)
        );
        assert_matches!(manager.stop().await, Err(SignalError::StopFailed));
        assert_eq!(manager.check_status().await, SignalStatus::Inactive);
        assert!(!manager.update_location(&LocationFix::new(41.0, 29.0)).await);
    }
}
