// Visibility store
// The narrow persistence contract the signal subsystem rides on: one keyed
// record per user, plus a row-level change feed over the whole table.

pub mod memory;
pub mod postgres;
pub mod record;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::StoreError;

pub use memory::MemoryVisibilityStore;
pub use postgres::PgVisibilityStore;
pub use record::{LocationPing, LocationStatusRecord, SignalActivation, VisibleUser};

/// Capacity of the change-feed broadcast channel. A lagged receiver only
/// costs one extra re-fetch, so the buffer can stay small.
pub const CHANGE_FEED_CAPACITY: usize = 64;

/// One row-level change on `location_status`. The operation kind is carried
/// for logging; consumers re-fetch on every event and never branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert,
    Update,
    Delete,
}

/// Store of per-user visibility records.
///
/// Each user's record is written only by that user's own client and read by
/// everyone; no locking beyond per-row atomicity of upsert/update is
/// assumed. All timestamps are supplied by the caller so that readers and
/// writers agree on one clock.
#[async_trait]
pub trait VisibilityStore: Send + Sync {
    /// Upsert the public profile row the visible-set join hangs off.
    /// Called once at startup; the signal row references it.
    async fn ensure_profile(&self, user_id: &str, nickname: &str) -> Result<(), StoreError>;

    /// Upsert the user's record with the full activation payload and
    /// `is_visible = true`. The only operation that opens a visibility
    /// window.
    async fn activate(&self, activation: &SignalActivation) -> Result<(), StoreError>;

    /// Refresh coordinates in place, only while the record is visible.
    /// Returns `false` when no visible record was there to update; this is
    /// how a ping on an expired or stopped session is ignored.
    async fn ping_location(&self, user_id: &str, ping: &LocationPing) -> Result<bool, StoreError>;

    /// Close the visibility window: clears the flag, expiry, coordinates,
    /// accuracy and geohash. Succeeds when the record is already inactive
    /// or absent.
    async fn deactivate(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn find_by_user_id(
        &self,
        user_id: &str,
    ) -> Result<Option<LocationStatusRecord>, StoreError>;

    /// All records visible at `now` (flag set, expiry in the future,
    /// coordinates present), joined with nickname and at most one vehicle
    /// per user. Unordered.
    async fn list_visible(&self, now: DateTime<Utc>) -> Result<Vec<VisibleUser>, StoreError>;

    /// Subscribe to the row-level change feed. Every insert, update or
    /// delete on the table produces at least one event; no payload beyond
    /// the operation kind is delivered.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}
