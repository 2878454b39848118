use std::sync::Arc;

use chrono::Utc;
use tracing::error;

use crate::error::StoreError;
use crate::store::{VisibilityStore, VisibleUser};

/// Read side of the visible set.
///
/// The map is decoration, not a safety feature, so the public read fails
/// open: a store failure renders as nobody around rather than an error
/// screen. Callers that keep a previous snapshot use the fallible read and
/// decide for themselves.
pub struct VisibleSetReader<S> {
    store: Arc<S>,
}

impl<S> Clone for VisibleSetReader<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: VisibilityStore> VisibleSetReader<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Every user visible right now. Expired-but-flagged records are
    /// already filtered out by the store's expiry check.
    pub async fn try_list_visible(&self) -> Result<Vec<VisibleUser>, StoreError> {
        self.store.list_visible(Utc::now()).await
    }

    /// Fail-open read: on a store failure logs and returns an empty set.
    pub async fn list_visible(&self) -> Vec<VisibleUser> {
        match self.try_list_visible().await {
            Ok(users) => users,
            Err(err) => {
                error!(error = %err, "visible-set read failed, showing empty map");
                Vec::new()
            }
        }
    }
}
