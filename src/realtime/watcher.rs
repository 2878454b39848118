use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::signal::visible::VisibleSetReader;
use crate::store::{ChangeEvent, VisibilityStore, VisibleUser};

/// Keeps a live snapshot of the visible set.
///
/// Change events carry no payload, so every event triggers one full
/// re-fetch; a lagged receiver therefore costs a single extra fetch and
/// loses nothing. When a re-fetch fails the previous snapshot stays in
/// place until the next event. When the change feed closes the task ends
/// and the snapshot freezes; reconnecting is the transport's job, not
/// ours.
pub struct VisibleSetWatcher {
    snapshot: watch::Receiver<Vec<VisibleUser>>,
    task: JoinHandle<()>,
}

impl VisibleSetWatcher {
    pub fn spawn<S: VisibilityStore + 'static>(store: Arc<S>) -> Self {
        let reader = VisibleSetReader::new(Arc::clone(&store));
        let changes = store.subscribe();
        let (tx, rx) = watch::channel(Vec::new());
        let task = tokio::spawn(run_loop(reader, changes, tx));
        Self { snapshot: rx, task }
    }

    /// Current snapshot, cloned out of the watch cell.
    pub fn snapshot(&self) -> Vec<VisibleUser> {
        self.snapshot.borrow().clone()
    }

    /// A receiver that wakes on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Vec<VisibleUser>> {
        self.snapshot.clone()
    }

    pub async fn stop(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for VisibleSetWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_loop<S: VisibilityStore>(
    reader: VisibleSetReader<S>,
    mut changes: broadcast::Receiver<ChangeEvent>,
    snapshot: watch::Sender<Vec<VisibleUser>>,
) {
    // Baseline before the first event.
    refetch(&reader, &snapshot).await;

    loop {
        match changes.recv().await {
            Ok(event) => {
                debug!(?event, "change event, refreshing visible set");
                refetch(&reader, &snapshot).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "change feed lagged, refreshing once");
                refetch(&reader, &snapshot).await;
            }
            Err(RecvError::Closed) => {
                warn!("change feed closed, visible set frozen");
                break;
            }
        }
    }
}

async fn refetch<S: VisibilityStore>(
    reader: &VisibleSetReader<S>,
    snapshot: &watch::Sender<Vec<VisibleUser>>,
) {
    match reader.try_list_visible().await {
        Ok(users) => {
            let _ = snapshot.send(users);
        }
        Err(err) => {
            warn!(error = %err, "visible-set refresh failed, keeping previous snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tokio::time::timeout;

    use super::*;
    use crate::store::{MemoryVisibilityStore, SignalActivation};

    async fn wait_for_len(watcher: &VisibleSetWatcher, len: usize) -> Vec<VisibleUser> {
        let mut rx = watcher.subscribe();
        timeout(Duration::from_secs(2), async {
            loop {
                let current = rx.borrow_and_update().clone();
                if current.len() == len {
                    return current;
                }
                rx.changed().await.expect("watcher task ended early");
            }
        })
        .await
        .expect("visible set never reached the expected size")
    }

    fn activation(user_id: &str) -> SignalActivation {
        let now = Utc::now();
        SignalActivation {
            user_id: user_id.to_string(),
            duration_minutes: 10,
            expires_at: now + chrono::Duration::minutes(10),
            lat: 41.0,
            lon: 29.0,
            geohash: "41,29".into(),
            accuracy_meters: None,
            started_at: now,
        }
    }

    #[tokio::test]
    async fn publishes_baseline_snapshot_on_spawn() {
        let store = Arc::new(MemoryVisibilityStore::with_mock_users());
        let watcher = VisibleSetWatcher::spawn(Arc::clone(&store));

        let visible = wait_for_len(&watcher, 3).await;
        assert!(visible.iter().any(|u| u.nickname == "BMWci34"));

        watcher.stop().await;
    }

    #[tokio::test]
    async fn refreshes_on_every_change_event() {
        let store = Arc::new(MemoryVisibilityStore::new());
        store.ensure_profile("driver-9", "Driver9").await.unwrap();
        let watcher = VisibleSetWatcher::spawn(Arc::clone(&store));
        wait_for_len(&watcher, 0).await;

        store.activate(&activation("driver-9")).await.unwrap();
        let visible = wait_for_len(&watcher, 1).await;
        assert_eq!(visible[0].user_id, "driver-9");

        store.deactivate("driver-9", Utc::now()).await.unwrap();
        wait_for_len(&watcher, 0).await;

        watcher.stop().await;
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let store = Arc::new(MemoryVisibilityStore::with_mock_users());
        let watcher = VisibleSetWatcher::spawn(Arc::clone(&store));
        wait_for_len(&watcher, 3).await;

        store.set_failing(true);
        // Seeding bypasses the fault switch, so an event still fires; only
        // the re-fetch inside the watcher fails.
        store.deactivate("user-1", Utc::now()).await.unwrap_err();
        store
            .seed_record({
                let mut record = stale("user-1");
                record.is_visible = false;
                record
            })
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(watcher.snapshot().len(), 3);

        store.set_failing(false);
        store.seed_record(stale("user-3")).await;
        wait_for_len(&watcher, 1).await;

        watcher.stop().await;
    }

    fn stale(user_id: &str) -> crate::store::LocationStatusRecord {
        let now = Utc::now();
        crate::store::LocationStatusRecord {
            user_id: user_id.to_string(),
            is_visible: true,
            visibility_duration: Some(10),
            expires_at: Some(now - chrono::Duration::minutes(1)),
            lat: Some(41.0),
            lon: Some(29.0),
            geohash: Some("41,29".into()),
            accuracy_meters: None,
            last_location_update: now,
            created_at: now,
            updated_at: now,
        }
    }
}
