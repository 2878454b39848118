use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::store::record::{LocationPing, LocationStatusRecord, SignalActivation, VisibleUser};
use crate::store::{CHANGE_FEED_CAPACITY, ChangeEvent, VisibilityStore};

/// Notification channel fed by the `location_status` row trigger; the
/// payload is the trigger operation (`TG_OP`).
pub const CHANGE_CHANNEL: &str = "location_status_changes";

const COLUMNS: &str = "user_id, is_visible, visibility_duration, expires_at, \
     lat, lon, geohash, accuracy_meters, last_location_update, created_at, updated_at";

/// Postgres-backed visibility store.
///
/// Owns a dedicated `LISTEN` connection next to the pool and forwards every
/// trigger notification into a broadcast channel. The forwarder task holds
/// the only sender and does not reconnect: when the listener connection dies
/// the feed closes, and subscribers fall back to whatever snapshot they
/// already hold.
pub struct PgVisibilityStore {
    pool: PgPool,
    feed: broadcast::Receiver<ChangeEvent>,
    listener_task: JoinHandle<()>,
}

impl PgVisibilityStore {
    pub async fn new(pool: PgPool) -> Result<Self, StoreError> {
        let (changes, feed) = broadcast::channel(CHANGE_FEED_CAPACITY);

        let mut listener = PgListener::connect_with(&pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        let notifications = listener
            .into_stream()
            .map(|item| item.map(|notification| notification.payload().to_owned()));
        let listener_task = tokio::spawn(forward_notifications(notifications, changes));

        Ok(Self {
            pool,
            feed,
            listener_task,
        })
    }
}

impl Drop for PgVisibilityStore {
    fn drop(&mut self) {
        self.listener_task.abort();
    }
}

async fn forward_notifications<S>(mut stream: S, changes: broadcast::Sender<ChangeEvent>)
where
    S: Stream<Item = Result<String, sqlx::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(payload)) => {
                let event = parse_change(&payload);
                debug!(?event, "location_status change notification");
                // No subscribers is fine, the feed is best effort.
                let _ = changes.send(event);
            }
            Some(Err(err)) => {
                error!(error = %err, "change listener connection failed");
                break;
            }
            None => {
                warn!("change listener stream ended");
                break;
            }
        }
    }
}

/// Unknown payloads still count as a change; dropping a notification is the
/// one thing the feed must not do.
fn parse_change(payload: &str) -> ChangeEvent {
    match payload {
        "INSERT" => ChangeEvent::Insert,
        "DELETE" => ChangeEvent::Delete,
        _ => ChangeEvent::Update,
    }
}

#[async_trait::async_trait]
impl VisibilityStore for PgVisibilityStore {
    async fn ensure_profile(&self, user_id: &str, nickname: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO profiles (id, nickname) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET nickname = EXCLUDED.nickname, updated_at = now()",
        )
        .bind(user_id)
        .bind(nickname)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn activate(&self, activation: &SignalActivation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO location_status \
                 (user_id, is_visible, visibility_duration, expires_at, lat, lon, \
                  geohash, accuracy_meters, last_location_update, created_at, updated_at) \
             VALUES ($1, TRUE, $2, $3, $4, $5, $6, $7, $8, $8, $8) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 is_visible = TRUE, \
                 visibility_duration = EXCLUDED.visibility_duration, \
                 expires_at = EXCLUDED.expires_at, \
                 lat = EXCLUDED.lat, \
                 lon = EXCLUDED.lon, \
                 geohash = EXCLUDED.geohash, \
                 accuracy_meters = EXCLUDED.accuracy_meters, \
                 last_location_update = EXCLUDED.last_location_update, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(&activation.user_id)
        .bind(activation.duration_minutes as i32)
        .bind(activation.expires_at)
        .bind(activation.lat)
        .bind(activation.lon)
        .bind(&activation.geohash)
        .bind(activation.accuracy_meters)
        .bind(activation.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ping_location(&self, user_id: &str, ping: &LocationPing) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE location_status \
             SET lat = $2, lon = $3, geohash = $4, accuracy_meters = $5, \
                 last_location_update = $6, updated_at = $6 \
             WHERE user_id = $1 AND is_visible = TRUE",
        )
        .bind(user_id)
        .bind(ping.lat)
        .bind(ping.lon)
        .bind(&ping.geohash)
        .bind(ping.accuracy_meters)
        .bind(ping.at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE location_status \
             SET is_visible = FALSE, expires_at = NULL, lat = NULL, lon = NULL, \
                 geohash = NULL, accuracy_meters = NULL, updated_at = $2 \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_user_id(
        &self,
        user_id: &str,
    ) -> Result<Option<LocationStatusRecord>, StoreError> {
        let record = sqlx::query_as::<_, LocationStatusRecord>(&format!(
            "SELECT {COLUMNS} FROM location_status WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_visible(&self, now: DateTime<Utc>) -> Result<Vec<VisibleUser>, StoreError> {
        let users = sqlx::query_as::<_, VisibleUser>(
            "SELECT ls.user_id, ls.lat, ls.lon, p.nickname, \
                    vc.marka AS vehicle_brand, vc.model AS vehicle_model, ls.expires_at \
             FROM location_status ls \
             JOIN profiles p ON p.id = ls.user_id \
             LEFT JOIN LATERAL ( \
                 SELECT v.catalog_id FROM vehicles v \
                 WHERE v.user_id = ls.user_id \
                 ORDER BY v.is_primary DESC, v.created_at \
                 LIMIT 1 \
             ) pv ON TRUE \
             LEFT JOIN vehicle_catalog vc ON vc.id = pv.catalog_id \
             WHERE ls.is_visible = TRUE AND ls.expires_at > $1 \
               AND ls.lat IS NOT NULL AND ls.lon IS NOT NULL",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.resubscribe()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use futures_util::stream;
    use tokio::sync::broadcast::error::RecvError;

    use super::*;

    #[test]
    fn trigger_payload_maps_to_event_kind() {
        assert_eq!(parse_change("INSERT"), ChangeEvent::Insert);
        assert_eq!(parse_change("UPDATE"), ChangeEvent::Update);
        assert_eq!(parse_change("DELETE"), ChangeEvent::Delete);
        assert_eq!(parse_change("TRUNCATE"), ChangeEvent::Update);
    }

    #[tokio::test]
    async fn feed_closes_when_the_notification_stream_ends() {
        let (changes, mut feed) = broadcast::channel(8);
        let payloads = stream::iter(vec![
            Ok::<_, sqlx::Error>("INSERT".to_owned()),
            Ok("UPDATE".to_owned()),
        ]);

        forward_notifications(payloads, changes).await;

        assert_eq!(feed.recv().await.unwrap(), ChangeEvent::Insert);
        assert_eq!(feed.recv().await.unwrap(), ChangeEvent::Update);
        assert_matches!(feed.recv().await, Err(RecvError::Closed));
    }

    #[tokio::test]
    async fn feed_closes_after_a_listener_error() {
        let (changes, mut feed) = broadcast::channel(8);
        let payloads = stream::iter(vec![
            Ok("INSERT".to_owned()),
            Err(sqlx::Error::PoolClosed),
            Ok("DELETE".to_owned()),
        ]);

        forward_notifications(payloads, changes).await;

        // The forwarder stops at the first transport error.
        assert_eq!(feed.recv().await.unwrap(), ChangeEvent::Insert);
        assert_matches!(feed.recv().await, Err(RecvError::Closed));
    }
}
