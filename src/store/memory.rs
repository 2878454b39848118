use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{RwLock, broadcast};

use crate::error::StoreError;
use crate::store::record::{LocationPing, LocationStatusRecord, SignalActivation, VisibleUser};
use crate::store::{CHANGE_FEED_CAPACITY, ChangeEvent, VisibilityStore};

struct SeededVehicle {
    brand: String,
    model: String,
    is_primary: bool,
}

/// In-memory visibility store.
///
/// Serves two roles: the console's mock mode when no database is configured,
/// and the shared test double. Mirrors the Postgres adapter's semantics,
/// including one change event per applied write, and adds a fault switch so
/// tests can exercise the fail-open paths.
pub struct MemoryVisibilityStore {
    records: RwLock<HashMap<String, LocationStatusRecord>>,
    profiles: RwLock<HashMap<String, String>>,
    vehicles: RwLock<HashMap<String, Vec<SeededVehicle>>>,
    failing: AtomicBool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl MemoryVisibilityStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            vehicles: RwLock::new(HashMap::new()),
            failing: AtomicBool::new(false),
            changes,
        }
    }

    /// Store pre-seeded with three visible drivers around Istanbul, the
    /// mock-mode fixture the console falls back to without `DATABASE_URL`.
    pub fn with_mock_users() -> Self {
        let now = Utc::now();
        let seeds = [
            ("user-1", "BMWci34", "BMW", "320i", 41.0082, 28.9784, 60),
            ("user-2", "MercedesFan", "Mercedes", "C200", 41.0122, 28.9824, 45),
            ("user-3", "AudiTR", "Audi", "A4", 41.0052, 28.9754, 30),
        ];

        let mut records = HashMap::new();
        let mut profiles = HashMap::new();
        let mut vehicles = HashMap::new();
        for (user_id, nickname, brand, model, lat, lon, minutes_left) in seeds {
            records.insert(
                user_id.to_string(),
                LocationStatusRecord {
                    user_id: user_id.to_string(),
                    is_visible: true,
                    visibility_duration: Some(60),
                    expires_at: Some(now + Duration::minutes(minutes_left)),
                    lat: Some(lat),
                    lon: Some(lon),
                    geohash: Some(crate::signal::types::simple_geohash(lat, lon)),
                    accuracy_meters: None,
                    last_location_update: now,
                    created_at: now,
                    updated_at: now,
                },
            );
            profiles.insert(user_id.to_string(), nickname.to_string());
            vehicles.insert(
                user_id.to_string(),
                vec![SeededVehicle {
                    brand: brand.to_string(),
                    model: model.to_string(),
                    is_primary: true,
                }],
            );
        }

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            records: RwLock::new(records),
            profiles: RwLock::new(profiles),
            vehicles: RwLock::new(vehicles),
            failing: AtomicBool::new(false),
            changes,
        }
    }

    /// Make every store call fail with [`StoreError::Unavailable`] until
    /// switched back. The change feed stays up.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Seed a vehicle row for the visible-set join.
    pub async fn seed_vehicle(&self, user_id: &str, brand: &str, model: &str, is_primary: bool) {
        self.vehicles
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .push(SeededVehicle {
                brand: brand.to_string(),
                model: model.to_string(),
                is_primary,
            });
    }

    /// Plant a raw record, as a direct SQL write would. Publishes a change
    /// event like any other write to the table.
    pub async fn seed_record(&self, record: LocationStatusRecord) {
        let event = {
            let mut records = self.records.write().await;
            let event = if records.contains_key(&record.user_id) {
                ChangeEvent::Update
            } else {
                ChangeEvent::Insert
            };
            records.insert(record.user_id.clone(), record);
            event
        };
        self.publish(event);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected fault".into()));
        }
        Ok(())
    }

    fn publish(&self, event: ChangeEvent) {
        // SendError only means there are no subscribers right now.
        let _ = self.changes.send(event);
    }
}

impl Default for MemoryVisibilityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl VisibilityStore for MemoryVisibilityStore {
    async fn ensure_profile(&self, user_id: &str, nickname: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.profiles
            .write()
            .await
            .insert(user_id.to_string(), nickname.to_string());
        Ok(())
    }

    async fn activate(&self, activation: &SignalActivation) -> Result<(), StoreError> {
        self.check_available()?;

        let event = {
            let mut records = self.records.write().await;
            match records.get_mut(&activation.user_id) {
                Some(record) => {
                    record.is_visible = true;
                    record.visibility_duration = Some(activation.duration_minutes as i32);
                    record.expires_at = Some(activation.expires_at);
                    record.lat = Some(activation.lat);
                    record.lon = Some(activation.lon);
                    record.geohash = Some(activation.geohash.clone());
                    record.accuracy_meters = activation.accuracy_meters;
                    record.last_location_update = activation.started_at;
                    record.updated_at = activation.started_at;
                    ChangeEvent::Update
                }
                None => {
                    records.insert(
                        activation.user_id.clone(),
                        LocationStatusRecord {
                            user_id: activation.user_id.clone(),
                            is_visible: true,
                            visibility_duration: Some(activation.duration_minutes as i32),
                            expires_at: Some(activation.expires_at),
                            lat: Some(activation.lat),
                            lon: Some(activation.lon),
                            geohash: Some(activation.geohash.clone()),
                            accuracy_meters: activation.accuracy_meters,
                            last_location_update: activation.started_at,
                            created_at: activation.started_at,
                            updated_at: activation.started_at,
                        },
                    );
                    ChangeEvent::Insert
                }
            }
        };
        self.publish(event);
        Ok(())
    }

    async fn ping_location(&self, user_id: &str, ping: &LocationPing) -> Result<bool, StoreError> {
        self.check_available()?;

        let applied = {
            let mut records = self.records.write().await;
            match records.get_mut(user_id) {
                // Same condition as the SQL `WHERE is_visible = TRUE`: the
                // flag alone gates the update, expiry is not re-checked.
                Some(record) if record.is_visible => {
                    record.lat = Some(ping.lat);
                    record.lon = Some(ping.lon);
                    record.geohash = Some(ping.geohash.clone());
                    record.accuracy_meters = ping.accuracy_meters;
                    record.last_location_update = ping.at;
                    record.updated_at = ping.at;
                    true
                }
                _ => false,
            }
        };
        if applied {
            self.publish(ChangeEvent::Update);
        }
        Ok(applied)
    }

    async fn deactivate(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_available()?;

        let touched = {
            let mut records = self.records.write().await;
            match records.get_mut(user_id) {
                Some(record) => {
                    record.is_visible = false;
                    record.expires_at = None;
                    record.lat = None;
                    record.lon = None;
                    record.geohash = None;
                    record.accuracy_meters = None;
                    record.updated_at = at;
                    true
                }
                None => false,
            }
        };
        if touched {
            self.publish(ChangeEvent::Update);
        }
        Ok(())
    }

    async fn find_by_user_id(
        &self,
        user_id: &str,
    ) -> Result<Option<LocationStatusRecord>, StoreError> {
        self.check_available()?;
        Ok(self.records.read().await.get(user_id).cloned())
    }

    async fn list_visible(&self, now: DateTime<Utc>) -> Result<Vec<VisibleUser>, StoreError> {
        self.check_available()?;

        let records = self.records.read().await;
        let profiles = self.profiles.read().await;
        let vehicles = self.vehicles.read().await;

        let visible = records
            .values()
            .filter(|record| record.is_visible_at(now))
            .filter_map(|record| {
                let (lat, lon) = (record.lat?, record.lon?);
                let expires_at = record.expires_at?;
                // Inner join: users without a profile row do not appear.
                let nickname = profiles.get(&record.user_id)?.clone();
                let vehicle = vehicles
                    .get(&record.user_id)
                    .and_then(|list| list.iter().find(|v| v.is_primary).or_else(|| list.first()));
                Some(VisibleUser {
                    user_id: record.user_id.clone(),
                    lat,
                    lon,
                    nickname,
                    vehicle_brand: vehicle.map(|v| v.brand.clone()),
                    vehicle_model: vehicle.map(|v| v.model.clone()),
                    expires_at,
                })
            })
            .collect();

        Ok(visible)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}
