//! Persistent weather cache
//!
//! A single-slot snapshot of the last successful fetch plus two small
//! auxiliary slots: the pinned custom location and the last successfully
//! resolved city id. The orchestrator's worker is the only writer; the
//! render path and the resolver only read. Records are versioned and the
//! decode is strict: any version or format mismatch loads as `None`,
//! never as a partially populated value.

use crate::error::WeatherError;
use crate::models::{WeatherInfo, WeatherLocation};
use chrono::{DateTime, Utc};
use fjall::Keyspace;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;
use tokio::task;
use tracing::debug;

const RECORD_VERSION: u32 = 1;

const WEATHER_KEY: &str = "weather";
const PINNED_LOCATION_KEY: &str = "pinned_location";
const LAST_CITY_ID_KEY: &str = "last_city_id";
const FIRST_UPDATE_KEY: &str = "first_update_done";

#[derive(Serialize, Deserialize)]
struct StoredRecord<T> {
    version: u32,
    value: T,
}

/// Snapshot of the last successful fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedWeather {
    pub weather: WeatherInfo,
    /// When the snapshot was stored
    pub updated_at: DateTime<Utc>,
}

impl CachedWeather {
    /// Age of the snapshot relative to now
    #[must_use]
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.updated_at
    }
}

/// Persistent store for weather snapshots and location state
pub struct WeatherStore {
    store: Keyspace,
}

fn get_from_store(store: Keyspace, key: Vec<u8>) -> Result<Option<Vec<u8>>, WeatherError> {
    let slice = store
        .get(key)
        .map_err(|e| WeatherError::cache(e.to_string()))?;
    Ok(slice.map(|v| v.to_vec()))
}

impl WeatherStore {
    /// Open (or create) the store at the given directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WeatherError> {
        let db = fjall::Database::builder(&path)
            .open()
            .map_err(|e| WeatherError::cache(format!("Failed to open cache database: {e}")))?;
        let items = db
            .keyspace("weather", fjall::KeyspaceCreateOptions::default)
            .map_err(|e| WeatherError::cache(e.to_string()))?;
        Ok(WeatherStore { store: items })
    }

    /// Store a weather snapshot, or clear it by passing `None` (used when
    /// switching providers, since snapshots are provider-specific).
    /// A successful store also latches the first-update flag.
    pub async fn store_weather(
        &self,
        timestamp: DateTime<Utc>,
        weather: Option<WeatherInfo>,
    ) -> Result<(), WeatherError> {
        match weather {
            Some(weather) => {
                let record = CachedWeather {
                    weather,
                    updated_at: timestamp,
                };
                self.put(WEATHER_KEY, record).await?;
                self.put(FIRST_UPDATE_KEY, true).await
            }
            None => {
                debug!("Clearing cached weather snapshot");
                self.remove(WEATHER_KEY).await
            }
        }
    }

    /// Load the cached snapshot. `None` when nothing has been stored,
    /// the snapshot was cleared, or the stored record does not decode.
    pub async fn load_weather(&self) -> Result<Option<CachedWeather>, WeatherError> {
        self.get(WEATHER_KEY).await
    }

    /// Whether at least one fetch ever succeeded. Distinguishes
    /// "never had data" from "had data, now stale or cleared".
    pub async fn first_update_done(&self) -> Result<bool, WeatherError> {
        Ok(self.get(FIRST_UPDATE_KEY).await?.unwrap_or(false))
    }

    /// Whether the snapshot is missing or older than the refresh interval
    pub async fn needs_update(&self, interval: Duration) -> Result<bool, WeatherError> {
        match self.load_weather().await? {
            Some(cached) => {
                let max_age = chrono::Duration::from_std(interval)
                    .map_err(|e| WeatherError::cache(e.to_string()))?;
                Ok(cached.age() > max_age)
            }
            None => Ok(true),
        }
    }

    /// Persist or clear the pinned custom location
    pub async fn set_pinned_location(
        &self,
        location: Option<WeatherLocation>,
    ) -> Result<(), WeatherError> {
        match location {
            Some(location) => self.put(PINNED_LOCATION_KEY, location).await,
            None => self.remove(PINNED_LOCATION_KEY).await,
        }
    }

    /// Load the pinned custom location, if any
    pub async fn pinned_location(&self) -> Result<Option<WeatherLocation>, WeatherError> {
        self.get(PINNED_LOCATION_KEY).await
    }

    /// Persist the last successfully resolved city id
    pub async fn set_last_city_id(&self, city_id: &str) -> Result<(), WeatherError> {
        self.put(LAST_CITY_ID_KEY, city_id.to_string()).await
    }

    /// Load the last successfully resolved city id, if any
    pub async fn last_city_id(&self) -> Result<Option<String>, WeatherError> {
        self.get(LAST_CITY_ID_KEY).await
    }

    async fn put<T: Serialize + Send + Debug + 'static>(
        &self,
        key: &str,
        value: T,
    ) -> Result<(), WeatherError> {
        let store = self.store.clone();
        let key = key.as_bytes().to_vec();
        let record = StoredRecord {
            version: RECORD_VERSION,
            value,
        };
        let bytes =
            postcard::to_stdvec(&record).map_err(|e| WeatherError::cache(e.to_string()))?;

        let _ = task::spawn_blocking(move || store.insert(key, bytes))
            .await
            .map_err(|e| WeatherError::cache(e.to_string()))?;
        Ok(())
    }

    async fn get<T: DeserializeOwned + Send + 'static>(
        &self,
        key: &str,
    ) -> Result<Option<T>, WeatherError> {
        let store = self.store.clone();
        let key_bytes = key.as_bytes().to_vec();

        let maybe_bytes: Option<Vec<u8>> =
            task::spawn_blocking(move || get_from_store(store, key_bytes))
                .await
                .map_err(|e| WeatherError::cache(e.to_string()))??;

        let Some(bytes) = maybe_bytes else {
            debug!("Key not found");
            return Ok(None);
        };

        // Strict decode: a record that does not parse, or parses with a
        // different version, reads back as "no data".
        match postcard::from_bytes::<StoredRecord<T>>(&bytes) {
            Ok(record) if record.version == RECORD_VERSION => Ok(Some(record.value)),
            Ok(record) => {
                debug!(
                    "Discarding cache record with version {} (expected {})",
                    record.version, RECORD_VERSION
                );
                Ok(None)
            }
            Err(e) => {
                debug!("Discarding undecodable cache record: {}", e);
                Ok(None)
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<(), WeatherError> {
        let key = key.as_bytes().to_vec();
        let store = self.store.clone();
        let _ = task::spawn_blocking(move || store.remove(key))
            .await
            .map_err(|e| WeatherError::cache(e.to_string()))?;
        Ok(())
    }
}
