//! Device location and city-id resolution
//!
//! `LocationSource` abstracts the device geolocation subsystem: a cheap
//! last-known fix plus an active single-shot acquisition. The resolver
//! turns free text or coordinates into a provider city id, falling back
//! to the last successfully resolved id when the caller tolerates stale
//! answers.

use crate::cache::WeatherStore;
use crate::error::WeatherError;
use crate::providers::WeatherProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// A device position fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters
    pub accuracy_meters: f32,
    /// When the fix was taken
    pub acquired_at: DateTime<Utc>,
}

impl LocationFix {
    /// Age of the fix relative to now
    #[must_use]
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.acquired_at
    }

    /// Whether the fix is precise and recent enough to trust. A fix
    /// outside either threshold is discarded and a fresh one requested
    /// instead.
    #[must_use]
    pub fn is_usable(&self, max_accuracy_meters: f32, max_age: Duration) -> bool {
        if self.accuracy_meters > max_accuracy_meters {
            return false;
        }
        match chrono::Duration::from_std(max_age) {
            Ok(max_age) => self.age() <= max_age,
            Err(_) => false,
        }
    }
}

/// Seam over the device geolocation subsystem. Network and passive
/// sources are preferred over GPS by the implementation behind this
/// trait; callers only see fixes.
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// The most recent fix already known to the device, if any. Cheap,
    /// never triggers hardware.
    async fn last_known(&self) -> Result<Option<LocationFix>, WeatherError>;

    /// Actively acquire a fresh single-shot fix. May pend indefinitely;
    /// the caller bounds it with a timeout and dropping the future
    /// releases the underlying listener.
    async fn acquire(&self) -> Result<LocationFix, WeatherError>;
}

/// Resolves free text or coordinates to a provider city id, with a
/// persisted last-known-good fallback.
pub struct LocationResolver {
    provider: Arc<dyn WeatherProvider>,
    store: Arc<WeatherStore>,
}

impl LocationResolver {
    pub fn new(provider: Arc<dyn WeatherProvider>, store: Arc<WeatherStore>) -> Self {
        Self { provider, store }
    }

    /// Resolve a free-text location to a city id.
    ///
    /// `cached_ok` controls what a failed lookup means: scheduled
    /// background refreshes pass `true` and accept the last id that ever
    /// resolved, while explicit "check this address" actions pass
    /// `false` because the user wants to know resolution failed.
    #[instrument(skip(self), fields(cached_ok))]
    pub async fn resolve_free_text(
        &self,
        text: &str,
        cached_ok: bool,
    ) -> Result<Option<String>, WeatherError> {
        if text.trim().is_empty() {
            return Err(WeatherError::validation("Location cannot be empty"));
        }
        let lookup = self.provider.lookup_locations(text).await;
        self.pick_or_fall_back(lookup, cached_ok).await
    }

    /// Resolve device coordinates to a city id, with the same
    /// `cached_ok` fallback semantics as `resolve_free_text`.
    #[instrument(skip(self), fields(cached_ok))]
    pub async fn resolve_coordinates(
        &self,
        latitude: f64,
        longitude: f64,
        cached_ok: bool,
    ) -> Result<Option<String>, WeatherError> {
        let lookup = self
            .provider
            .lookup_coordinates(latitude, longitude)
            .await;
        self.pick_or_fall_back(lookup, cached_ok).await
    }

    async fn pick_or_fall_back(
        &self,
        lookup: Result<Vec<crate::models::WeatherLocation>, WeatherError>,
        cached_ok: bool,
    ) -> Result<Option<String>, WeatherError> {
        match lookup {
            Ok(candidates) if !candidates.is_empty() => {
                let city_id = candidates[0].city_id.clone();
                debug!("Resolved to city id '{}'", city_id);
                self.store.set_last_city_id(&city_id).await?;
                Ok(Some(city_id))
            }
            Ok(_) => {
                warn!("Location lookup returned no candidates");
                self.fall_back(cached_ok).await
            }
            Err(e) => {
                warn!("Location lookup failed: {}", e);
                self.fall_back(cached_ok).await
            }
        }
    }

    async fn fall_back(&self, cached_ok: bool) -> Result<Option<String>, WeatherError> {
        if !cached_ok {
            return Ok(None);
        }
        let cached = self.store.last_city_id().await?;
        if let Some(id) = &cached {
            info!("Falling back to last resolved city id '{}'", id);
        }
        Ok(cached)
    }
}
