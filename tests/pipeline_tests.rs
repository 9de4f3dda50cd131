//! End-to-end tests for the refresh pipeline: orchestrator state
//! machine, cache semantics and resolver fallback, with the provider
//! and the geolocation subsystem replaced by fakes.

use async_trait::async_trait;
use chrono::Utc;
use lockclock_weather::cache::WeatherStore;
use lockclock_weather::error::WeatherError;
use lockclock_weather::location::{LocationFix, LocationResolver, LocationSource};
use lockclock_weather::models::{TemperatureUnit, WeatherInfo, WeatherLocation, WindSpeedUnit};
use lockclock_weather::orchestrator::{
    OrchestratorSettings, UpdateOutcome, UpdateTrigger, WeatherOrchestrator,
};
use lockclock_weather::providers::{WeatherProvider, WeatherQuery};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn temp_store(name: &str) -> (WeatherStore, PathBuf) {
    let path = std::env::temp_dir().join(format!(
        "lockclock-test-{}-{name}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&path);
    let store = WeatherStore::open(&path).expect("open temp store");
    (store, path)
}

fn sample_weather(city: &str, temperature: f32) -> WeatherInfo {
    WeatherInfo {
        city_id: "2345".to_string(),
        city: city.to_string(),
        condition: "Sunny".to_string(),
        condition_code: 32,
        temperature,
        temperature_unit: TemperatureUnit::Celsius,
        low: 14.0,
        high: 24.0,
        humidity: 55.0,
        wind_speed: 10.0,
        wind_speed_unit: WindSpeedUnit::Kmh,
        wind_direction: 180.0,
        forecasts: Vec::new(),
        retrieved_at: Utc::now(),
    }
}

fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        request_timeout: Duration::from_millis(200),
        location_fix_timeout: Duration::from_millis(400),
        location_max_accuracy_meters: 50_000.0,
        location_max_age: Duration::from_secs(600),
        interval: Duration::from_secs(3600),
        metric: true,
    }
}

/// Always answers with a fixed snapshot
struct FixedProvider {
    weather: WeatherInfo,
}

#[async_trait]
impl WeatherProvider for FixedProvider {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn lookup_locations(&self, _query: &str) -> Result<Vec<WeatherLocation>, WeatherError> {
        Ok(vec![WeatherLocation {
            city_id: self.weather.city_id.clone(),
            city: self.weather.city.clone(),
            postal: None,
            country_id: "US".to_string(),
            country: "United States".to_string(),
            state: None,
        }])
    }

    async fn lookup_coordinates(
        &self,
        _latitude: f64,
        _longitude: f64,
    ) -> Result<Vec<WeatherLocation>, WeatherError> {
        self.lookup_locations("").await
    }

    async fn fetch_weather(
        &self,
        _query: &WeatherQuery,
        _metric: bool,
    ) -> Result<WeatherInfo, WeatherError> {
        Ok(self.weather.clone())
    }
}

/// Never answers; stands in for a server that never responds
struct PendingProvider;

#[async_trait]
impl WeatherProvider for PendingProvider {
    fn name(&self) -> &'static str {
        "pending"
    }

    async fn lookup_locations(&self, _query: &str) -> Result<Vec<WeatherLocation>, WeatherError> {
        futures::future::pending().await
    }

    async fn lookup_coordinates(
        &self,
        _latitude: f64,
        _longitude: f64,
    ) -> Result<Vec<WeatherLocation>, WeatherError> {
        futures::future::pending().await
    }

    async fn fetch_weather(
        &self,
        _query: &WeatherQuery,
        _metric: bool,
    ) -> Result<WeatherInfo, WeatherError> {
        futures::future::pending().await
    }
}

/// Every call fails at the transport layer
struct FailingProvider;

#[async_trait]
impl WeatherProvider for FailingProvider {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn lookup_locations(&self, _query: &str) -> Result<Vec<WeatherLocation>, WeatherError> {
        Err(WeatherError::transport("connection refused"))
    }

    async fn lookup_coordinates(
        &self,
        _latitude: f64,
        _longitude: f64,
    ) -> Result<Vec<WeatherLocation>, WeatherError> {
        Err(WeatherError::transport("connection refused"))
    }

    async fn fetch_weather(
        &self,
        _query: &WeatherQuery,
        _metric: bool,
    ) -> Result<WeatherInfo, WeatherError> {
        Err(WeatherError::transport("connection refused"))
    }
}

/// Device with a fresh, accurate fix available
struct FixedLocation;

#[async_trait]
impl LocationSource for FixedLocation {
    async fn last_known(&self) -> Result<Option<LocationFix>, WeatherError> {
        Ok(Some(LocationFix {
            latitude: 39.78,
            longitude: -89.64,
            accuracy_meters: 500.0,
            acquired_at: Utc::now(),
        }))
    }

    async fn acquire(&self) -> Result<LocationFix, WeatherError> {
        self.last_known().await.map(|fix| fix.expect("fix"))
    }
}

/// Device with no geolocation at all
struct NoLocation;

#[async_trait]
impl LocationSource for NoLocation {
    async fn last_known(&self) -> Result<Option<LocationFix>, WeatherError> {
        Ok(None)
    }

    async fn acquire(&self) -> Result<LocationFix, WeatherError> {
        Err(WeatherError::location_unavailable("no subsystem"))
    }
}

async fn wait_for_outcome(orchestrator: &WeatherOrchestrator) -> UpdateOutcome {
    let mut outcomes = orchestrator.subscribe();
    outcomes
        .wait_for(Option::is_some)
        .await
        .expect("worker alive");
    let outcome = outcomes.borrow().clone();
    outcome.expect("terminal outcome")
}

fn assert_f32_eq(a: f32, b: f32) {
    assert!(
        (a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-4,
        "{a} != {b}"
    );
}

#[tokio::test]
async fn completed_refresh_writes_cache() {
    let (store, _path) = temp_store("completed");
    let store = Arc::new(store);
    let orchestrator = WeatherOrchestrator::start(
        Arc::new(FixedProvider {
            weather: sample_weather("Springfield", 20.0),
        }),
        Arc::clone(&store),
        Arc::new(FixedLocation),
        test_settings(),
    );

    orchestrator
        .request_refresh(UpdateTrigger::Manual)
        .await
        .expect("refresh accepted");

    match wait_for_outcome(&orchestrator).await {
        UpdateOutcome::Completed { weather, stale } => {
            assert!(!stale);
            assert_eq!(weather.city, "Springfield");
        }
        other => panic!("expected Completed, got {other:?}"),
    }

    let cached = store.load_weather().await.expect("read").expect("populated");
    assert_eq!(cached.weather.city, "Springfield");
    assert!(store.first_update_done().await.expect("read"));
    assert!(!orchestrator.is_processing());
}

#[tokio::test]
async fn timeout_reports_timed_out_and_leaves_cache_untouched() {
    let (store, _path) = temp_store("timeout");
    let store = Arc::new(store);
    let orchestrator = WeatherOrchestrator::start(
        Arc::new(PendingProvider),
        Arc::clone(&store),
        Arc::new(FixedLocation),
        test_settings(),
    );

    orchestrator
        .request_refresh(UpdateTrigger::Manual)
        .await
        .expect("refresh accepted");

    assert!(matches!(
        wait_for_outcome(&orchestrator).await,
        UpdateOutcome::TimedOut
    ));
    assert!(store.load_weather().await.expect("read").is_none());
    assert!(!store.first_update_done().await.expect("read"));
}

#[tokio::test]
async fn second_refresh_while_in_flight_is_rejected() {
    let (store, _path) = temp_store("in-flight");
    let orchestrator = WeatherOrchestrator::start(
        Arc::new(PendingProvider),
        Arc::new(store),
        Arc::new(FixedLocation),
        OrchestratorSettings {
            request_timeout: Duration::from_secs(5),
            ..test_settings()
        },
    );

    orchestrator
        .request_refresh(UpdateTrigger::Manual)
        .await
        .expect("first refresh accepted");

    let second = orchestrator.request_refresh(UpdateTrigger::Manual).await;
    assert!(matches!(second, Err(WeatherError::RefreshInFlight)));
    assert!(orchestrator.is_processing());
}

#[tokio::test]
async fn resolver_falls_back_to_cached_id_only_when_allowed() {
    let (store, _path) = temp_store("resolver");
    let store = Arc::new(store);
    store.set_last_city_id("2345").await.expect("seed id");

    let resolver = LocationResolver::new(Arc::new(FailingProvider), Arc::clone(&store));

    let background = resolver
        .resolve_free_text("Springfield", true)
        .await
        .expect("resolve");
    assert_eq!(background.as_deref(), Some("2345"));

    let explicit = resolver
        .resolve_free_text("Springfield", false)
        .await
        .expect("resolve");
    assert_eq!(explicit, None);

    let coords = resolver
        .resolve_coordinates(39.78, -89.64, true)
        .await
        .expect("resolve");
    assert_eq!(coords.as_deref(), Some("2345"));
}

#[tokio::test]
async fn resolver_persists_newly_resolved_id() {
    let (store, _path) = temp_store("resolver-persist");
    let store = Arc::new(store);
    let resolver = LocationResolver::new(
        Arc::new(FixedProvider {
            weather: sample_weather("Springfield", 20.0),
        }),
        Arc::clone(&store),
    );

    let resolved = resolver
        .resolve_free_text("Springfield", false)
        .await
        .expect("resolve");
    assert_eq!(resolved.as_deref(), Some("2345"));
    assert_eq!(
        store.last_city_id().await.expect("read").as_deref(),
        Some("2345")
    );
}

#[tokio::test]
async fn provider_switch_clears_snapshot_but_not_first_update_flag() {
    let (store, _path) = temp_store("clear");

    store
        .store_weather(Utc::now(), Some(sample_weather("Springfield", 20.0)))
        .await
        .expect("store");
    assert!(store.load_weather().await.expect("read").is_some());

    store.store_weather(Utc::now(), None).await.expect("clear");
    assert!(store.load_weather().await.expect("read").is_none());
    // "succeeded once" is a separate fact from "has data right now"
    assert!(store.first_update_done().await.expect("read"));
}

#[tokio::test]
async fn snapshot_round_trips_with_nan_fields() {
    let (store, _path) = temp_store("round-trip");

    let mut weather = sample_weather("Springfield", 20.0);
    weather.humidity = f32::NAN;
    weather.wind_speed = f32::NAN;
    weather.wind_direction = f32::NAN;
    weather.forecasts = vec![
        lockclock_weather::models::DayForecast {
            low: f32::NAN,
            high: 21.0,
            condition_code: 30,
            condition: Some("Partly Cloudy".to_string()),
        },
        lockclock_weather::models::DayForecast {
            low: 12.0,
            high: 19.0,
            condition_code: -1,
            condition: None,
        },
    ];

    store
        .store_weather(Utc::now(), Some(weather.clone()))
        .await
        .expect("store");
    let loaded = store
        .load_weather()
        .await
        .expect("read")
        .expect("populated")
        .weather;

    assert_eq!(loaded.city_id, weather.city_id);
    assert_eq!(loaded.city, weather.city);
    assert_eq!(loaded.condition_code, weather.condition_code);
    assert_f32_eq(loaded.temperature, weather.temperature);
    assert_f32_eq(loaded.humidity, weather.humidity);
    assert_f32_eq(loaded.wind_speed, weather.wind_speed);
    assert_f32_eq(loaded.wind_direction, weather.wind_direction);
    assert_eq!(loaded.forecasts.len(), 2);
    assert_f32_eq(loaded.forecasts[0].low, f32::NAN);
    assert_f32_eq(loaded.forecasts[0].high, 21.0);
    assert_eq!(loaded.forecasts[1].condition, None);
}

#[tokio::test]
async fn no_location_serves_stale_cache() {
    let (store, _path) = temp_store("stale-fallback");
    let store = Arc::new(store);
    store
        .store_weather(Utc::now(), Some(sample_weather("Springfield", 20.0)))
        .await
        .expect("seed cache");

    let orchestrator = WeatherOrchestrator::start(
        Arc::new(FixedProvider {
            weather: sample_weather("Elsewhere", 30.0),
        }),
        Arc::clone(&store),
        Arc::new(NoLocation),
        test_settings(),
    );

    orchestrator
        .request_refresh(UpdateTrigger::Manual)
        .await
        .expect("refresh accepted");

    match wait_for_outcome(&orchestrator).await {
        UpdateOutcome::Completed { weather, stale } => {
            assert!(stale);
            assert_eq!(weather.city, "Springfield");
        }
        other => panic!("expected stale Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn no_location_and_empty_cache_fails() {
    let (store, _path) = temp_store("hard-failure");
    let orchestrator = WeatherOrchestrator::start(
        Arc::new(FixedProvider {
            weather: sample_weather("Elsewhere", 30.0),
        }),
        Arc::new(store),
        Arc::new(NoLocation),
        test_settings(),
    );

    orchestrator
        .request_refresh(UpdateTrigger::Manual)
        .await
        .expect("refresh accepted");

    assert!(matches!(
        wait_for_outcome(&orchestrator).await,
        UpdateOutcome::Failed { .. }
    ));
}

#[tokio::test]
async fn transport_failure_serves_stale_cache() {
    let (store, _path) = temp_store("transport-fallback");
    let store = Arc::new(store);
    store
        .store_weather(Utc::now(), Some(sample_weather("Springfield", 20.0)))
        .await
        .expect("seed cache");
    // age the snapshot past the refresh interval check
    let orchestrator = WeatherOrchestrator::start(
        Arc::new(FailingProvider),
        Arc::clone(&store),
        Arc::new(FixedLocation),
        test_settings(),
    );

    orchestrator
        .request_refresh(UpdateTrigger::Manual)
        .await
        .expect("refresh accepted");

    match wait_for_outcome(&orchestrator).await {
        UpdateOutcome::Completed { weather, stale } => {
            assert!(stale);
            assert_eq!(weather.city, "Springfield");
        }
        other => panic!("expected stale Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn pinned_location_bypasses_device_location() {
    let (store, _path) = temp_store("pinned");
    let store = Arc::new(store);
    store
        .set_pinned_location(Some(WeatherLocation {
            city_id: "2345".to_string(),
            city: "Springfield".to_string(),
            postal: None,
            country_id: "US".to_string(),
            country: "United States".to_string(),
            state: Some("Illinois".to_string()),
        }))
        .await
        .expect("pin");

    // NoLocation would force the stale-cache path if the pin were ignored
    let orchestrator = WeatherOrchestrator::start(
        Arc::new(FixedProvider {
            weather: sample_weather("Springfield", 22.0),
        }),
        Arc::clone(&store),
        Arc::new(NoLocation),
        test_settings(),
    );

    orchestrator
        .request_refresh(UpdateTrigger::Manual)
        .await
        .expect("refresh accepted");

    match wait_for_outcome(&orchestrator).await {
        UpdateOutcome::Completed { weather, stale } => {
            assert!(!stale);
            assert_f32_eq(weather.temperature, 22.0);
        }
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn scheduled_refresh_skips_while_snapshot_fresh() {
    let (store, _path) = temp_store("scheduled");
    let store = Arc::new(store);
    store
        .store_weather(Utc::now(), Some(sample_weather("Springfield", 20.0)))
        .await
        .expect("seed cache");

    // A fetch would return a different snapshot; a skip returns the cached one
    let orchestrator = WeatherOrchestrator::start(
        Arc::new(FixedProvider {
            weather: sample_weather("Elsewhere", 30.0),
        }),
        Arc::clone(&store),
        Arc::new(FixedLocation),
        test_settings(),
    );

    orchestrator
        .request_refresh(UpdateTrigger::Scheduled)
        .await
        .expect("refresh accepted");

    match wait_for_outcome(&orchestrator).await {
        UpdateOutcome::Completed { weather, stale } => {
            assert!(!stale);
            assert_eq!(weather.city, "Springfield");
        }
        other => panic!("expected Completed, got {other:?}"),
    }
}
