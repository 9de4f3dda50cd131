//! Weather update orchestration
//!
//! A single worker task serializes all weather work. Refresh requests
//! arrive over a command channel; at most one is in flight at a time and
//! a second request while one runs is rejected, not queued. Outcomes are
//! published on a watch channel so renderers can redraw without polling.
//!
//! The request path is bounded by two timers: the weather request itself
//! and, when a device fix must be actively acquired first, a longer
//! location-fix timer. Dropping a timed-out future is the cancel path;
//! it abandons the transport request and releases the location listener.

use crate::cache::WeatherStore;
use crate::config::UpdateConfig;
use crate::error::WeatherError;
use crate::location::LocationSource;
use crate::models::WeatherInfo;
use crate::providers::{WeatherProvider, WeatherQuery};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

/// Why a refresh was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTrigger {
    /// User-initiated force refresh; always fetches
    Manual,
    /// Interval-driven background refresh; skipped while the cached
    /// snapshot is still fresh
    Scheduled,
}

/// Observable state of the update machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    RequestInFlight,
}

/// Terminal result of one refresh attempt
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// A snapshot is available. `stale` marks data served from the
    /// cache because the live fetch could not happen or failed.
    Completed { weather: WeatherInfo, stale: bool },
    /// No live data and nothing cached to fall back on
    Failed { reason: String },
    /// The provider never answered within the request timeout. The
    /// cache is left untouched.
    TimedOut,
}

/// Orchestration timing knobs, taken from the update configuration
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub request_timeout: std::time::Duration,
    pub location_fix_timeout: std::time::Duration,
    pub location_max_accuracy_meters: f32,
    pub location_max_age: std::time::Duration,
    pub interval: std::time::Duration,
    pub metric: bool,
}

impl OrchestratorSettings {
    pub fn from_config(update: &UpdateConfig, metric: bool) -> Self {
        Self {
            request_timeout: update.request_timeout(),
            location_fix_timeout: update.location_fix_timeout(),
            location_max_accuracy_meters: update.location_max_accuracy_meters as f32,
            location_max_age: update.location_max_age(),
            interval: update.interval(),
            metric,
        }
    }
}

enum Command {
    Refresh(UpdateTrigger),
}

/// Handle to the orchestrator worker
pub struct WeatherOrchestrator {
    commands: mpsc::Sender<Command>,
    in_flight: Arc<AtomicBool>,
    state_rx: watch::Receiver<UpdateState>,
    outcome_rx: watch::Receiver<Option<UpdateOutcome>>,
}

impl WeatherOrchestrator {
    /// Spawn the worker task and return a handle to it
    pub fn start(
        provider: Arc<dyn WeatherProvider>,
        store: Arc<WeatherStore>,
        location: Arc<dyn LocationSource>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(UpdateState::Idle);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let in_flight = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            provider,
            store,
            location,
            settings,
            in_flight: Arc::clone(&in_flight),
            state_tx,
            outcome_tx,
        };
        tokio::spawn(worker.run(command_rx));

        Self {
            commands,
            in_flight,
            state_rx,
            outcome_rx,
        }
    }

    /// Request a refresh. Rejected with `RefreshInFlight` while another
    /// one is running; the running attempt and the cache are unaffected
    /// by the rejection.
    pub async fn request_refresh(&self, trigger: UpdateTrigger) -> Result<(), WeatherError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Refresh rejected, one already in flight");
            return Err(WeatherError::RefreshInFlight);
        }

        if self.commands.send(Command::Refresh(trigger)).await.is_err() {
            self.in_flight.store(false, Ordering::Release);
            return Err(WeatherError::Cancelled);
        }
        Ok(())
    }

    /// Whether a refresh is currently in flight
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Current machine state
    #[must_use]
    pub fn state(&self) -> UpdateState {
        *self.state_rx.borrow()
    }

    /// Subscribe to refresh outcomes. The channel carries the latest
    /// terminal outcome, `None` until the first attempt finishes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<UpdateOutcome>> {
        self.outcome_rx.clone()
    }
}

struct Worker {
    provider: Arc<dyn WeatherProvider>,
    store: Arc<WeatherStore>,
    location: Arc<dyn LocationSource>,
    settings: OrchestratorSettings,
    in_flight: Arc<AtomicBool>,
    state_tx: watch::Sender<UpdateState>,
    outcome_tx: watch::Sender<Option<UpdateOutcome>>,
}

impl Worker {
    async fn run(self, mut commands: mpsc::Receiver<Command>) {
        info!("Weather orchestrator worker started");
        while let Some(command) = commands.recv().await {
            match command {
                Command::Refresh(trigger) => {
                    let _ = self.state_tx.send(UpdateState::RequestInFlight);
                    let outcome = self.run_refresh(trigger).await;
                    match &outcome {
                        UpdateOutcome::Completed { stale, .. } => {
                            info!("Refresh completed (stale: {})", stale);
                        }
                        UpdateOutcome::Failed { reason } => {
                            error!("Refresh failed: {}", reason);
                        }
                        UpdateOutcome::TimedOut => warn!("Refresh timed out"),
                    }
                    let _ = self.outcome_tx.send(Some(outcome));
                    let _ = self.state_tx.send(UpdateState::Idle);
                    self.in_flight.store(false, Ordering::Release);
                }
            }
        }
        debug!("Weather orchestrator worker stopped");
    }

    #[instrument(skip(self), fields(trigger = ?trigger))]
    async fn run_refresh(&self, trigger: UpdateTrigger) -> UpdateOutcome {
        if trigger == UpdateTrigger::Scheduled {
            match self.store.needs_update(self.settings.interval).await {
                Ok(false) => {
                    if let Ok(Some(cached)) = self.store.load_weather().await {
                        debug!("Cached snapshot still fresh, skipping scheduled fetch");
                        return UpdateOutcome::Completed {
                            weather: cached.weather,
                            stale: false,
                        };
                    }
                }
                Ok(true) => {}
                Err(e) => warn!("Could not check snapshot age: {}", e),
            }
        }

        let query = match self.determine_query().await {
            Some(query) => query,
            None => {
                // No location at all: stale cached data beats nothing
                return self
                    .fall_back_to_cache("No location available")
                    .await;
            }
        };

        let fetch = self.provider.fetch_weather(&query, self.settings.metric);
        match timeout(self.settings.request_timeout, fetch).await {
            Ok(Ok(weather)) => {
                if let Err(e) = self.store.store_weather(Utc::now(), Some(weather.clone())).await {
                    warn!("Could not persist weather snapshot: {}", e);
                }
                UpdateOutcome::Completed {
                    weather,
                    stale: false,
                }
            }
            Ok(Err(e)) => {
                warn!("Weather fetch failed: {}", e);
                self.fall_back_to_cache(&e.to_string()).await
            }
            Err(_) => {
                // Dropping the fetch future abandons the transport
                // request; the cache stays untouched
                UpdateOutcome::TimedOut
            }
        }
    }

    /// Pick the fetch target: the pinned location when one is
    /// configured, otherwise the best available device fix.
    async fn determine_query(&self) -> Option<WeatherQuery> {
        match self.store.pinned_location().await {
            Ok(Some(pinned)) => {
                debug!("Using pinned location '{}'", pinned.city);
                return Some(WeatherQuery::CityId(pinned.city_id));
            }
            Ok(None) => {}
            Err(e) => warn!("Could not read pinned location: {}", e),
        }

        match self.location.last_known().await {
            Ok(Some(fix))
                if fix.is_usable(
                    self.settings.location_max_accuracy_meters,
                    self.settings.location_max_age,
                ) =>
            {
                return Some(WeatherQuery::Coordinates {
                    latitude: fix.latitude,
                    longitude: fix.longitude,
                });
            }
            Ok(Some(_)) => debug!("Last known fix too coarse or too old, acquiring a fresh one"),
            Ok(None) => debug!("No last known fix, acquiring a fresh one"),
            Err(e) => warn!("Could not read last known fix: {}", e),
        }

        // Active acquisition under the (longer) location-fix timer.
        // Dropping the future on expiry releases the update listener.
        match timeout(self.settings.location_fix_timeout, self.location.acquire()).await {
            Ok(Ok(fix)) => Some(WeatherQuery::Coordinates {
                latitude: fix.latitude,
                longitude: fix.longitude,
            }),
            Ok(Err(e)) => {
                warn!("Location acquisition failed: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "No location fix within {:?}",
                    self.settings.location_fix_timeout
                );
                None
            }
        }
    }

    async fn fall_back_to_cache(&self, reason: &str) -> UpdateOutcome {
        match self.store.load_weather().await {
            Ok(Some(cached)) => {
                info!("Serving cached snapshot from {}", cached.updated_at);
                UpdateOutcome::Completed {
                    weather: cached.weather,
                    stale: true,
                }
            }
            Ok(None) => UpdateOutcome::Failed {
                reason: reason.to_string(),
            },
            Err(e) => UpdateOutcome::Failed {
                reason: format!("{reason}; cache read failed: {e}"),
            },
        }
    }
}
