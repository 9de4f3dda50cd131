//! Weather fetch, parse, cache and refresh pipeline.
//!
//! The flow runs orchestrator → location resolution → weather provider →
//! response parser → normalized `WeatherInfo` → persistent cache, with
//! observers notified on every outcome. Two providers (Yahoo and
//! OpenWeatherMap) sit behind one trait; everything downstream of the
//! parsers is provider-independent.

pub mod cache;
pub mod config;
pub mod error;
pub mod location;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod retriever;

pub use cache::{CachedWeather, WeatherStore};
pub use config::LockClockConfig;
pub use error::WeatherError;
pub use location::{LocationFix, LocationResolver, LocationSource};
pub use models::{DayForecast, WeatherInfo, WeatherLocation};
pub use orchestrator::{
    OrchestratorSettings, UpdateOutcome, UpdateState, UpdateTrigger, WeatherOrchestrator,
};
pub use providers::{WeatherProvider, WeatherQuery, create_provider};
pub use retriever::{HttpRetriever, Retriever};

/// Crate version, for logging and diagnostics
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, WeatherError>;
