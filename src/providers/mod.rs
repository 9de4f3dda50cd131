//! Weather providers
//!
//! Two upstream services sit behind the same small trait: the
//! Yahoo-flavored XML/YQL provider and the OpenWeatherMap JSON provider.
//! Each one composes the shared `Retriever` with its own response parser
//! and returns the normalized `WeatherInfo` model.

use crate::config::LockClockConfig;
use crate::error::WeatherError;
use crate::models::{WeatherInfo, WeatherLocation};
use crate::retriever::Retriever;
use async_trait::async_trait;
use std::sync::Arc;

pub mod openweathermap;
pub mod yahoo;

pub use openweathermap::OpenWeatherMapProvider;
pub use yahoo::YahooProvider;

/// Target of a weather fetch: a previously resolved city id, or raw
/// device coordinates the provider resolves itself.
#[derive(Debug, Clone, PartialEq)]
pub enum WeatherQuery {
    CityId(String),
    Coordinates { latitude: f64, longitude: f64 },
}

/// Common surface of both weather providers.
///
/// Disambiguation of multi-candidate lookups is not resolved here; all
/// candidates are returned and the caller picks one.
#[async_trait]
pub trait WeatherProvider: Send + Sync {
    /// Provider name for logging and configuration
    fn name(&self) -> &'static str;

    /// Search for places matching a free-text query
    async fn lookup_locations(&self, query: &str)
        -> Result<Vec<WeatherLocation>, WeatherError>;

    /// Look up the place(s) at a coordinate pair
    async fn lookup_coordinates(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<WeatherLocation>, WeatherError>;

    /// Fetch current conditions and the multi-day forecast
    async fn fetch_weather(
        &self,
        query: &WeatherQuery,
        metric: bool,
    ) -> Result<WeatherInfo, WeatherError>;
}

/// Build the provider selected in the configuration
pub fn create_provider(
    config: &LockClockConfig,
    retriever: Arc<dyn Retriever>,
) -> Result<Arc<dyn WeatherProvider>, WeatherError> {
    match config.provider.active.as_str() {
        "yahoo" => Ok(Arc::new(YahooProvider::new(
            retriever,
            &config.provider.locale,
        ))),
        "openweathermap" => {
            let api_key = config
                .provider
                .api_key
                .clone()
                .ok_or_else(|| WeatherError::config("OpenWeatherMap requires an API key"))?;
            Ok(Arc::new(OpenWeatherMapProvider::new(
                retriever,
                api_key,
                &config.provider.locale,
            )))
        }
        other => Err(WeatherError::config(format!(
            "Unknown weather provider '{other}'"
        ))),
    }
}

/// Map a device locale to a provider language code using a fixed
/// prefix-match table, defaulting when unmapped. Longer prefixes must
/// come first in the table.
pub(crate) fn match_language(
    locale: &str,
    table: &[(&str, &str)],
    default: &'static str,
) -> String {
    for (prefix, code) in table {
        if locale.starts_with(prefix) {
            return (*code).to_string();
        }
    }
    default.to_string()
}
