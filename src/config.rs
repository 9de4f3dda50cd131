//! Configuration management for the weather pipeline
//!
//! Handles loading configuration from files, environment variables,
//! and provides validation for all configuration settings.

use crate::WeatherError;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure for the weather pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LockClockConfig {
    /// Weather provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Refresh and timeout settings
    #[serde(default)]
    pub update: UpdateConfig,
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Weather provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Active provider: "openweathermap" or "yahoo"
    #[serde(default = "default_provider")]
    pub active: String,
    /// API credential (required for OpenWeatherMap)
    pub api_key: Option<String>,
    /// Use metric units (Celsius, km/h)
    #[serde(default = "default_metric")]
    pub metric: bool,
    /// Device locale used for provider language negotiation (e.g. "de-DE")
    #[serde(default = "default_locale")]
    pub locale: String,
}

/// Refresh scheduling, timeout and location-staleness settings.
///
/// The timeout and staleness defaults are product-tuned values carried
/// over unchanged; they are configurable rather than derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// How long to wait for the weather request before cancelling it
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// How long to wait for a fresh device-location fix
    #[serde(default = "default_location_fix_timeout")]
    pub location_fix_timeout_secs: u64,
    /// A last-known fix with a larger accuracy radius is discarded
    #[serde(default = "default_location_max_accuracy")]
    pub location_max_accuracy_meters: f64,
    /// A last-known fix older than this is discarded
    #[serde(default = "default_location_max_age")]
    pub location_max_age_secs: u64,
    /// Interval between scheduled refreshes
    #[serde(default = "default_update_interval")]
    pub interval_minutes: u64,
}

/// Cache configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory location
    #[serde(default = "default_cache_location")]
    pub location: String,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (pretty or json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_provider() -> String {
    "openweathermap".to_string()
}

fn default_metric() -> bool {
    true
}

fn default_locale() -> String {
    "en".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_location_fix_timeout() -> u64 {
    300
}

fn default_location_max_accuracy() -> f64 {
    50_000.0
}

fn default_location_max_age() -> u64 {
    600
}

fn default_update_interval() -> u64 {
    60
}

fn default_cache_location() -> String {
    "~/.cache/lockclock".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            active: default_provider(),
            api_key: None,
            metric: default_metric(),
            locale: default_locale(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            location_fix_timeout_secs: default_location_fix_timeout(),
            location_max_accuracy_meters: default_location_max_accuracy(),
            location_max_age_secs: default_location_max_age(),
            interval_minutes: default_update_interval(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            location: default_cache_location(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl UpdateConfig {
    /// Weather request timeout as a `Duration`
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Location-fix timeout as a `Duration`
    #[must_use]
    pub fn location_fix_timeout(&self) -> Duration {
        Duration::from_secs(self.location_fix_timeout_secs)
    }

    /// Maximum accepted age of a last-known location fix
    #[must_use]
    pub fn location_max_age(&self) -> Duration {
        Duration::from_secs(self.location_max_age_secs)
    }

    /// Scheduled refresh interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

impl LockClockConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path(None)
    }

    /// Load configuration from specified path
    pub fn load_from_path(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder();

        let config_file = config_path.unwrap_or_else(|| {
            Self::get_config_path().unwrap_or_else(|| PathBuf::from("config.toml"))
        });

        if config_file.exists() {
            builder = builder.add_source(
                File::from(config_file.clone())
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // Environment variable overrides with LOCKCLOCK_ prefix
        builder = builder.add_source(
            Environment::with_prefix("LOCKCLOCK")
                .separator("_")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| "Failed to build configuration")?;

        let config: LockClockConfig = settings
            .try_deserialize()
            .with_context(|| "Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Get the default configuration file path
    #[must_use]
    pub fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lockclock").join("config.toml"))
    }

    /// Resolve the cache directory, expanding a leading "~"
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        let location = &self.cache.location;
        if let Some(rest) = location.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(location)
    }

    /// Validate all configuration settings
    pub fn validate(&self) -> Result<()> {
        self.validate_provider()?;
        self.validate_numeric_ranges()?;
        self.validate_string_values()?;
        Ok(())
    }

    /// Validate provider selection and credentials
    pub fn validate_provider(&self) -> Result<()> {
        match self.provider.active.as_str() {
            "yahoo" => {}
            "openweathermap" => {
                let Some(api_key) = &self.provider.api_key else {
                    return Err(WeatherError::config(
                        "OpenWeatherMap requires an API key. Set provider.api_key or switch to the yahoo provider."
                    ).into());
                };

                if api_key.is_empty() {
                    return Err(WeatherError::config(
                        "Weather API key cannot be empty if provided. Either remove it or provide a valid key."
                    ).into());
                }

                if api_key.len() < 8 {
                    return Err(WeatherError::config(
                        "Weather API key appears to be invalid (too short). Please check your API key."
                    ).into());
                }

                if api_key.len() > 100 {
                    return Err(WeatherError::config(
                        "Weather API key appears to be invalid (too long). Please check your API key."
                    ).into());
                }
            }
            other => {
                return Err(WeatherError::config(format!(
                    "Unknown weather provider '{other}'. Must be one of: openweathermap, yahoo"
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Validate numeric configuration ranges
    fn validate_numeric_ranges(&self) -> Result<()> {
        if self.update.request_timeout_secs == 0 || self.update.request_timeout_secs > 300 {
            return Err(WeatherError::config(
                "Request timeout must be between 1 and 300 seconds",
            )
            .into());
        }

        if self.update.location_fix_timeout_secs < self.update.request_timeout_secs {
            return Err(WeatherError::config(
                "Location-fix timeout cannot be shorter than the request timeout",
            )
            .into());
        }

        if self.update.location_fix_timeout_secs > 3600 {
            return Err(
                WeatherError::config("Location-fix timeout cannot exceed 3600 seconds").into(),
            );
        }

        if self.update.location_max_accuracy_meters <= 0.0 {
            return Err(
                WeatherError::config("Location accuracy threshold must be positive").into(),
            );
        }

        if self.update.interval_minutes < 15 || self.update.interval_minutes > 1440 {
            return Err(WeatherError::config(
                "Update interval must be between 15 minutes and 1 day",
            )
            .into());
        }

        Ok(())
    }

    /// Validate string configuration values
    fn validate_string_values(&self) -> Result<()> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(WeatherError::config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            ))
            .into());
        }

        let valid_log_formats = ["pretty", "json"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(WeatherError::config(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_log_formats.join(", ")
            ))
            .into());
        }

        if self.cache.location.is_empty() {
            return Err(WeatherError::config("Cache location cannot be empty").into());
        }

        Ok(())
    }

    /// Create configuration directory if it doesn't exist
    pub fn ensure_config_dir() -> Result<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            let lockclock_config_dir = config_dir.join("lockclock");
            std::fs::create_dir_all(&lockclock_config_dir).with_context(|| {
                format!(
                    "Failed to create config directory: {}",
                    lockclock_config_dir.display()
                )
            })?;
            Ok(lockclock_config_dir)
        } else {
            Err(WeatherError::config("Unable to determine config directory").into())
        }
    }
}
