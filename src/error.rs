//! Error types and handling for the weather pipeline

use thiserror::Error;

/// Main error type for the weather pipeline
#[derive(Error, Debug)]
pub enum WeatherError {
    /// Transport-level failure (no response, connection error, bad status)
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Response was received but is malformed or semantically incomplete
    #[error("Malformed response: {message}")]
    Malformed { message: String },

    /// No device location could be obtained
    #[error("Location unavailable: {message}")]
    LocationUnavailable { message: String },

    /// The upstream request did not answer within the configured window
    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The request was cancelled before completion
    #[error("Request cancelled")]
    Cancelled,

    /// A refresh was requested while another one is still in flight
    #[error("A weather refresh is already in flight")]
    RefreshInFlight,

    /// Cache operation errors
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Input validation errors
    #[error("Invalid input: {message}")]
    Validation { message: String },

    /// I/O operation errors
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl WeatherError {
    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new malformed-response error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Create a new location-unavailable error
    pub fn location_unavailable<S: Into<String>>(message: S) -> Self {
        Self::LocationUnavailable {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    /// Create a new cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Get a user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            WeatherError::Transport { .. } => {
                "Unable to reach the weather service. Please check your internet connection."
                    .to_string()
            }
            WeatherError::Malformed { .. } => {
                "The weather service returned unusable data. Please try again later.".to_string()
            }
            WeatherError::LocationUnavailable { .. } => {
                "Your location could not be determined. Set a custom location or try again."
                    .to_string()
            }
            WeatherError::Timeout { seconds } => {
                format!("The weather service did not answer within {seconds} seconds.")
            }
            WeatherError::Cancelled => "The weather update was cancelled.".to_string(),
            WeatherError::RefreshInFlight => {
                "A weather update is already running. Please wait for it to finish.".to_string()
            }
            WeatherError::Cache { .. } => {
                "Cache operation failed. You may need to clear your cache.".to_string()
            }
            WeatherError::Config { .. } => {
                "Configuration error. Please check your config file and API keys.".to_string()
            }
            WeatherError::Validation { message } => {
                format!("Invalid input: {message}")
            }
            WeatherError::Io { .. } => {
                "File operation failed. Please check file permissions.".to_string()
            }
        }
    }
}
