//! HTTP retrieval for provider requests
//!
//! One GET, full body back. Retry policy deliberately does not live here:
//! the orchestrator decides when a request is re-issued, and a failed
//! retrieval surfaces as a transport error only.

use crate::error::WeatherError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

const USER_AGENT: &str = "LockClock/0.1.0";

/// Transport seam between providers and the network. Test doubles stand
/// in for the HTTP client behind this trait.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Perform a single GET against `url` and return the full textual
    /// response body. Blocks (asynchronously) until the response arrives
    /// or the client-level timeout fires.
    async fn retrieve(&self, url: &str) -> Result<String, WeatherError>;
}

/// Production retriever over a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpRetriever {
    client: Client,
    timeout_secs: u64,
}

impl HttpRetriever {
    /// Create a retriever with the given per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| WeatherError::transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    #[instrument(skip(self, url), fields(url = %redact_credentials(url)))]
    async fn retrieve(&self, url: &str) -> Result<String, WeatherError> {
        let start_time = Instant::now();
        debug!("Starting HTTP request");

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                WeatherError::timeout(self.timeout_secs)
            } else {
                WeatherError::transport(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("HTTP request failed with status {}", status);
            return Err(WeatherError::transport(format!(
                "Request failed with status: {} - {}",
                status,
                status.canonical_reason().unwrap_or("Unknown error")
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WeatherError::transport(format!("Failed to read response body: {e}")))?;

        let total_duration = start_time.elapsed();
        info!(
            "Retrieved {} bytes in {:.3}s",
            body.len(),
            total_duration.as_secs_f64()
        );

        if total_duration.as_secs() > 5 {
            warn!(
                "Slow API response detected: {:.3}s",
                total_duration.as_secs_f64()
            );
        }

        Ok(body)
    }
}

/// Strip API credentials from a URL before it reaches the logs
fn redact_credentials(url: &str) -> &str {
    url.split("appid=").next().unwrap_or(url)
}
