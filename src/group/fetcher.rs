//! HTTP sensor fetcher.
//!
//! Issues one `GET <endpoint>/api/sensor/<id>/data` per sensor and decodes the
//! JSON array of readings. Every request is bounded by the configured timeout.

use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::time::timeout;

use super::sensor::{Reading, SensorRef};
use super::traits::{FetchError, Fetcher};

/// Default request timeout (5 seconds).
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFetcherConfig {
    /// Upper bound for one fetch, connect and body read included (default: 5s).
    pub timeout: Duration,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl HttpFetcherConfig {
    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Stateless HTTP fetcher shared by every group.
pub struct HttpFetcher {
    config: HttpFetcherConfig,
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the given configuration.
    ///
    /// # Errors
    /// Returns `FetchError::Network` if the HTTP client cannot be built.
    pub fn new(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &HttpFetcherConfig {
        &self.config
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, sensor: &SensorRef) -> Result<Vec<Reading>, FetchError> {
        let fetch_timeout = self.config.timeout;
        let url = sensor.data_url();

        let request = self.client.get(&url);

        let start = Instant::now();
        let response = match timeout(fetch_timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(FetchError::Timeout(fetch_timeout)),
            Ok(Err(e)) => return Err(FetchError::Network(e.to_string())),
            Err(_) => return Err(FetchError::Timeout(fetch_timeout)),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!(
                "unexpected status {}",
                status.as_u16()
            )));
        }

        let remaining = fetch_timeout.saturating_sub(start.elapsed());
        let body = match timeout(remaining, response.bytes()).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) if e.is_timeout() => return Err(FetchError::Timeout(fetch_timeout)),
            Ok(Err(e)) => return Err(FetchError::Network(e.to_string())),
            Err(_) => return Err(FetchError::Timeout(fetch_timeout)),
        };

        let readings: Vec<Reading> =
            serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))?;

        tracing::debug!(
            sensor = %sensor.id(),
            url = %url,
            count = readings.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Sensor fetch succeeded"
        );

        Ok(readings)
    }
}
