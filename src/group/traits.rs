//! Core group traits and types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

use super::sensor::{Reading, SensorRef};

/// Default polling interval between collection cycles (1 second).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum allowed polling interval (100 milliseconds).
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of a failed sensor fetch.
///
/// Fetch errors never leave a collection cycle: the group logs them, reports
/// them to its sink and treats the sensor as contributing no readings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection failed, the body could not be read, or the sensor answered
    /// with a non-success status.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within the fetch timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The body was read but is not a JSON array of reading objects.
    #[error("decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether the failure happened on the transport rather than the payload.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// Errors raised by group operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    /// A sensor with the same id is already part of the group.
    #[error("sensor '{0}' already exists in group")]
    DuplicateSensor(String),

    /// The collection loop was already started once.
    #[error("group '{0}' was already started")]
    AlreadyStarted(String),
}

/// Lifecycle transitions reported to a [`ReadingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Lifecycle {
    Created,
    Started,
    Stopped,
    Deleted,
}

/// Source of sensor readings.
///
/// Implementations must bound the time spent in `fetch`; a hanging fetch
/// stalls the whole group cycle.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Fetch the latest readings of one sensor.
    async fn fetch(&self, sensor: &SensorRef) -> Result<Vec<Reading>, FetchError>;
}

/// Destination of collected batches.
///
/// `deliver` is awaited by the collection loop once per cycle. The
/// `report_*` hooks are fire-and-forget and must not block.
#[async_trait::async_trait]
pub trait ReadingSink: Send + Sync + 'static {
    /// Receive the readings gathered by one cycle of `group`, in sensor order.
    ///
    /// `collected_at` is the time the cycle started, shared by every reading
    /// of the batch.
    async fn deliver(&self, group: &str, collected_at: DateTime<Utc>, readings: Vec<Reading>);

    /// A single sensor fetch failed during a cycle.
    fn report_failure(&self, _group: &str, _sensor: &SensorRef, _error: &FetchError) {}

    /// The group went through a lifecycle transition.
    fn report_lifecycle(&self, _group: &str, _change: Lifecycle) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_classification() {
        assert!(FetchError::Network("refused".into()).is_network());
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_network());
        assert!(!FetchError::Decode("expected array".into()).is_network());
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::Decode("invalid type".into());
        assert_eq!(err.to_string(), "decode error: invalid type");
    }

    #[test]
    fn test_lifecycle_as_str() {
        assert_eq!(Lifecycle::Created.as_ref(), "created");
        assert_eq!(Lifecycle::Deleted.to_string(), "deleted");
    }
}
