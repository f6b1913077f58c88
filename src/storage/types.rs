//! Core data types for the storage layer.
//!
//! - [`StoredReading`]: One persisted sensor reading, keyed by group
//! - [`Event`]: Structured record of fetch failures and group lifecycle
//! - [`EventKind`] / [`EventSeverity`]: Event classification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Event source tag used by the group registry.
pub const REGISTRY_EVENT_SOURCE: &str = "registry";

/// Event source tag for service start and stop.
pub const SYSTEM_EVENT_SOURCE: &str = "system";

/// Event source tag for a given group (`group.<id>`).
pub fn group_event_source(group: &str) -> String {
    format!("group.{group}")
}

/// A reading row stored in the `readings` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Auto-generated row identifier.
    pub id: i64,
    /// Group that collected the reading.
    pub group: String,
    /// Collection time of the cycle (UTC).
    pub ts: DateTime<Utc>,
    /// Reading as reported by the sensor.
    pub payload: serde_json::Value,
}

/// An event record stored in the `events` table.
///
/// Events capture per-sensor fetch failures and group lifecycle changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Auto-generated event identifier.
    pub id: Option<i64>,
    /// Event timestamp (UTC).
    pub ts: DateTime<Utc>,
    /// Event origin (e.g., "group.greenhouse", "registry").
    pub source: String,
    /// Event nature.
    pub kind: EventKind,
    /// Urgency.
    pub severity: EventSeverity,
    /// Short human-readable description.
    pub message: String,
    /// Context snapshot as JSON.
    pub payload: Option<serde_json::Value>,
}

impl Event {
    /// Create a new event stamped with the current time.
    pub fn new(
        source: impl Into<String>,
        kind: EventKind,
        severity: EventSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            ts: Utc::now(),
            source: source.into(),
            kind,
            severity,
            message: message.into(),
            payload: None,
        }
    }

    /// Add a key to the JSON payload.
    pub fn with_payload(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        let payload = self
            .payload
            .get_or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let serde_json::Value::Object(map) = payload {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}

/// Event kind classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventKind {
    /// A sensor fetch failed.
    Fetch,
    /// A group was created, started, stopped or deleted.
    Lifecycle,
    /// Internal service event (e.g., startup, shutdown).
    System,
}

/// Event severity classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventSeverity {
    Debug,
    Info,
    Warn,
    Error,
}
