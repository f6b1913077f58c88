//! [`ReadingSink`] implementation backed by the storage writer.
//!
//! Cycle batches become rows in `readings`; fetch failures and lifecycle
//! transitions become rows in `events`. Every write is fire-and-forget, a
//! full channel only bumps the writer's dropped counter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::group::{FetchError, Lifecycle, Reading, ReadingSink, SensorRef};
use crate::storage::StorageWriter;
use crate::storage::types::{
    Event, EventKind, EventSeverity, REGISTRY_EVENT_SOURCE, group_event_source,
};

#[async_trait]
impl ReadingSink for StorageWriter {
    async fn deliver(&self, group: &str, collected_at: DateTime<Utc>, readings: Vec<Reading>) {
        if readings.is_empty() {
            return;
        }
        let _ = self.insert_readings(group, collected_at, readings);
    }

    fn report_failure(&self, group: &str, sensor: &SensorRef, error: &FetchError) {
        let class = if error.is_network() { "network" } else { "decode" };
        let event = Event::new(
            group_event_source(group),
            EventKind::Fetch,
            EventSeverity::Warn,
            format!("Fetch from sensor '{}' failed", sensor.id()),
        )
        .with_payload("sensor", sensor.id())
        .with_payload("endpoint", sensor.endpoint())
        .with_payload("class", class)
        .with_payload("error", error.to_string());
        let _ = self.insert_event(event);
    }

    fn report_lifecycle(&self, group: &str, change: Lifecycle) {
        let source = match change {
            Lifecycle::Created | Lifecycle::Deleted => REGISTRY_EVENT_SOURCE.to_string(),
            Lifecycle::Started | Lifecycle::Stopped => group_event_source(group),
        };
        let event = Event::new(
            source,
            EventKind::Lifecycle,
            EventSeverity::Info,
            format!("Group '{group}' {change}"),
        )
        .with_payload("group", group)
        .with_payload("change", change.as_ref());
        let _ = self.insert_event(event);
    }
}
