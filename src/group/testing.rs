//! Test doubles for fetchers and sinks.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;

use super::sensor::{Reading, SensorRef};
use super::traits::{FetchError, Fetcher, Lifecycle, ReadingSink};

pub(crate) fn reading(value: serde_json::Value) -> Reading {
    Reading::try_from(value).expect("reading must be a JSON object")
}

/// Fetcher answering from a table; unknown sensors return `[{"sensor": <id>}]`.
#[derive(Default)]
pub(crate) struct StubFetcher {
    responses: HashMap<String, Result<Vec<Reading>, FetchError>>,
    delays: HashMap<String, Duration>,
}

impl StubFetcher {
    pub(crate) fn respond(
        mut self,
        sensor: &str,
        response: Result<Vec<Reading>, FetchError>,
    ) -> Self {
        self.responses.insert(sensor.to_string(), response);
        self
    }

    pub(crate) fn delay(mut self, sensor: &str, delay: Duration) -> Self {
        self.delays.insert(sensor.to_string(), delay);
        self
    }
}

#[async_trait::async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, sensor: &SensorRef) -> Result<Vec<Reading>, FetchError> {
        if let Some(delay) = self.delays.get(sensor.id()) {
            tokio::time::sleep(*delay).await;
        }
        match self.responses.get(sensor.id()) {
            Some(response) => response.clone(),
            None => Ok(vec![reading(json!({ "sensor": sensor.id() }))]),
        }
    }
}

/// Sink remembering everything it was handed.
#[derive(Default)]
pub(crate) struct RecordingSink {
    batches: Mutex<Vec<(String, Vec<Reading>)>>,
    collected_at: Mutex<Vec<DateTime<Utc>>>,
    failures: Mutex<Vec<(String, String, FetchError)>>,
    lifecycle: Mutex<Vec<(String, Lifecycle)>>,
}

impl RecordingSink {
    pub(crate) fn batches(&self) -> Vec<(String, Vec<Reading>)> {
        self.batches.lock().unwrap().clone()
    }

    pub(crate) fn collected_at(&self) -> Vec<DateTime<Utc>> {
        self.collected_at.lock().unwrap().clone()
    }

    pub(crate) fn failures(&self) -> Vec<(String, String, FetchError)> {
        self.failures.lock().unwrap().clone()
    }

    pub(crate) fn lifecycle(&self) -> Vec<(String, Lifecycle)> {
        self.lifecycle.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ReadingSink for RecordingSink {
    async fn deliver(&self, group: &str, collected_at: DateTime<Utc>, readings: Vec<Reading>) {
        self.collected_at.lock().unwrap().push(collected_at);
        self.batches
            .lock()
            .unwrap()
            .push((group.to_string(), readings));
    }

    fn report_failure(&self, group: &str, sensor: &SensorRef, error: &FetchError) {
        self.failures.lock().unwrap().push((
            group.to_string(),
            sensor.id().to_string(),
            error.clone(),
        ));
    }

    fn report_lifecycle(&self, group: &str, change: Lifecycle) {
        self.lifecycle
            .lock()
            .unwrap()
            .push((group.to_string(), change));
    }
}
