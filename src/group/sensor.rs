//! Sensor references and the readings they produce.

use serde::{Deserialize, Serialize};

/// Path template appended to a sensor endpoint to fetch its latest data.
const DATA_PATH_PREFIX: &str = "/api/sensor";

/// Immutable identification of one remote sensor endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorRef {
    /// Sensor identifier, unique within a group.
    id: String,
    /// Base URL of the sensor (e.g. `http://10.0.0.12:8080`).
    endpoint: String,
}

impl SensorRef {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Full URL of the sensor's data resource: `<endpoint>/api/sensor/<id>/data`.
    pub fn data_url(&self) -> String {
        format!(
            "{}{}/{}/data",
            self.endpoint.trim_end_matches('/'),
            DATA_PATH_PREFIX,
            self.id
        )
    }
}

impl std::fmt::Display for SensorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.endpoint)
    }
}

/// One data point reported by a sensor.
///
/// The schema belongs to the sensor; the broker only requires each reading
/// to be a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reading(serde_json::Map<String, serde_json::Value>);

impl Reading {
    pub fn new(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(fields)
    }

    /// Look up a single field of the reading.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        serde_json::Value::Object(self.0)
    }
}

impl TryFrom<serde_json::Value> for Reading {
    type Error = serde_json::Value;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }
}
