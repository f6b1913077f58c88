//! Group seed configuration.
//!
//! Groups listed in the config file are created, with their sensors, when
//! the service starts. Groups created over the API are not written back.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::group::SensorRef;

use super::validation::{ConfigError, invalid};

/// A group to create at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Group identifier.
    pub name: String,

    /// Sensors to attach, polled in this order.
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

/// A sensor attached to a seeded group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Sensor identifier, unique within its group.
    pub name: String,

    /// Base URL of the sensor's HTTP service.
    pub url: String,
}

impl SensorConfig {
    pub fn to_sensor_ref(&self) -> SensorRef {
        SensorRef::new(&self.name, &self.url)
    }
}

impl GroupConfig {
    /// Validate the group and its sensors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(invalid("group name cannot be empty"));
        }

        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            if sensor.name.trim().is_empty() {
                return Err(invalid(format!(
                    "group '{}': sensor name cannot be empty",
                    self.name
                )));
            }
            if !seen.insert(&sensor.name) {
                return Err(invalid(format!(
                    "group '{}': duplicate sensor name: '{}'",
                    self.name, sensor.name
                )));
            }
            validate_sensor_url(&sensor.url).map_err(|e| {
                invalid(format!(
                    "group '{}': sensor '{}': {}",
                    self.name, sensor.name, e
                ))
            })?;
        }
        Ok(())
    }
}

/// Validate a list of groups, names must be unique.
pub fn validate_groups(groups: &[GroupConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for group in groups {
        group.validate()?;
        if !seen.insert(&group.name) {
            return Err(invalid(format!(
                "duplicate group name: '{}'",
                group.name
            )));
        }
    }
    Ok(())
}

/// Check that a sensor base URL is an absolute http(s) URL.
pub fn validate_sensor_url(raw: &str) -> Result<url::Url, String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("invalid url '{raw}': {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(format!("unsupported url scheme '{other}'")),
    }
}
