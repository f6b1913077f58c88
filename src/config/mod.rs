//! Configuration module for the broker.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Database settings (URL, writer channel and batching)
//! - Polling settings (interval, fetch and shutdown timeouts)
//! - Groups seeded at startup

mod app;
mod groups;
mod validation;

pub use app::{
    AppConfig, DEFAULT_DATABASE_URL, DEFAULT_PORT, DatabaseConfig, PollingConfig, ServerConfig,
};
pub use groups::{GroupConfig, SensorConfig, validate_groups, validate_sensor_url};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
