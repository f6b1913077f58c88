//! Application configuration structures.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::group::{DEFAULT_FETCH_TIMEOUT, DEFAULT_INTERVAL, DEFAULT_SHUTDOWN_TIMEOUT, MIN_INTERVAL};
use crate::storage::{DEFAULT_BATCH_FLUSH_INTERVAL, DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL_CAPACITY};

use super::groups::{GroupConfig, validate_groups};
use super::validation::{ConfigError, expand_env_vars, invalid};

// =============================================================================
// Constants
// =============================================================================

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 1375;

/// Default database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:data/broker.db?mode=rwc";

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 1375).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL. `${VAR:-default}` placeholders are expanded on load.
    pub url: String,

    /// MPSC channel capacity for write operations (default: 10000).
    pub channel_capacity: usize,

    /// Readings buffered before a batch insert (default: 500).
    pub batch_size: usize,

    /// Maximum age of buffered readings (default: 1s).
    #[serde(with = "humantime_serde")]
    pub batch_flush_interval: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_flush_interval: DEFAULT_BATCH_FLUSH_INTERVAL,
        }
    }
}

// =============================================================================
// Polling Configuration
// =============================================================================

/// Group polling configuration, shared by every group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Cycle interval (default: 1s, minimum: 100ms).
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Upper bound on a single sensor fetch (default: 5s).
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// How long a delete or shutdown waits for a group loop (default: 5s).
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Web server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Polling configuration.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Groups created at startup.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.database.url = expand_env_vars(&config.database.url);
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server bind address
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            invalid(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        // Validate server port
        if self.server.port == 0 {
            return Err(invalid("server port must be non-zero"));
        }

        if self.database.url.trim().is_empty() {
            return Err(invalid("database url cannot be empty"));
        }
        if self.database.channel_capacity == 0 {
            return Err(invalid("database channel_capacity must be positive"));
        }
        if self.database.batch_size == 0 {
            return Err(invalid("database batch_size must be positive"));
        }
        if self.database.batch_flush_interval.is_zero() {
            return Err(invalid("database batch_flush_interval must be positive"));
        }

        if self.polling.interval < MIN_INTERVAL {
            return Err(invalid(format!(
                "polling interval must be at least {}",
                humantime::format_duration(MIN_INTERVAL)
            )));
        }
        if self.polling.fetch_timeout.is_zero() {
            return Err(invalid("polling fetch_timeout must be positive"));
        }

        validate_groups(&self.groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 1375);
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "sqlite:data/broker.db?mode=rwc");
        assert_eq!(config.channel_capacity, 10_000);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.batch_flush_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.polling.interval, Duration::from_secs(1));
        assert_eq!(config.polling.fetch_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
server:
  bind: "127.0.0.1"
  port: 8080
database:
  url: "sqlite:${BROKER_APP_TEST_UNSET_DIR:-/tmp}/broker.db?mode=rwc"
  batch_size: 50
  batch_flush_interval: 250ms
polling:
  interval: 2s
  fetch_timeout: 1500ms
groups:
  - name: greenhouse
    sensors:
      - name: a
        url: "http://10.0.0.5:8000"
      - name: b
        url: "http://10.0.0.6:8000"
  - name: cellar
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.url, "sqlite:/tmp/broker.db?mode=rwc");
        assert_eq!(config.database.batch_size, 50);
        assert_eq!(config.database.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(
            config.database.batch_flush_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.polling.interval, Duration::from_secs(2));
        assert_eq!(config.polling.fetch_timeout, Duration::from_millis(1500));
        assert_eq!(config.polling.shutdown_timeout, DEFAULT_SHUTDOWN_TIMEOUT);
        assert_eq!(config.groups.len(), 2);
        assert_eq!(config.groups[0].sensors[1].name, "b");
        assert!(config.groups[1].sensors.is_empty());
    }

    #[test]
    fn test_config_validation_invalid_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind = "not-an-ip".to_string();

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("invalid server bind address")
        );
    }

    #[test]
    fn test_config_validation_interval_too_short() {
        let err = AppConfig::from_yaml("polling:\n  interval: 10ms\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("polling interval"));
    }

    #[test]
    fn test_config_validation_zero_capacity() {
        let err = AppConfig::from_yaml("database:\n  channel_capacity: 0\n").unwrap_err();
        assert!(err.to_string().contains("channel_capacity"));
    }

    #[test]
    fn test_config_bad_group_url() {
        let yaml = "groups:\n  - name: g1\n    sensors:\n      - name: a\n        url: nope\n";
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("sensor 'a'"));
    }

    #[test]
    fn test_config_parse_error() {
        let err = AppConfig::from_yaml("server: [").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_shipped_config() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/configs/config.yaml");
        let config = AppConfig::load(path).unwrap();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(config.database.url.ends_with("/broker.db?mode=rwc"));
        assert!(!config.database.url.contains("${"));
        assert!(config.groups.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load("/nonexistent/broker.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
