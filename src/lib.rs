//! Broker - Periodic Sensor Group Collection
//!
//! This crate polls named groups of remote sensors over HTTP on a fixed
//! interval and persists every cycle's readings. It can be used as a library,
//! or run as a standalone binary with the `broker` executable.
//!
//! # Architecture
//!
//! - **Group**: Sensor lists, the per-group collection loop, the HTTP fetcher
//!   and the registry owning every running group
//! - **Storage**: SQLite persistence for readings and events (sqlx)
//! - **Server**: JSON API for managing groups and querying readings
//! - **Config**: YAML configuration with validation
//!
//! # Example
//!
//! ```rust,no_run
//! use broker::{app::Broker, config::AppConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load("configs/config.yaml")?;
//!     let broker = Broker::start(&config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:1375").await?;
//!     axum::serve(listener, broker.router()).await?;
//!
//!     broker.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod group;
pub mod server;
pub mod storage;

pub use app::{Broker, BrokerError};
pub use group::{
    FetchError, Fetcher, Group, GroupError, GroupRegistry, HttpFetcher, Reading, ReadingSink,
    RegistryError, SensorRef,
};
pub use storage::{StorageHandles, StorageWriter};
