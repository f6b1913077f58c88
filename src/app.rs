//! Service assembly: storage, fetcher, registry and router built from an
//! [`AppConfig`], plus orderly shutdown.

use std::sync::Arc;

use axum::Router;
use thiserror::Error;

use crate::config::{AppConfig, ConfigError, GroupConfig};
use crate::group::{
    FetchError, GroupRegistry, HttpFetcher, HttpFetcherConfig, ReadingSink, RegistryError,
};
use crate::server::{AppState, create_router};
use crate::storage::{
    Event, EventKind, EventSeverity, SYSTEM_EVENT_SOURCE, StorageBuilder, StorageError,
    StorageHandles,
};

/// Errors raised while assembling the service.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Fetcher(#[from] FetchError),

    #[error("failed to seed group: {0}")]
    Seed(#[from] RegistryError),
}

/// A running broker: storage writer and every group loop.
pub struct Broker {
    registry: Arc<GroupRegistry>,
    storage: StorageHandles,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Validate `config`, build storage, start the registry and create the
    /// configured groups.
    ///
    /// On error nothing is left running.
    pub async fn start(config: &AppConfig) -> Result<Self, BrokerError> {
        config.validate()?;
        Self::launch(config).await
    }

    async fn launch(config: &AppConfig) -> Result<Self, BrokerError> {
        let fetcher = HttpFetcher::new(
            HttpFetcherConfig::default().with_timeout(config.polling.fetch_timeout),
        )?;

        let storage = StorageBuilder::new(&config.database.url)
            .channel_capacity(config.database.channel_capacity)
            .batch_size(config.database.batch_size)
            .batch_flush_interval(config.database.batch_flush_interval)
            .build()
            .await?;

        let sink: Arc<dyn ReadingSink> = Arc::new(storage.writer.clone());
        let registry = GroupRegistry::new(Arc::new(fetcher), sink)
            .with_interval(config.polling.interval)
            .with_shutdown_timeout(config.polling.shutdown_timeout);

        let broker = Self {
            registry: Arc::new(registry),
            storage,
        };
        if let Err(e) = broker.seed(&config.groups).await {
            tracing::error!(error = %e, "Seeding groups failed, stopping service");
            broker.registry.shutdown().await;
            if let Err(storage_err) = broker.storage.shutdown().await {
                tracing::warn!(error = %storage_err, "Storage shutdown failed");
            }
            return Err(e.into());
        }
        broker.system_event("Service started");

        Ok(broker)
    }

    async fn seed(&self, groups: &[GroupConfig]) -> Result<(), RegistryError> {
        for group in groups {
            self.registry.create(&group.name).await?;
            for sensor in &group.sensors {
                self.registry
                    .add_sensor(&group.name, sensor.to_sensor_ref())
                    .await?;
            }
            tracing::info!(
                group = %group.name,
                sensors = group.sensors.len(),
                "Seeded group from config"
            );
        }
        Ok(())
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &StorageHandles {
        &self.storage
    }

    /// Axum router serving the API over this broker's state.
    pub fn router(&self) -> Router {
        create_router(AppState {
            registry: Arc::clone(&self.registry),
            reading_reader: self.storage.reading_reader.clone(),
            event_reader: self.storage.event_reader.clone(),
            pool: self.storage.pool.clone(),
        })
    }

    /// Stop every group, then flush and close storage.
    pub async fn shutdown(self) -> Result<(), StorageError> {
        self.system_event("Service stopping");

        tracing::info!("Shutting down groups...");
        self.registry.shutdown().await;

        tracing::info!("Shutting down storage...");
        self.storage.shutdown().await
    }

    fn system_event(&self, message: &str) {
        let event = Event::new(
            SYSTEM_EVENT_SOURCE,
            EventKind::System,
            EventSeverity::Info,
            message,
        )
        .with_payload("version", env!("CARGO_PKG_VERSION"));
        if let Err(e) = self.storage.writer.insert_event(event) {
            tracing::warn!(error = %e, "Failed to emit system event");
        }
    }
}
