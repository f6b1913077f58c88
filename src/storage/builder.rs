//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and a handles struct for accessing all storage facades.

use std::path::PathBuf;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::storage::StorageError;
use crate::storage::actor::{DEFAULT_BATCH_FLUSH_INTERVAL, DEFAULT_BATCH_SIZE, DbActor};
use crate::storage::db::SqlitePool;
use crate::storage::schema::init_schema;
use crate::storage::{EventReader, ReadingReader, StorageWriter};

/// Default channel capacity for writer commands.
///
/// One command carries a whole cycle batch, so this covers
/// several minutes of polling for a few hundred groups.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Builder for constructing the storage layer.
#[derive(Debug, Clone)]
pub struct StorageBuilder {
    url: String,
    channel_capacity: usize,
    batch_size: usize,
    batch_flush_interval: Duration,
}

impl StorageBuilder {
    /// Create a new storage builder for a sqlx SQLite URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_flush_interval: DEFAULT_BATCH_FLUSH_INTERVAL,
        }
    }

    /// Set the channel capacity for writer commands.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the batch size for reading buffering.
    ///
    /// The writer flushes buffered readings when this threshold is reached.
    /// Default: 500 readings.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the batch flush interval for reading buffering.
    ///
    /// The writer flushes buffered readings after this duration, even if
    /// the batch size threshold hasn't been reached. Default: 1 second.
    pub fn batch_flush_interval(mut self, interval: Duration) -> Self {
        self.batch_flush_interval = interval;
        self
    }

    /// Build the storage layer and return handles.
    ///
    /// Connects, creates the schema, and spawns the writer task on the
    /// current runtime.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        // Create parent directory if it doesn't exist
        if let Some(path) = database_path(&self.url)
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let pool = SqlitePool::connect(&self.url).await?;
        init_schema(pool.inner()).await?;

        let (actor_handle, tx) = DbActor::spawn(
            pool.inner().clone(),
            self.channel_capacity,
            self.batch_size,
            self.batch_flush_interval,
        );

        tracing::info!(
            url = %self.url,
            channel_capacity = self.channel_capacity,
            batch_size = self.batch_size,
            "Storage initialized"
        );

        Ok(StorageHandles {
            writer: StorageWriter::new(tx),
            reading_reader: ReadingReader::new(pool.inner().clone()),
            event_reader: EventReader::new(pool.inner().clone()),
            pool,
            actor_handle,
        })
    }
}

/// Handles to all storage layer facades.
pub struct StorageHandles {
    /// Writer facade for readings and events.
    pub writer: StorageWriter,
    /// Facade for reading stored readings.
    pub reading_reader: ReadingReader,
    /// Facade for reading events.
    pub event_reader: EventReader,
    /// Shared connection pool (health checks).
    pub pool: SqlitePool,
    actor_handle: JoinHandle<()>,
}

impl std::fmt::Debug for StorageHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandles")
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

impl StorageHandles {
    /// Gracefully shutdown the storage layer.
    ///
    /// Sends the shutdown command, waits for the writer task to flush and
    /// finish, then closes the pool.
    pub async fn shutdown(self) -> Result<(), StorageError> {
        self.writer.shutdown().await?;
        self.actor_handle
            .await
            .map_err(|e| StorageError::Internal(format!("Failed to join writer task: {e}")))?;
        self.pool.close().await;
        Ok(())
    }
}

/// File path of a SQLite URL, `None` for in-memory databases.
fn database_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" || url.contains("mode=memory") {
        return None;
    }
    Some(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Reading;
    use crate::storage::ReadingQuery;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_storage_builder_persists_across_restarts() {
        let dir = tempdir().unwrap();
        let url = format!(
            "sqlite:{}?mode=rwc",
            dir.path().join("nested/dir/test.db").display()
        );

        // Phase 1: write and shut down
        {
            let handles = StorageBuilder::new(&url).build().await.unwrap();
            handles
                .writer
                .insert_readings(
                    "g1",
                    Utc::now(),
                    vec![Reading::try_from(json!({"v": 123})).unwrap()],
                )
                .unwrap();
            handles.shutdown().await.unwrap();
        }

        // Phase 2: reopen and read
        let handles = StorageBuilder::new(&url).build().await.unwrap();
        let results = handles
            .reading_reader
            .query(ReadingQuery::new("g1"))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].payload, json!({"v": 123}));

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_storage_builder_in_memory() {
        let handles = StorageBuilder::new("sqlite::memory:")
            .channel_capacity(10)
            .batch_size(2)
            .batch_flush_interval(Duration::from_millis(100))
            .build()
            .await
            .unwrap();
        handles.pool.ping().await.unwrap();
        handles.shutdown().await.unwrap();
    }

    #[test]
    fn test_database_path() {
        assert_eq!(
            database_path("sqlite:data/broker.db?mode=rwc"),
            Some(PathBuf::from("data/broker.db"))
        );
        assert_eq!(
            database_path("sqlite:///var/lib/broker.db"),
            Some(PathBuf::from("/var/lib/broker.db"))
        );
        assert_eq!(database_path("sqlite::memory:"), None);
        assert_eq!(database_path("sqlite:file:x?mode=memory"), None);
        assert_eq!(database_path("postgres://localhost/db"), None);
    }
}
