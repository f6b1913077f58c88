//! Group registry for managing group lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::poller::Group;
use super::sensor::SensorRef;
use super::traits::{DEFAULT_INTERVAL, Fetcher, GroupError, Lifecycle, ReadingSink};

/// Default time to wait for a group loop to exit (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced synchronously by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A group with this id is already registered.
    #[error("group '{0}' already exists")]
    AlreadyExists(String),

    /// No group with this id is registered.
    #[error("there is no group named '{0}'")]
    NotFound(String),

    /// Group ids must be non-empty.
    #[error("group id cannot be empty")]
    InvalidId,

    /// The group rejected the operation.
    #[error(transparent)]
    Group(#[from] GroupError),
}

struct GroupEntry {
    group: Arc<Group>,
    handle: JoinHandle<()>,
}

/// Keyed store of all active groups.
///
/// Every registered group has its collection loop running on a dedicated
/// Tokio task. Deleting a group stops that task before it is dropped.
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, GroupEntry>>,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn ReadingSink>,
    interval: Duration,
    shutdown_timeout: Duration,
}

impl GroupRegistry {
    /// Create an empty registry whose groups share `fetcher` and `sink`.
    pub fn new(fetcher: Arc<dyn Fetcher>, sink: Arc<dyn ReadingSink>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            fetcher,
            sink,
            interval: DEFAULT_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the polling interval of groups created from now on.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set how long `delete` and `shutdown` wait for a loop to exit.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupRegistry")
            .field(
                "group_count",
                &self.groups.try_read().map(|g| g.len()).unwrap_or(0),
            )
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl GroupRegistry {
    /// Register a new group and start its collection loop.
    ///
    /// # Errors
    /// `AlreadyExists` if the id is taken, `InvalidId` if it is empty.
    pub async fn create(&self, id: &str) -> Result<Arc<Group>, RegistryError> {
        if id.trim().is_empty() {
            return Err(RegistryError::InvalidId);
        }

        let mut groups = self.groups.write().await;
        if groups.contains_key(id) {
            return Err(RegistryError::AlreadyExists(id.to_string()));
        }

        let group = Arc::new(
            Group::new(id, Arc::clone(&self.fetcher), Arc::clone(&self.sink))
                .with_interval(self.interval),
        );
        self.sink.report_lifecycle(id, Lifecycle::Created);
        let handle = tokio::spawn({
            let group = Arc::clone(&group);
            async move {
                if let Err(e) = group.run().await {
                    tracing::error!(group = %group.id(), error = %e, "Group loop failed to start");
                }
            }
        });

        groups.insert(
            id.to_string(),
            GroupEntry {
                group: Arc::clone(&group),
                handle,
            },
        );
        drop(groups);

        tracing::info!(group = %id, "Group registered");
        Ok(group)
    }

    /// Look up a group.
    pub async fn get(&self, id: &str) -> Result<Arc<Group>, RegistryError> {
        self.groups
            .read()
            .await
            .get(id)
            .map(|entry| Arc::clone(&entry.group))
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Append a sensor to a registered group.
    ///
    /// # Errors
    /// `NotFound` if the group is unknown, `Group(DuplicateSensor)` if the
    /// sensor id is already used in the group.
    pub async fn add_sensor(
        &self,
        group_id: &str,
        sensor: SensorRef,
    ) -> Result<Arc<Group>, RegistryError> {
        let group = self.get(group_id).await?;
        group.add(sensor).await?;
        Ok(group)
    }

    /// All registered groups, ordered by id.
    pub async fn list(&self) -> Vec<Arc<Group>> {
        let mut groups: Vec<_> = self
            .groups
            .read()
            .await
            .values()
            .map(|entry| Arc::clone(&entry.group))
            .collect();
        groups.sort_by(|a, b| a.id().cmp(b.id()));
        groups
    }

    /// Get the number of registered groups.
    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }

    /// Stop a group's loop, wait for it to exit and forget the group.
    ///
    /// The entry leaves the map first so that concurrent deletes stop the
    /// loop exactly once.
    pub async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let entry = self
            .groups
            .write()
            .await
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        entry.group.stop();
        self.await_loop(id, entry.handle).await;

        self.sink.report_lifecycle(id, Lifecycle::Deleted);
        tracing::info!(group = %id, "Group deleted");
        Ok(())
    }

    /// Stop every group and wait for all loops to exit.
    pub async fn shutdown(&self) {
        let entries: Vec<(String, GroupEntry)> = self.groups.write().await.drain().collect();
        let count = entries.len();

        for (_, entry) in &entries {
            entry.group.stop();
        }
        join_all(
            entries
                .into_iter()
                .map(|(id, entry)| async move { self.await_loop(&id, entry.handle).await }),
        )
        .await;

        tracing::info!(group_count = count, "Group registry shutdown complete");
    }

    // --- Private helpers ---

    async fn await_loop(&self, id: &str, mut handle: JoinHandle<()>) {
        match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(group = %id, error = %e, "Group loop task failed");
            }
            Err(_) => {
                tracing::warn!(
                    group = %id,
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "Group loop did not stop in time, aborting"
                );
                handle.abort();
            }
        }
    }
}
