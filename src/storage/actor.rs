//! Writer task with exclusive write access and a bounded MPSC channel.
//!
//! Single-writer pattern: one Tokio task performs all inserts, processing
//! commands in order. Readings are buffered and flushed in one transaction
//! when the buffer reaches the batch size or the flush interval elapses.
//! Events are written immediately.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::group::Reading;
use crate::storage::StorageError;
use crate::storage::types::Event;

// =============================================================================
// Constants
// =============================================================================

/// Default maximum readings in buffer before flush.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default maximum time before buffer flush.
pub const DEFAULT_BATCH_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Wake-up period while the buffer is empty.
const IDLE_WAKEUP: Duration = Duration::from_secs(60);

// =============================================================================
// Commands
// =============================================================================

/// Commands sent to the writer task.
#[derive(Debug)]
pub enum Command {
    /// Buffer the batch of one collection cycle.
    InsertReadings {
        group: String,
        ts: DateTime<Utc>,
        readings: Vec<Reading>,
    },
    /// Insert event (immediate insert).
    InsertEvent(Event),
    /// Force flush of buffered readings; acknowledged once written.
    Flush(oneshot::Sender<()>),
    /// Flush and stop.
    Shutdown,
}

// =============================================================================
// Buffer
// =============================================================================

/// Reading row waiting for the next batch insert.
#[derive(Debug)]
struct PendingReading {
    group: String,
    ts: i64,
    payload: String,
}

/// Buffer for batch inserts with time-based and size-based flushing.
struct BatchBuffer<T> {
    items: Vec<T>,
    last_flush: Instant,
    threshold: usize,
}

impl<T> BatchBuffer<T> {
    fn new(threshold: usize) -> Self {
        Self {
            items: Vec::with_capacity(threshold),
            last_flush: Instant::now(),
            threshold,
        }
    }

    fn push(&mut self, item: T) {
        // Reset flush timer on first item to avoid treating long-idle buffers as overdue
        if self.items.is_empty() {
            self.last_flush = Instant::now();
        }
        self.items.push(item);
    }

    fn should_flush(&self, interval: Duration) -> bool {
        self.items.len() >= self.threshold
            || (!self.items.is_empty() && self.last_flush.elapsed() >= interval)
    }

    fn take(&mut self) -> Vec<T> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.items)
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// Actor
// =============================================================================

/// Database writer task with batch buffering for readings.
pub struct DbActor {
    pool: SqlitePool,
    rx: mpsc::Receiver<Command>,
    buffer: BatchBuffer<PendingReading>,
    flush_interval: Duration,
}

impl DbActor {
    /// Spawn the writer task on the current Tokio runtime.
    ///
    /// Returns the task handle and the command sender.
    pub fn spawn(
        pool: SqlitePool,
        channel_capacity: usize,
        batch_size: usize,
        flush_interval: Duration,
    ) -> (JoinHandle<()>, mpsc::Sender<Command>) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let actor = DbActor {
            pool,
            rx,
            buffer: BatchBuffer::new(batch_size.max(1)),
            flush_interval,
        };
        let handle = tokio::spawn(actor.run());
        (handle, tx)
    }

    async fn run(mut self) {
        tracing::info!("Storage writer started");

        loop {
            let deadline = if self.buffer.is_empty() {
                Instant::now() + IDLE_WAKEUP
            } else {
                self.buffer.last_flush + self.flush_interval
            };

            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await {
                            break; // Shutdown requested
                        }
                    }
                    None => {
                        tracing::warn!("Channel disconnected, shutting down");
                        self.flush_all().await;
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    // Flush overdue
                }
            }

            if self.buffer.should_flush(self.flush_interval) {
                self.flush_all().await;
            }
        }

        tracing::info!("Storage writer stopped");
    }

    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::InsertReadings {
                group,
                ts,
                readings,
            } => {
                let ts = ts.timestamp_micros();
                for reading in readings {
                    match serde_json::to_string(reading.fields()) {
                        Ok(payload) => self.buffer.push(PendingReading {
                            group: group.clone(),
                            ts,
                            payload,
                        }),
                        Err(e) => {
                            tracing::error!(
                                group = %group,
                                error = %e,
                                "Reading serialization failed"
                            );
                        }
                    }
                }
            }
            Command::InsertEvent(event) => {
                if let Err(e) = self.insert_event(&event).await {
                    tracing::error!(error = %e, "Event insert failed");
                }
            }
            Command::Flush(ack) => {
                self.flush_all().await;
                let _ = ack.send(());
            }
            Command::Shutdown => {
                tracing::info!("Storage writer shutting down");
                self.flush_all().await;
                return true;
            }
        }
        false
    }

    async fn flush_all(&mut self) {
        if !self.buffer.is_empty() {
            let readings = self.buffer.take();
            if let Err(e) = self.insert_readings_batch(&readings).await {
                tracing::error!(error = %e, count = readings.len(), "Readings batch insert failed");
            }
        }
    }

    // =========================================================================
    // Insert Operations
    // =========================================================================

    /// Batch insert readings in a single transaction (high volume).
    async fn insert_readings_batch(&self, readings: &[PendingReading]) -> Result<(), StorageError> {
        if readings.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for r in readings {
            sqlx::query("INSERT INTO readings (group_id, ts, payload) VALUES (?, ?, ?)")
                .bind(&r.group)
                .bind(r.ts)
                .bind(&r.payload)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(count = readings.len(), "Readings batch inserted");
        Ok(())
    }

    /// Insert a single event (low volume, immediate write).
    async fn insert_event(&self, e: &Event) -> Result<(), StorageError> {
        let payload = match &e.payload {
            Some(payload) => serde_json::to_string(payload)?,
            None => "{}".to_string(),
        };

        sqlx::query(
            "INSERT INTO events (ts, source, kind, severity, message, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(e.ts.timestamp_micros())
        .bind(&e.source)
        .bind(e.kind.as_ref())
        .bind(e.severity.as_ref())
        .bind(&e.message)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
