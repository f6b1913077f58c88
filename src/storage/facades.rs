//! User-facing storage facades.
//!
//! Provides ergonomic APIs for storage operations:
//! - `StorageWriter`: Non-blocking writes via MPSC
//! - `ReadingReader`: Query stored readings of a group
//! - `EventReader`: Query events

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use strum_macros::{AsRefStr, EnumString};
use tokio::sync::{mpsc, oneshot};

use crate::group::Reading;
use crate::storage::StorageError;
use crate::storage::actor::Command;
use crate::storage::types::{Event, EventKind, EventSeverity, StoredReading};

// =============================================================================
// Constants
// =============================================================================

/// Rows returned when a query does not set a limit.
pub const DEFAULT_LIMIT: u32 = 100;

/// Upper bound on rows returned by a single query.
pub const MAX_LIMIT: u32 = 10_000;

// =============================================================================
// Query Types
// =============================================================================

/// Sort order for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Query for the readings of one group.
#[derive(Debug, Clone, Default)]
pub struct ReadingQuery {
    pub group: String,
    pub limit: Option<u32>,
    pub order: Option<SortOrder>,
}

impl ReadingQuery {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            ..Default::default()
        }
    }
}

/// Query for events.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub source: Option<String>,
    pub kind: Option<EventKind>,
    pub severity: Option<EventSeverity>,
    pub limit: Option<u32>,
    pub order: Option<SortOrder>,
}

// =============================================================================
// Writer
// =============================================================================

/// Non-blocking storage writer.
///
/// Uses `try_send`: data is dropped if the channel is full. Readings are
/// buffered by the writer task and flushed by size or time.
#[derive(Clone)]
pub struct StorageWriter {
    tx: mpsc::Sender<Command>,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for StorageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageWriter")
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl StorageWriter {
    pub(crate) fn new(tx: mpsc::Sender<Command>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total count of writes dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue the batch of one collection cycle. Buffered until flush threshold.
    pub fn insert_readings(
        &self,
        group: &str,
        ts: DateTime<Utc>,
        readings: Vec<Reading>,
    ) -> Result<(), StorageError> {
        let count = readings.len() as u64;
        let cmd = Command::InsertReadings {
            group: group.to_string(),
            ts,
            readings,
        };
        self.tx.try_send(cmd).map_err(|_| {
            tracing::warn!(group = %group, count, "Channel full, dropping readings");
            self.dropped.fetch_add(count, Ordering::Relaxed);
            StorageError::ChannelSend
        })
    }

    /// Queue a single event. Written as soon as the writer task receives it.
    pub fn insert_event(&self, event: Event) -> Result<(), StorageError> {
        self.tx.try_send(Command::InsertEvent(event)).map_err(|_| {
            tracing::warn!("Channel full, dropping event");
            self.dropped.fetch_add(1, Ordering::Relaxed);
            StorageError::ChannelSend
        })
    }

    /// Flush buffered readings and wait until they are written.
    ///
    /// Every write queued before this call is visible to readers once it
    /// returns.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack))
            .await
            .map_err(|_| StorageError::ChannelSend)?;
        done.await.map_err(|_| StorageError::ChannelSend)
    }

    /// Ask the writer task to flush and stop.
    pub(crate) async fn shutdown(&self) -> Result<(), StorageError> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| StorageError::ChannelSend)
    }
}

// =============================================================================
// Readers
// =============================================================================

/// Reader for stored readings.
#[derive(Clone)]
pub struct ReadingReader {
    pool: SqlitePool,
}

impl std::fmt::Debug for ReadingReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadingReader").finish_non_exhaustive()
    }
}

impl ReadingReader {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Query the readings of a group, newest first by default.
    pub async fn query(&self, q: ReadingQuery) -> Result<Vec<StoredReading>, StorageError> {
        let limit = q.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let order = q.order.unwrap_or_default().as_sql();

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, group_id, ts, payload FROM readings WHERE group_id = ");
        qb.push_bind(&q.group);
        qb.push(format!(" ORDER BY ts {order}, id {order} LIMIT "));
        qb.push_bind(i64::from(limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(reading_from_row).collect()
    }

    /// Number of readings stored for a group.
    pub async fn count(&self, group: &str) -> Result<i64, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM readings WHERE group_id = ?")
            .bind(group)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Event reader.
#[derive(Clone)]
pub struct EventReader {
    pool: SqlitePool,
}

impl std::fmt::Debug for EventReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReader").finish_non_exhaustive()
    }
}

impl EventReader {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Query events with filters.
    pub async fn query(&self, q: EventQuery) -> Result<Vec<Event>, StorageError> {
        let limit = q.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let order = q.order.unwrap_or_default().as_sql();

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, ts, source, kind, severity, message, payload FROM events WHERE 1 = 1",
        );
        if let Some(ref source) = q.source {
            qb.push(" AND source = ").push_bind(source);
        }
        if let Some(kind) = q.kind {
            qb.push(" AND kind = ").push_bind(kind.to_string());
        }
        if let Some(severity) = q.severity {
            qb.push(" AND severity = ").push_bind(severity.to_string());
        }
        qb.push(format!(" ORDER BY ts {order}, id {order} LIMIT "));
        qb.push_bind(i64::from(limit));

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(event_from_row).collect()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn timestamp(micros: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StorageError::InvalidData(format!("timestamp out of range: {micros}")))
}

fn reading_from_row(row: &SqliteRow) -> Result<StoredReading, StorageError> {
    let payload: String = row.try_get("payload")?;
    Ok(StoredReading {
        id: row.try_get("id")?,
        group: row.try_get("group_id")?,
        ts: timestamp(row.try_get("ts")?)?,
        payload: serde_json::from_str(&payload)?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<Event, StorageError> {
    let kind: String = row.try_get("kind")?;
    let severity: String = row.try_get("severity")?;
    let payload: String = row.try_get("payload")?;
    let payload: serde_json::Value = serde_json::from_str(&payload)?;

    Ok(Event {
        id: Some(row.try_get("id")?),
        ts: timestamp(row.try_get("ts")?)?,
        source: row.try_get("source")?,
        kind: EventKind::from_str(&kind).unwrap_or(EventKind::System),
        severity: EventSeverity::from_str(&severity).unwrap_or(EventSeverity::Info),
        message: row.try_get("message")?,
        payload: match payload {
            serde_json::Value::Object(ref map) if map.is_empty() => None,
            other => Some(other),
        },
    })
}
