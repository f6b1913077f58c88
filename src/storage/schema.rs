//! Database schema definitions.

use sqlx::SqlitePool;

use crate::storage::StorageError;

/// SQL statement for creating the readings table.
///
/// Payload is the reading's JSON object stored as text. `ts` is in
/// microseconds since the Unix epoch.
pub const READINGS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS readings (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id  TEXT    NOT NULL,
    ts        INTEGER NOT NULL,
    payload   TEXT    NOT NULL
)
"#;

pub const READINGS_INDEX_DDL: &str =
    "CREATE INDEX IF NOT EXISTS idx_readings_group_ts ON readings (group_id, ts)";

/// SQL statement for creating the events table.
pub const EVENTS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    ts        INTEGER NOT NULL,
    source    TEXT    NOT NULL,
    kind      TEXT    NOT NULL,
    severity  TEXT    NOT NULL,
    message   TEXT    NOT NULL,
    payload   TEXT    NOT NULL DEFAULT '{}'
)
"#;

pub const EVENTS_INDEX_DDL: &str = "CREATE INDEX IF NOT EXISTS idx_events_ts ON events (ts)";

/// Initialize the database schema.
///
/// Creates all tables and indexes if they don't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    for ddl in [
        READINGS_TABLE_DDL,
        READINGS_INDEX_DDL,
        EVENTS_TABLE_DDL,
        EVENTS_INDEX_DDL,
    ] {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!("Database schema initialized");
    Ok(())
}
