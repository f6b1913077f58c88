//! Storage Layer
//!
//! SQLite storage through sqlx with read/write separation:
//! - **Writer**: Tokio task with exclusive writes fed by a bounded mpsc channel
//! - **Readers**: Share the sqlx connection pool for concurrent reads
//!
//! # Components
//!
//! - [`StorageWriter`]: Write facade for readings and events, also the
//!   [`ReadingSink`](crate::group::ReadingSink) handed to the registry
//! - [`ReadingReader`] / [`EventReader`]: Async read facades
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization and lifecycle management

mod actor;
mod builder;
pub mod db;
mod error;
mod facades;
mod schema;
mod sink;
mod types;

pub use actor::{DEFAULT_BATCH_FLUSH_INTERVAL, DEFAULT_BATCH_SIZE};
pub use builder::{DEFAULT_CHANNEL_CAPACITY, StorageBuilder, StorageHandles};
pub use error::StorageError;
pub use facades::{
    DEFAULT_LIMIT, EventQuery, EventReader, MAX_LIMIT, ReadingQuery, ReadingReader, SortOrder,
    StorageWriter,
};
pub use types::{
    Event, EventKind, EventSeverity, REGISTRY_EVENT_SOURCE, SYSTEM_EVENT_SOURCE, StoredReading,
    group_event_source,
};
