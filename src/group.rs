//! Group Layer
//!
//! Polling engine for named groups of remote sensors. Each registered group
//! runs its own collection loop in a Tokio task: on every tick it fetches all
//! of its sensors and hands the combined batch to a [`ReadingSink`].
//!
//! # Architecture
//!
//! - [`SensorRef`]: Immutable `(id, endpoint)` pair
//! - [`Fetcher`] / [`HttpFetcher`]: Pulls a sensor's readings with a bounded timeout
//! - [`Group`]: Sensor list plus collection loop with a one-shot stop
//! - [`GroupRegistry`]: Owned map of running groups, handed to the HTTP layer
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use broker::group::{GroupRegistry, HttpFetcher, HttpFetcherConfig, SensorRef};
//! # use broker::group::{Reading, ReadingSink};
//! # struct Discard;
//! # #[async_trait::async_trait]
//! # impl ReadingSink for Discard {
//! #     async fn deliver(
//! #         &self,
//! #         _group: &str,
//! #         _collected_at: chrono::DateTime<chrono::Utc>,
//! #         _readings: Vec<Reading>,
//! #     ) {
//! #     }
//! # }
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = Arc::new(HttpFetcher::new(HttpFetcherConfig::default())?);
//! let registry = GroupRegistry::new(fetcher, Arc::new(Discard));
//! registry.create("greenhouse").await?;
//! registry
//!     .add_sensor("greenhouse", SensorRef::new("t1", "http://10.0.0.12:8080"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod fetcher;
mod poller;
mod registry;
mod sensor;
#[cfg(test)]
pub(crate) mod testing;
mod traits;

pub use fetcher::{DEFAULT_FETCH_TIMEOUT, HttpFetcher, HttpFetcherConfig};
pub use poller::{CycleSummary, Group, GroupState, GroupView};
pub use registry::{DEFAULT_SHUTDOWN_TIMEOUT, GroupRegistry, RegistryError};
pub use sensor::{Reading, SensorRef};
pub use traits::{
    DEFAULT_INTERVAL, FetchError, Fetcher, GroupError, Lifecycle, MIN_INTERVAL, ReadingSink,
};
