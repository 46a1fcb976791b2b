//! Offline continuity for API clients.
//!
//! Reads are served from an expiring local cache when the server cannot be
//! reached. Mutations that fail for lack of connectivity are persisted to a
//! durable queue, answered with a synthetic `202`, and replayed with bounded
//! retry once connectivity returns.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod logging;
pub mod network;
pub mod queue;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheManager, CacheResult, CacheSource, Cacheable, RecordId};
pub use config::Config;
pub use error::{Error, Result};
pub use interceptor::RequestInterceptor;
pub use network::{ApiClient, HttpMethod, HttpResponse, OnlineFlag};
pub use queue::QueuedAction;
pub use store::Store;
pub use sync::{SyncEngine, SyncReport};
