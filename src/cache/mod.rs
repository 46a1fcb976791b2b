//! Expiring entity cache for offline reads.
//!
//! This module provides the read-side half of the offline layer:
//! - Caches entities per collection with a fixed time-to-live
//! - Enforces expiry lazily on read and periodically via a sweep
//! - Serves unexpired cached data when the network is unreachable

mod layer;
mod manager;
mod sweeper;
mod traits;

pub use manager::{CacheManager, CACHE_TTL_DAYS};
pub use sweeper::spawn_sweep_task;
pub use traits::{CacheResult, CacheSource, Cacheable, RecordId};
