//! Queue replay: retry policy, the sync engine, and the connectivity
//! monitor that triggers it.

mod engine;
mod monitor;
mod policy;

pub use engine::{
  ActionOutcome, BackgroundSyncHook, NoBackgroundSync, SyncEngine, SyncReport, BACKGROUND_SYNC_TAG,
};
pub use monitor::{check_connectivity, spawn_connectivity_monitor};
pub use policy::{RetryPolicy, MAX_RETRIES, RETRY_DELAY_MS};
