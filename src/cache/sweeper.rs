//! Periodic removal of expired cache entries.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::manager::CacheManager;

/// Spawn a task that sweeps expired entries every `interval`, independent of
/// reads. Abort the returned handle on shutdown.
pub fn spawn_sweep_task(cache: CacheManager, interval: Duration) -> JoinHandle<()> {
  tokio::spawn(async move {
    info!(interval_secs = interval.as_secs(), "Starting cache sweep task");

    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately; sweep at startup too
    loop {
      ticker.tick().await;

      let cache = cache.clone();
      let removed = tokio::task::spawn_blocking(move || cache.sweep_expired())
        .await
        .unwrap_or(0);

      if removed > 0 {
        info!(removed, "Cache sweep removed expired entries");
      } else {
        debug!("Cache sweep: no expired entries");
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::{test_collections, Store};
  use serde_json::json;
  use std::sync::Arc;

  #[tokio::test]
  async fn test_sweep_task_removes_expired_entries() {
    let store = Arc::new(Store::open_in_memory(&test_collections()).unwrap());
    let clock = Arc::new(ManualClock::default());
    let cache = CacheManager::new(store.clone()).with_clock(clock.clone());

    cache.put_raw("tasks", "1", None, &json!({"id": 1}));
    clock.advance(chrono::Duration::days(8));

    let handle = spawn_sweep_task(cache, Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(store.get_record("tasks", "1").unwrap().is_none());
    handle.abort();
  }

  #[tokio::test]
  async fn test_sweep_task_can_be_aborted() {
    let store = Arc::new(Store::open_in_memory(&test_collections()).unwrap());
    let handle = spawn_sweep_task(CacheManager::new(store), Duration::from_secs(3600));

    handle.abort();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handle.is_finished());
  }
}
