//! Network-first fetching with cache fallback for read paths.

use std::future::Future;
use tracing::{debug, info};

use super::manager::CacheManager;
use super::traits::{CacheResult, Cacheable, RecordId};
use crate::error::Result;

impl CacheManager {
  /// Fetch a single entity, falling back to cache when offline.
  ///
  /// 1. Try the network; on success refresh the cache and return it
  /// 2. On a connectivity failure, serve the unexpired cached value
  /// 3. With nothing cached, or on any other error, propagate the error
  pub async fn fetch_one<T, F, Fut>(&self, id: impl Into<RecordId>, fetcher: F) -> Result<CacheResult<T>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let id = id.into();

    match fetcher().await {
      Ok(data) => {
        self.put(&data);
        Ok(CacheResult::from_network(data))
      }
      Err(e) if e.is_connectivity() => match self.get_with_cached_at::<T>(id.clone()) {
        Some((data, cached_at)) => {
          info!(collection = T::collection(), %id, "Offline, serving cached entity");
          Ok(CacheResult::offline(data, cached_at))
        }
        None => {
          debug!(collection = T::collection(), %id, "Offline with nothing cached");
          Err(e)
        }
      },
      Err(e) => Err(e),
    }
  }

  /// Fetch a list, falling back to the cached collection when offline.
  ///
  /// Every fetched item is cached. An empty cache offline propagates the
  /// original error.
  pub async fn fetch_all<T, F, Fut>(&self, fetcher: F) -> Result<CacheResult<Vec<T>>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    match fetcher().await {
      Ok(data) => {
        for item in &data {
          self.put(item);
        }
        Ok(CacheResult::from_network(data))
      }
      Err(e) if e.is_connectivity() => {
        let cached = self.get_all::<T>();
        if cached.is_empty() {
          Err(e)
        } else {
          info!(
            collection = T::collection(),
            count = cached.len(),
            "Offline, serving cached collection"
          );
          Ok(CacheResult::offline(cached, None))
        }
      }
      Err(e) => Err(e),
    }
  }
}
