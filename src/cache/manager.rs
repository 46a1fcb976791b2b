//! Expiring entity cache over the offline store.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::{Cacheable, RecordId};
use crate::clock::{Clock, SystemClock};
use crate::store::{EntryRef, StoredRecord, Store};

/// Default lifetime of a cached entry.
pub const CACHE_TTL_DAYS: i64 = 7;

/// Reads and writes cached entities with expiry.
///
/// The cache is advisory: store failures are logged and reported as a miss,
/// never as an error. Expired entries are deleted when read, and by
/// [`CacheManager::sweep_expired`].
#[derive(Clone)]
pub struct CacheManager {
  store: Arc<Store>,
  clock: Arc<dyn Clock>,
  ttl: Duration,
}

impl CacheManager {
  pub fn new(store: Arc<Store>) -> Self {
    Self {
      store,
      clock: Arc::new(SystemClock),
      ttl: Duration::days(CACHE_TTL_DAYS),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  pub fn store(&self) -> &Arc<Store> {
    &self.store
  }

  // ==========================================================================
  // Raw JSON access by collection name
  // ==========================================================================

  /// Cache `data` under `collection`/`id`. Returns whether it was stored.
  pub fn put_raw(&self, collection: &str, id: &str, parent_id: Option<&str>, data: &Value) -> bool {
    let now = self.clock.now_ms();
    let expires_at = now + self.ttl.num_milliseconds();

    match self
      .store
      .put_record(collection, id, parent_id, data, now, expires_at)
    {
      Ok(()) => true,
      Err(e) => {
        warn!(collection, id, error = %e, "Failed to cache record");
        false
      }
    }
  }

  /// Unexpired cached value, if any.
  pub fn get_raw(&self, collection: &str, id: &str) -> Option<Value> {
    self.get_record(collection, id).map(|r| r.data)
  }

  fn get_record(&self, collection: &str, id: &str) -> Option<StoredRecord> {
    // One statement reads the record together with its expiry
    let record = match self.store.get_record(collection, id) {
      Ok(record) => record?,
      Err(e) => {
        warn!(collection, id, error = %e, "Failed to read cached record");
        return None;
      }
    };

    match record.expires_at {
      Some(at) if at > self.clock.now_ms() => Some(record),
      Some(_) => {
        debug!(collection, id, "Cache entry expired");
        self.evict(collection, id);
        None
      }
      None => {
        // Record without metadata: never trust it
        debug!(collection, id, "Evicting cache record without metadata");
        self.evict(collection, id);
        None
      }
    }
  }

  /// All unexpired values of a collection. Expired ones are deleted.
  pub fn get_all_raw(&self, collection: &str) -> Vec<Value> {
    let records = match self.store.list_records(collection) {
      Ok(records) => self.retain_valid(records, collection),
      Err(e) => {
        warn!(collection, error = %e, "Failed to list cached records");
        Vec::new()
      }
    };
    records.into_iter().map(|r| r.data).collect()
  }

  /// Unexpired values of a collection owned by `parent_id`.
  pub fn get_by_parent_raw(&self, collection: &str, parent_id: &str) -> Vec<Value> {
    let records = match self.store.list_records_by_parent(collection, parent_id) {
      Ok(records) => self.retain_valid(records, collection),
      Err(e) => {
        warn!(collection, parent_id, error = %e, "Failed to list cached records");
        Vec::new()
      }
    };
    records.into_iter().map(|r| r.data).collect()
  }

  fn retain_valid(&self, records: Vec<StoredRecord>, collection: &str) -> Vec<StoredRecord> {
    let now = self.clock.now_ms();
    let (valid, expired): (Vec<_>, Vec<_>) = records
      .into_iter()
      .partition(|r| r.expires_at.is_some_and(|at| at > now));

    if !expired.is_empty() {
      let refs: Vec<EntryRef> = expired
        .into_iter()
        .map(|r| EntryRef {
          collection: collection.to_string(),
          id: r.id,
        })
        .collect();
      match self.store.delete_entries(&refs) {
        Ok(n) => debug!(collection, removed = n, "Evicted expired cache entries"),
        Err(e) => warn!(collection, error = %e, "Failed to evict expired cache entries"),
      }
    }

    valid
  }

  pub fn delete_raw(&self, collection: &str, id: &str) -> bool {
    match self.store.delete_record(collection, id) {
      Ok(removed) => removed,
      Err(e) => {
        warn!(collection, id, error = %e, "Failed to delete cached record");
        false
      }
    }
  }

  pub fn clear_raw(&self, collection: &str) -> usize {
    match self.store.clear_collection(collection) {
      Ok(removed) => removed,
      Err(e) => {
        warn!(collection, error = %e, "Failed to clear cache collection");
        0
      }
    }
  }

  fn evict(&self, collection: &str, id: &str) {
    if let Err(e) = self.store.delete_record(collection, id) {
      warn!(collection, id, error = %e, "Failed to evict cache entry");
    }
  }

  /// Delete every expired entry and every record or metadata row missing
  /// its counterpart. Returns the number of entries removed.
  pub fn sweep_expired(&self) -> usize {
    let now = self.clock.now_ms();

    let mut entries = match self.store.expired_entries(now) {
      Ok(entries) => entries,
      Err(e) => {
        warn!(error = %e, "Failed to query expired cache entries");
        return 0;
      }
    };
    match self.store.orphan_records() {
      Ok(orphans) => entries.extend(orphans),
      Err(e) => warn!(error = %e, "Failed to query orphan cache records"),
    }

    if entries.is_empty() {
      return 0;
    }

    match self.store.delete_entries(&entries) {
      Ok(removed) => removed,
      Err(e) => {
        warn!(error = %e, "Failed to sweep expired cache entries");
        0
      }
    }
  }

  // ==========================================================================
  // Typed access
  // ==========================================================================

  pub fn put<T: Cacheable>(&self, record: &T) -> bool {
    let data = match serde_json::to_value(record) {
      Ok(data) => data,
      Err(e) => {
        warn!(collection = T::collection(), error = %e, "Failed to serialize record");
        return false;
      }
    };
    let parent = record.parent_id().map(|p| p.to_string());
    self.put_raw(
      T::collection(),
      &record.cache_id().to_string(),
      parent.as_deref(),
      &data,
    )
  }

  pub fn get<T: Cacheable>(&self, id: impl Into<RecordId>) -> Option<T> {
    self.get_with_cached_at(id).map(|(data, _)| data)
  }

  /// Cached value together with when it was cached.
  pub(crate) fn get_with_cached_at<T: Cacheable>(
    &self,
    id: impl Into<RecordId>,
  ) -> Option<(T, Option<DateTime<Utc>>)> {
    let record = self.get_record(T::collection(), &id.into().to_string())?;
    let cached_at = DateTime::from_timestamp_millis(record.cached_at);
    decode::<T>(record.data).map(|data| (data, cached_at))
  }

  pub fn get_all<T: Cacheable>(&self) -> Vec<T> {
    self
      .get_all_raw(T::collection())
      .into_iter()
      .filter_map(decode)
      .collect()
  }

  pub fn get_by_parent<T: Cacheable>(&self, parent_id: impl Into<RecordId>) -> Vec<T> {
    self
      .get_by_parent_raw(T::collection(), &parent_id.into().to_string())
      .into_iter()
      .filter_map(decode)
      .collect()
  }

  pub fn delete<T: Cacheable>(&self, id: impl Into<RecordId>) -> bool {
    self.delete_raw(T::collection(), &id.into().to_string())
  }

  pub fn clear<T: Cacheable>(&self) -> usize {
    self.clear_raw(T::collection())
  }
}

fn decode<T: Cacheable>(data: Value) -> Option<T> {
  match serde_json::from_value(data) {
    Ok(value) => Some(value),
    Err(e) => {
      warn!(collection = T::collection(), error = %e, "Cached record no longer decodes");
      None
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use crate::store::test_collections;
  use serde::{Deserialize, Serialize};
  use serde_json::json;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  pub(crate) struct Task {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
  }

  impl Cacheable for Task {
    fn collection() -> &'static str {
      "tasks"
    }

    fn cache_id(&self) -> RecordId {
      self.id.into()
    }

    fn parent_id(&self) -> Option<RecordId> {
      Some(self.project_id.into())
    }
  }

  pub(crate) fn task(id: i64, project_id: i64) -> Task {
    Task {
      id,
      project_id,
      title: format!("task {}", id),
    }
  }

  fn setup() -> (CacheManager, Arc<ManualClock>) {
    let store = Arc::new(Store::open_in_memory(&test_collections()).unwrap());
    let clock = Arc::new(ManualClock::default());
    let cache = CacheManager::new(store).with_clock(clock.clone());
    (cache, clock)
  }

  #[test]
  fn test_get_returns_value_before_expiry() {
    let (cache, clock) = setup();
    assert!(cache.put(&task(5, 1)));

    clock.advance(Duration::days(7) - Duration::milliseconds(1));
    assert_eq!(cache.get::<Task>(5i64), Some(task(5, 1)));
  }

  #[test]
  fn test_get_expires_at_exact_ttl_and_deletes() {
    let (cache, clock) = setup();
    cache.put(&task(5, 1));

    clock.advance(Duration::days(7));
    assert_eq!(cache.get::<Task>(5i64), None);
    assert!(cache.store().get_record("tasks", "5").unwrap().is_none());
    assert!(cache.store().get_metadata("tasks", "5").unwrap().is_none());
  }

  #[test]
  fn test_eight_days_later_entry_is_gone() {
    let (cache, clock) = setup();
    cache.put(&task(5, 1));

    clock.advance(Duration::days(8));
    assert!(cache.get::<Task>(5i64).is_none());
    assert!(cache.store().list_records("tasks").unwrap().is_empty());
  }

  #[test]
  fn test_put_refreshes_expiry() {
    let (cache, clock) = setup();
    cache.put(&task(5, 1));
    clock.advance(Duration::days(6));
    cache.put(&task(5, 1));
    clock.advance(Duration::days(6));
    assert!(cache.get::<Task>(5i64).is_some());
  }

  #[test]
  fn test_get_all_filters_and_deletes_expired() {
    let (cache, clock) = setup();
    cache.put(&task(1, 1));
    clock.advance(Duration::days(4));
    cache.put(&task(2, 1));
    clock.advance(Duration::days(4));

    assert_eq!(cache.get_all::<Task>(), vec![task(2, 1)]);
    assert!(cache.store().get_record("tasks", "1").unwrap().is_none());
  }

  #[test]
  fn test_get_by_parent() {
    let (cache, _clock) = setup();
    cache.put(&task(1, 10));
    cache.put(&task(2, 20));
    cache.put(&task(3, 10));

    let ids: Vec<i64> = cache.get_by_parent::<Task>(10i64).into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![1, 3]);
  }

  #[test]
  fn test_delete_and_clear() {
    let (cache, _clock) = setup();
    cache.put(&task(1, 1));
    cache.put(&task(2, 1));

    assert!(cache.delete::<Task>(1i64));
    assert!(cache.get::<Task>(1i64).is_none());
    assert_eq!(cache.clear::<Task>(), 1);
    assert!(cache.get_all::<Task>().is_empty());
  }

  #[test]
  fn test_sweep_removes_only_expired() {
    let (cache, clock) = setup();
    cache.put(&task(1, 1));
    clock.advance(Duration::days(5));
    cache.put(&task(2, 1));
    clock.advance(Duration::days(3));

    assert_eq!(cache.sweep_expired(), 1);
    assert!(cache.store().get_record("tasks", "1").unwrap().is_none());
    assert!(cache.store().get_record("tasks", "2").unwrap().is_some());
    assert_eq!(cache.sweep_expired(), 0);
  }

  #[test]
  fn test_record_without_metadata_is_treated_as_stale() {
    let (cache, _clock) = setup();
    cache.put(&task(5, 1));
    // Simulate a crash that lost the metadata row
    cache.store().delete_metadata("tasks", "5").unwrap();

    assert!(cache.get::<Task>(5i64).is_none());
    assert!(cache.store().get_record("tasks", "5").unwrap().is_none());
  }

  #[test]
  fn test_sweep_removes_orphan_records() {
    let (cache, _clock) = setup();
    cache.put(&task(5, 1));
    cache.store().delete_metadata("tasks", "5").unwrap();

    assert_eq!(cache.sweep_expired(), 1);
    assert!(cache.store().list_records("tasks").unwrap().is_empty());
  }

  #[test]
  fn test_orphan_metadata_exposes_nothing_and_is_swept() {
    let (cache, _clock) = setup();
    cache.put(&task(5, 1));
    cache
      .store()
      .execute_raw("DELETE FROM records WHERE id = '5'")
      .unwrap();

    assert!(cache.get::<Task>(5i64).is_none());
    assert_eq!(cache.sweep_expired(), 1);
    assert!(cache.store().get_metadata("tasks", "5").unwrap().is_none());
  }

  #[test]
  fn test_store_errors_surface_as_miss() {
    let (cache, _clock) = setup();
    assert!(!cache.put_raw("invoices", "1", None, &json!({})));
    assert!(cache.get_raw("invoices", "1").is_none());
    assert!(cache.get_all_raw("invoices").is_empty());
    assert_eq!(cache.clear_raw("invoices"), 0);
  }

  #[test]
  fn test_custom_ttl() {
    let (cache, clock) = setup();
    let cache = cache.with_ttl(Duration::hours(1));
    cache.put_raw("projects", "p1", None, &json!({"name": "Apollo"}));

    clock.advance(Duration::minutes(59));
    assert_eq!(cache.get_raw("projects", "p1"), Some(json!({"name": "Apollo"})));
    clock.advance(Duration::minutes(1));
    assert_eq!(cache.get_raw("projects", "p1"), None);
  }
}
