//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Primary identifier of a cached record: numeric or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
  Int(i64),
  Str(String),
}

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecordId::Int(n) => write!(f, "{}", n),
      RecordId::Str(s) => f.write_str(s),
    }
  }
}

impl From<i64> for RecordId {
  fn from(n: i64) -> Self {
    RecordId::Int(n)
  }
}

impl From<u64> for RecordId {
  fn from(n: u64) -> Self {
    RecordId::Int(n as i64)
  }
}

impl From<&str> for RecordId {
  fn from(s: &str) -> Self {
    RecordId::Str(s.to_string())
  }
}

impl From<String> for RecordId {
  fn from(s: String) -> Self {
    RecordId::Str(s)
  }
}

/// Trait for entities that can be cached.
///
/// Each implementor lives in exactly one collection, which must be one of
/// the store's registered entity kinds.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Collection name (e.g., "tasks", "projects")
  fn collection() -> &'static str;

  /// Primary identifier within the collection
  fn cache_id(&self) -> RecordId;

  /// Owning parent (e.g., the project of a task), indexed for lookups
  fn parent_id(&self) -> Option<RecordId> {
    None
  }
}

/// Result from a cache-backed fetch, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }

  pub fn is_offline(&self) -> bool {
    self.source == CacheSource::Offline
  }
}

/// Indicates where fetched data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Network unavailable, serving unexpired cached data
  Offline,
}
