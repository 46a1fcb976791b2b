use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::network::RouteConfig;
use crate::store::Store;
use crate::sync::{RetryPolicy, MAX_RETRIES, RETRY_DELAY_MS};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub store: StoreConfig,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  /// Request path patterns mapped to the entity type recorded on queued
  /// actions, checked in order.
  pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Database file (defaults to $XDG_DATA_HOME/offsync/offline.db)
  pub path: Option<PathBuf>,
}

impl StoreConfig {
  pub fn resolve_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(p) => Ok(p.clone()),
      None => Store::default_path(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub ttl_days: i64,
  pub sweep_interval_secs: u64,
  /// Entity collections created in the store
  pub collections: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_days: crate::cache::CACHE_TTL_DAYS,
      sweep_interval_secs: 3600,
      collections: vec!["projects".to_string(), "tasks".to_string()],
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> chrono::Duration {
    chrono::Duration::days(self.ttl_days)
  }

  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.sweep_interval_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub max_retries: u32,
  pub retry_delay_ms: u64,
  /// Schedule in-process retry timers after a failed replay
  pub background_retries: bool,
  pub probe_interval_secs: u64,
  /// Path requested to check whether the server is reachable
  pub probe_path: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_retries: MAX_RETRIES,
      retry_delay_ms: RETRY_DELAY_MS,
      background_retries: true,
      probe_interval_secs: 30,
      probe_path: "/".to_string(),
    }
  }
}

impl SyncConfig {
  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.max_retries,
      base_delay_ms: self.retry_delay_ms,
    }
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offsync/config.yaml
  ///
  /// With no file found every setting takes its default.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(Error::Config(format!("Config file not found: {}", p.display())));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
      Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    Self::parse(&contents)
      .map_err(|e| Error::Config(format!("Failed to parse config file {}: {}", path.display(), e)))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Get the API bearer token from the environment.
  ///
  /// Checks OFFSYNC_API_TOKEN; requests go out unauthenticated without it.
  pub fn get_api_token() -> Option<String> {
    std::env::var("OFFSYNC_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults_match_constants() {
    let config = Config::default();
    assert_eq!(config.cache.ttl(), chrono::Duration::days(7));
    assert_eq!(config.sync.retry_policy(), RetryPolicy::default());
    assert!(config.routes.is_empty());
    assert!(config.store.path.is_none());
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = Config::parse(
      r#"
api:
  base_url: https://example.test
sync:
  max_retries: 5
routes:
  - pattern: /api/projects/:id/tasks/*
    entity_type: tasks
"#,
    )
    .unwrap();

    assert_eq!(config.api.base_url, "https://example.test");
    assert_eq!(config.api.timeout_secs, 30);
    assert_eq!(config.sync.max_retries, 5);
    assert_eq!(config.sync.retry_delay_ms, RETRY_DELAY_MS);
    assert_eq!(config.routes.len(), 1);
    assert_eq!(config.routes[0].entity_type, "tasks");
  }

  #[test]
  fn test_empty_file_is_default() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.cache.collections, vec!["projects", "tasks"]);
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "cache:\n  ttl_days: 1\n  collections: [notes]").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.cache.ttl_days, 1);
    assert_eq!(config.cache.collections, vec!["notes"]);
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Config::load(Some(&dir.path().join("nope.yaml")));
    assert!(matches!(result, Err(Error::Config(_))));
  }

  #[test]
  fn test_invalid_yaml_is_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "sync: [not, a, map]").unwrap();
    assert!(matches!(Config::load(Some(file.path())), Err(Error::Config(_))));
  }
}
