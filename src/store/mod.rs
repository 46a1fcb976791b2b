//! Durable local state: cached records, their expiry metadata and the
//! offline action queue, in one SQLite database.

mod queue;
mod records;
mod schema;

use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub use records::{CacheMetadata, EntryRef, StoredRecord};

/// Handle to the offline database.
///
/// Built once and shared (`Arc<Store>`) by the cache manager, interceptor and
/// sync engine. Every multi-row change runs in a single transaction.
pub struct Store {
  conn: Mutex<Connection>,
  collections: BTreeSet<String>,
}

impl Store {
  /// Open (creating or upgrading) the database at `path` and register the
  /// known entity collections. Safe to call repeatedly on the same file.
  pub fn open(path: &Path, collections: &[String]) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        Error::StoreUnavailable(format!("Failed to create store directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::StoreUnavailable(format!("Failed to open store at {}: {}", path.display(), e))
    })?;
    info!(path = %path.display(), "Opened offline store");

    Self::init(conn, collections)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory(collections: &[String]) -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| Error::StoreUnavailable(format!("Failed to open in-memory store: {}", e)))?;
    Self::init(conn, collections)
  }

  /// Default database location under the user data directory.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("offsync").join("offline.db"))
  }

  fn init(mut conn: Connection, collections: &[String]) -> Result<Self> {
    run_migrations(&mut conn)
      .map_err(|e| Error::StoreUnavailable(format!("Failed to run migrations: {}", e)))?;

    {
      let tx = conn
        .transaction()
        .map_err(|e| Error::StoreUnavailable(format!("Failed to register collections: {}", e)))?;
      for name in collections {
        tx.execute(
          "INSERT OR IGNORE INTO collections (name) VALUES (?)",
          params![name],
        )
        .map_err(|e| Error::StoreUnavailable(format!("Failed to register {}: {}", name, e)))?;
      }
      tx.commit()
        .map_err(|e| Error::StoreUnavailable(format!("Failed to register collections: {}", e)))?;
    }

    // Collections registered by earlier runs stay readable
    let known: BTreeSet<String> = {
      let mut stmt = conn
        .prepare("SELECT name FROM collections")
        .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
      let names = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| Error::StoreUnavailable(e.to_string()))?
        .collect::<rusqlite::Result<_>>()
        .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
      names
    };
    debug!(collections = ?known, "Store collections");

    Ok(Self {
      conn: Mutex::new(conn),
      collections: known,
    })
  }

  /// Names of the registered entity collections.
  pub fn collections(&self) -> impl Iterator<Item = &str> {
    self.collections.iter().map(String::as_str)
  }

  pub fn has_collection(&self, name: &str) -> bool {
    self.collections.contains(name)
  }

  pub fn check_collection(&self, name: &str) -> Result<()> {
    if self.has_collection(name) {
      Ok(())
    } else {
      Err(Error::UnknownCollection(name.to_string()))
    }
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::Poisoned(e.to_string()))
  }

  /// Schema version recorded in the database.
  pub fn schema_version(&self) -> Result<u32> {
    let conn = self.conn()?;
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
  }
}

/// Apply every migration newer than the database's `user_version`.
fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
  let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
  if version >= schema::current_version() {
    return Ok(());
  }

  let tx = conn.transaction()?;
  for sql in schema::MIGRATIONS.iter().skip(version as usize) {
    tx.execute_batch(sql)?;
  }
  tx.pragma_update(None, "user_version", schema::current_version())?;
  tx.commit()?;

  info!(
    from = version,
    to = schema::current_version(),
    "Migrated offline store schema"
  );
  Ok(())
}

#[cfg(test)]
pub(crate) fn test_collections() -> Vec<String> {
  vec!["projects".to_string(), "tasks".to_string()]
}
