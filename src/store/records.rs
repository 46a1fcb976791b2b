//! Cached record and expiry-metadata storage.

use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use super::Store;
use crate::error::Result;

/// A cached record as stored, with its expiry if metadata exists.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
  pub id: String,
  pub parent_id: Option<String>,
  pub data: Value,
  pub cached_at: i64,
  /// `None` when the record has no metadata row (orphan).
  pub expires_at: Option<i64>,
}

/// Expiry metadata for one cached record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetadata {
  pub cached_at: i64,
  pub expires_at: i64,
}

/// Address of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryRef {
  pub collection: String,
  pub id: String,
}

/// Metadata key for a record: `<collection>:<id>`.
pub fn metadata_key(collection: &str, id: &str) -> String {
  format!("{}:{}", collection, id)
}

const SELECT_RECORDS: &str = "SELECT r.id, r.parent_id, r.data, r.cached_at, m.expires_at
   FROM records r
   LEFT JOIN cache_metadata m ON m.key = r.collection || ':' || r.id";

fn row_to_record(row: &Row) -> rusqlite::Result<(String, Option<String>, Vec<u8>, i64, Option<i64>)> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

impl Store {
  /// Write a record and its metadata in one transaction, replacing any
  /// previous entry with the same id.
  pub fn put_record(
    &self,
    collection: &str,
    id: &str,
    parent_id: Option<&str>,
    data: &Value,
    cached_at: i64,
    expires_at: i64,
  ) -> Result<()> {
    self.check_collection(collection)?;
    let data = serde_json::to_vec(data)?;

    let mut conn = self.conn()?;
    let tx = conn.transaction()?;
    tx.execute(
      "INSERT OR REPLACE INTO records (collection, id, parent_id, data, cached_at)
       VALUES (?, ?, ?, ?, ?)",
      params![collection, id, parent_id, data, cached_at],
    )?;
    tx.execute(
      "INSERT OR REPLACE INTO cache_metadata (key, collection, record_id, cached_at, expires_at)
       VALUES (?, ?, ?, ?, ?)",
      params![metadata_key(collection, id), collection, id, cached_at, expires_at],
    )?;
    tx.commit()?;

    Ok(())
  }

  pub fn get_metadata(&self, collection: &str, id: &str) -> Result<Option<CacheMetadata>> {
    let conn = self.conn()?;
    let meta = conn
      .query_row(
        "SELECT cached_at, expires_at FROM cache_metadata WHERE key = ?",
        params![metadata_key(collection, id)],
        |row| {
          Ok(CacheMetadata {
            cached_at: row.get(0)?,
            expires_at: row.get(1)?,
          })
        },
      )
      .optional()?;
    Ok(meta)
  }

  pub fn get_record(&self, collection: &str, id: &str) -> Result<Option<StoredRecord>> {
    self.check_collection(collection)?;
    let conn = self.conn()?;
    let sql = format!("{} WHERE r.collection = ? AND r.id = ?", SELECT_RECORDS);
    let row = conn
      .query_row(&sql, params![collection, id], row_to_record)
      .optional()?;

    match row {
      Some((id, parent_id, data, cached_at, expires_at)) => Ok(Some(StoredRecord {
        id,
        parent_id,
        data: serde_json::from_slice(&data)?,
        cached_at,
        expires_at,
      })),
      None => Ok(None),
    }
  }

  /// All records of a collection. Rows that no longer deserialize are
  /// skipped.
  pub fn list_records(&self, collection: &str) -> Result<Vec<StoredRecord>> {
    self.check_collection(collection)?;
    let sql = format!("{} WHERE r.collection = ? ORDER BY r.id", SELECT_RECORDS);
    self.query_records(&sql, params![collection])
  }

  /// Records of a collection owned by `parent_id`, via the parent index.
  pub fn list_records_by_parent(&self, collection: &str, parent_id: &str) -> Result<Vec<StoredRecord>> {
    self.check_collection(collection)?;
    let sql = format!(
      "{} WHERE r.collection = ? AND r.parent_id = ? ORDER BY r.id",
      SELECT_RECORDS
    );
    self.query_records(&sql, params![collection, parent_id])
  }

  fn query_records(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<StoredRecord>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
      .query_map(params, row_to_record)?
      .filter_map(|r| r.ok())
      .filter_map(|(id, parent_id, data, cached_at, expires_at)| {
        let data = serde_json::from_slice(&data).ok()?;
        Some(StoredRecord {
          id,
          parent_id,
          data,
          cached_at,
          expires_at,
        })
      })
      .collect();
    Ok(records)
  }

  /// Delete a record and its metadata together. Returns whether anything
  /// was removed.
  pub fn delete_record(&self, collection: &str, id: &str) -> Result<bool> {
    let removed = self.delete_entries(&[EntryRef {
      collection: collection.to_string(),
      id: id.to_string(),
    }])?;
    Ok(removed > 0)
  }

  /// Delete many entries (record + metadata) in one transaction. Returns
  /// the number of entries that had a record or metadata row.
  pub fn delete_entries(&self, entries: &[EntryRef]) -> Result<usize> {
    let mut conn = self.conn()?;
    let tx = conn.transaction()?;
    let mut removed = 0;
    for entry in entries {
      let records = tx.execute(
        "DELETE FROM records WHERE collection = ? AND id = ?",
        params![entry.collection, entry.id],
      )?;
      let meta = tx.execute(
        "DELETE FROM cache_metadata WHERE key = ?",
        params![metadata_key(&entry.collection, &entry.id)],
      )?;
      if records + meta > 0 {
        removed += 1;
      }
    }
    tx.commit()?;
    Ok(removed)
  }

  /// Remove every record and metadata row of a collection.
  pub fn clear_collection(&self, collection: &str) -> Result<usize> {
    self.check_collection(collection)?;
    let mut conn = self.conn()?;
    let tx = conn.transaction()?;
    let removed = tx.execute(
      "DELETE FROM records WHERE collection = ?",
      params![collection],
    )?;
    tx.execute(
      "DELETE FROM cache_metadata WHERE collection = ?",
      params![collection],
    )?;
    tx.commit()?;
    Ok(removed)
  }

  /// Entries whose metadata says they expired at or before `now`.
  pub fn expired_entries(&self, now: i64) -> Result<Vec<EntryRef>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT collection, record_id FROM cache_metadata
       WHERE expires_at <= ?
       ORDER BY expires_at",
    )?;
    let entries = stmt
      .query_map(params![now], |row| {
        Ok(EntryRef {
          collection: row.get(0)?,
          id: row.get(1)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
  }

  /// Entries with a record but no metadata row, or metadata but no record.
  pub fn orphan_records(&self) -> Result<Vec<EntryRef>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT r.collection, r.id FROM records r
       LEFT JOIN cache_metadata m ON m.key = r.collection || ':' || r.id
       WHERE m.key IS NULL
       UNION ALL
       SELECT m.collection, m.record_id FROM cache_metadata m
       LEFT JOIN records r ON r.collection = m.collection AND r.id = m.record_id
       WHERE r.id IS NULL",
    )?;
    let entries = stmt
      .query_map([], |row| {
        Ok(EntryRef {
          collection: row.get(0)?,
          id: row.get(1)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
  }

  /// Drop only the metadata row of an entry (used to clean orphans).
  pub fn delete_metadata(&self, collection: &str, id: &str) -> Result<bool> {
    let conn = self.conn()?;
    let removed = conn.execute(
      "DELETE FROM cache_metadata WHERE key = ?",
      params![metadata_key(collection, id)],
    )?;
    Ok(removed > 0)
  }

  #[cfg(test)]
  pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
    self.conn()?.execute_batch(sql)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Error;
  use crate::store::test_collections;
  use serde_json::json;

  fn store() -> Store {
    Store::open_in_memory(&test_collections()).unwrap()
  }

  #[test]
  fn test_put_writes_record_and_metadata() {
    let store = store();
    store
      .put_record("tasks", "5", Some("1"), &json!({"id": 5}), 100, 200)
      .unwrap();

    let record = store.get_record("tasks", "5").unwrap().unwrap();
    assert_eq!(record.data, json!({"id": 5}));
    assert_eq!(record.parent_id.as_deref(), Some("1"));
    assert_eq!(record.expires_at, Some(200));

    let meta = store.get_metadata("tasks", "5").unwrap().unwrap();
    assert_eq!(meta, CacheMetadata { cached_at: 100, expires_at: 200 });
  }

  #[test]
  fn test_put_overwrites() {
    let store = store();
    store.put_record("tasks", "5", None, &json!({"v": 1}), 100, 200).unwrap();
    store.put_record("tasks", "5", None, &json!({"v": 2}), 150, 250).unwrap();

    let records = store.list_records("tasks").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data, json!({"v": 2}));
    assert_eq!(records[0].expires_at, Some(250));
  }

  #[test]
  fn test_unknown_collection_rejected() {
    let store = store();
    let result = store.put_record("invoices", "1", None, &json!({}), 0, 1);
    assert!(matches!(result, Err(Error::UnknownCollection(_))));
  }

  #[test]
  fn test_list_by_parent() {
    let store = store();
    store.put_record("tasks", "1", Some("10"), &json!({"id": 1}), 0, 1).unwrap();
    store.put_record("tasks", "2", Some("20"), &json!({"id": 2}), 0, 1).unwrap();
    store.put_record("tasks", "3", Some("10"), &json!({"id": 3}), 0, 1).unwrap();

    let ids: Vec<String> = store
      .list_records_by_parent("tasks", "10")
      .unwrap()
      .into_iter()
      .map(|r| r.id)
      .collect();
    assert_eq!(ids, vec!["1", "3"]);
  }

  #[test]
  fn test_delete_removes_both_rows() {
    let store = store();
    store.put_record("tasks", "5", None, &json!({}), 0, 1).unwrap();
    assert!(store.delete_record("tasks", "5").unwrap());
    assert!(store.get_record("tasks", "5").unwrap().is_none());
    assert!(store.get_metadata("tasks", "5").unwrap().is_none());
    assert!(!store.delete_record("tasks", "5").unwrap());
  }

  #[test]
  fn test_clear_collection_leaves_others() {
    let store = store();
    store.put_record("tasks", "1", None, &json!({}), 0, 1).unwrap();
    store.put_record("tasks", "2", None, &json!({}), 0, 1).unwrap();
    store.put_record("projects", "1", None, &json!({}), 0, 1).unwrap();

    assert_eq!(store.clear_collection("tasks").unwrap(), 2);
    assert!(store.list_records("tasks").unwrap().is_empty());
    assert!(store.get_metadata("tasks", "1").unwrap().is_none());
    assert_eq!(store.list_records("projects").unwrap().len(), 1);
  }

  #[test]
  fn test_expired_entries_uses_inclusive_bound() {
    let store = store();
    store.put_record("tasks", "1", None, &json!({}), 0, 100).unwrap();
    store.put_record("tasks", "2", None, &json!({}), 0, 200).unwrap();

    let expired = store.expired_entries(100).unwrap();
    assert_eq!(
      expired,
      vec![EntryRef {
        collection: "tasks".into(),
        id: "1".into()
      }]
    );
  }

  #[test]
  fn test_orphan_records_detected() {
    let store = store();
    store.put_record("tasks", "1", None, &json!({}), 0, 100).unwrap();
    store.put_record("tasks", "2", None, &json!({}), 0, 100).unwrap();
    store.delete_metadata("tasks", "2").unwrap();

    store.put_record("tasks", "3", None, &json!({}), 0, 100).unwrap();
    store.execute_raw("DELETE FROM records WHERE id = '3'").unwrap();

    let mut orphans: Vec<String> = store
      .orphan_records()
      .unwrap()
      .into_iter()
      .map(|e| e.id)
      .collect();
    orphans.sort();
    assert_eq!(orphans, vec!["2", "3"]);
    assert_eq!(store.get_record("tasks", "2").unwrap().unwrap().expires_at, None);
  }

  #[test]
  fn test_failed_transaction_writes_nothing() {
    let store = store();
    // Make the metadata insert fail after the record insert
    store
      .execute_raw(
        "CREATE TRIGGER fail_meta BEFORE INSERT ON cache_metadata
         BEGIN SELECT RAISE(ABORT, 'simulated crash'); END;",
      )
      .unwrap();

    assert!(store.put_record("tasks", "9", None, &json!({}), 0, 100).is_err());
    assert!(store.get_record("tasks", "9").unwrap().is_none());
  }
}
