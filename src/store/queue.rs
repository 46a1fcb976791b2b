//! Offline action queue persistence.

use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::Result;
use crate::network::HttpMethod;
use crate::queue::{ActionType, MutationMethod, QueuedAction};

const SELECT_ACTIONS: &str = "SELECT id, action_type, entity_type, endpoint, method, data,
          timestamp, retries, next_attempt_at
   FROM offline_queue";

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
  rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

fn row_to_action(row: &Row) -> rusqlite::Result<QueuedAction> {
  let action_type: String = row.get(1)?;
  let action_type = ActionType::parse(&action_type)
    .ok_or_else(|| conversion_error(1, Type::Text, format!("bad action type {}", action_type)))?;

  let method: String = row.get(4)?;
  let method = method
    .parse::<HttpMethod>()
    .ok()
    .and_then(MutationMethod::from_http)
    .ok_or_else(|| conversion_error(4, Type::Text, format!("bad method {}", method)))?;

  let data: Vec<u8> = row.get(5)?;
  let data = serde_json::from_slice(&data)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Blob, Box::new(e)))?;

  Ok(QueuedAction {
    id: row.get(0)?,
    action_type,
    entity_type: row.get(2)?,
    endpoint: row.get(3)?,
    method,
    data,
    timestamp: row.get(6)?,
    retries: row.get(7)?,
    next_attempt_at: row.get(8)?,
  })
}

impl Store {
  pub fn enqueue_action(&self, action: &QueuedAction) -> Result<()> {
    let data = serde_json::to_vec(&action.data)?;
    let conn = self.conn()?;
    conn.execute(
      "INSERT INTO offline_queue
         (id, action_type, entity_type, endpoint, method, data, timestamp, retries, next_attempt_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        action.id,
        action.action_type.as_str(),
        action.entity_type,
        action.endpoint,
        action.method.as_http().as_str(),
        data,
        action.timestamp,
        action.retries,
        action.next_attempt_at,
      ],
    )?;
    Ok(())
  }

  /// All queued actions, oldest first.
  pub fn list_actions(&self) -> Result<Vec<QueuedAction>> {
    let sql = format!("{} ORDER BY timestamp ASC, id ASC", SELECT_ACTIONS);
    self.query_actions(&sql, [])
  }

  /// Queued actions for one entity type, oldest first.
  pub fn list_actions_for(&self, entity_type: &str) -> Result<Vec<QueuedAction>> {
    let sql = format!(
      "{} WHERE entity_type = ? ORDER BY timestamp ASC, id ASC",
      SELECT_ACTIONS
    );
    self.query_actions(&sql, params![entity_type])
  }

  fn query_actions(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<QueuedAction>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(sql)?;
    let actions = stmt
      .query_map(params, row_to_action)?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(actions)
  }

  pub fn get_action(&self, id: &str) -> Result<Option<QueuedAction>> {
    let conn = self.conn()?;
    let sql = format!("{} WHERE id = ?", SELECT_ACTIONS);
    let action = conn
      .query_row(&sql, params![id], row_to_action)
      .optional()?;
    Ok(action)
  }

  /// Persist a new retry count. The count only ever grows; returns false
  /// when the action is gone or already has this count or a higher one.
  pub fn update_action_retry(
    &self,
    id: &str,
    retries: u32,
    next_attempt_at: Option<i64>,
  ) -> Result<bool> {
    let conn = self.conn()?;
    let updated = conn.execute(
      "UPDATE offline_queue SET retries = ?2, next_attempt_at = ?3
       WHERE id = ?1 AND retries < ?2",
      params![id, retries, next_attempt_at],
    )?;
    Ok(updated > 0)
  }

  pub fn remove_action(&self, id: &str) -> Result<bool> {
    let conn = self.conn()?;
    let removed = conn.execute("DELETE FROM offline_queue WHERE id = ?", params![id])?;
    Ok(removed > 0)
  }

  pub fn count_actions(&self) -> Result<usize> {
    let conn = self.conn()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM offline_queue", [], |row| row.get(0))?;
    Ok(count as usize)
  }

  pub fn clear_actions(&self) -> Result<usize> {
    let conn = self.conn()?;
    Ok(conn.execute("DELETE FROM offline_queue", [])?)
  }
}
