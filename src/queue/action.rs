//! Deferred mutations captured while offline.

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::network::{HttpMethod, HttpRequest};

/// UI-facing classification of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionType {
  Create,
  Update,
  Delete,
}

impl ActionType {
  pub fn as_str(self) -> &'static str {
    match self {
      ActionType::Create => "CREATE",
      ActionType::Update => "UPDATE",
      ActionType::Delete => "DELETE",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "CREATE" => Some(ActionType::Create),
      "UPDATE" => Some(ActionType::Update),
      "DELETE" => Some(ActionType::Delete),
      _ => None,
    }
  }
}

/// The verbs that can be queued. GET never is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationMethod {
  Post,
  Patch,
  Put,
  Delete,
}

impl MutationMethod {
  pub fn from_http(method: HttpMethod) -> Option<Self> {
    match method {
      HttpMethod::Get => None,
      HttpMethod::Post => Some(MutationMethod::Post),
      HttpMethod::Patch => Some(MutationMethod::Patch),
      HttpMethod::Put => Some(MutationMethod::Put),
      HttpMethod::Delete => Some(MutationMethod::Delete),
    }
  }

  pub fn as_http(self) -> HttpMethod {
    match self {
      MutationMethod::Post => HttpMethod::Post,
      MutationMethod::Patch => HttpMethod::Patch,
      MutationMethod::Put => HttpMethod::Put,
      MutationMethod::Delete => HttpMethod::Delete,
    }
  }

  pub fn action_type(self) -> ActionType {
    match self {
      MutationMethod::Post => ActionType::Create,
      MutationMethod::Patch | MutationMethod::Put => ActionType::Update,
      MutationMethod::Delete => ActionType::Delete,
    }
  }
}

/// A mutation waiting to be replayed against the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
  pub id: String,
  #[serde(rename = "type")]
  pub action_type: ActionType,
  pub entity_type: String,
  pub endpoint: String,
  pub method: MutationMethod,
  pub data: Value,
  /// Enqueue time in Unix milliseconds; the only ordering key.
  pub timestamp: i64,
  pub retries: u32,
  /// Earliest time (Unix ms) a queue drain may replay this action again.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub next_attempt_at: Option<i64>,
}

impl QueuedAction {
  pub fn new(
    method: MutationMethod,
    endpoint: impl Into<String>,
    entity_type: impl Into<String>,
    data: Value,
    now: DateTime<Utc>,
  ) -> Self {
    let entity_type = entity_type.into();
    let timestamp = now.timestamp_millis();

    Self {
      id: generate_id(&entity_type, timestamp),
      action_type: method.action_type(),
      entity_type,
      endpoint: endpoint.into(),
      method,
      data,
      timestamp,
      retries: 0,
      next_attempt_at: None,
    }
  }

  /// Whether a queue drain at `now_ms` may replay this action.
  pub fn is_eligible(&self, now_ms: i64) -> bool {
    self.next_attempt_at.map_or(true, |at| at <= now_ms)
  }

  /// The request replayed for this action.
  pub fn to_request(&self) -> HttpRequest {
    let body = match &self.data {
      Value::Null => None,
      data => Some(data.clone()),
    };
    HttpRequest::new(self.method.as_http(), self.endpoint.clone(), body)
  }
}

/// `<entityType>_<timestamp>_<random>`; the suffix keeps ids unique when two
/// actions are queued in the same millisecond.
fn generate_id(entity_type: &str, timestamp: i64) -> String {
  let suffix: String = rand::rng()
    .sample_iter(&Alphanumeric)
    .take(9)
    .map(|c| char::from(c).to_ascii_lowercase())
    .collect();
  format!("{}_{}_{}", entity_type, timestamp, suffix)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::collections::HashSet;

  #[test]
  fn test_action_type_follows_method() {
    assert_eq!(MutationMethod::Post.action_type(), ActionType::Create);
    assert_eq!(MutationMethod::Patch.action_type(), ActionType::Update);
    assert_eq!(MutationMethod::Put.action_type(), ActionType::Update);
    assert_eq!(MutationMethod::Delete.action_type(), ActionType::Delete);
    assert_eq!(MutationMethod::from_http(HttpMethod::Get), None);
  }

  #[test]
  fn test_new_action_starts_unretried() {
    let action = QueuedAction::new(
      MutationMethod::Patch,
      "/api/tasks/5",
      "tasks",
      json!({"status": "done"}),
      Utc::now(),
    );
    assert_eq!(action.retries, 0);
    assert!(action.id.starts_with(&format!("tasks_{}_", action.timestamp)));
    assert!(action.is_eligible(action.timestamp));
  }

  #[test]
  fn test_ids_unique_within_same_millisecond() {
    let now = Utc::now();
    let ids: HashSet<String> = (0..200)
      .map(|_| QueuedAction::new(MutationMethod::Post, "/api/tasks", "tasks", json!({}), now).id)
      .collect();
    assert_eq!(ids.len(), 200);
  }

  #[test]
  fn test_wire_shape() {
    let mut action = QueuedAction::new(
      MutationMethod::Patch,
      "/api/tasks/5",
      "tasks",
      json!({"status": "done"}),
      Utc::now(),
    );
    action.id = "tasks_1_abc".into();
    action.timestamp = 1;

    let value = serde_json::to_value(&action).unwrap();
    assert_eq!(
      value,
      json!({
        "id": "tasks_1_abc",
        "type": "UPDATE",
        "entityType": "tasks",
        "endpoint": "/api/tasks/5",
        "method": "PATCH",
        "data": {"status": "done"},
        "timestamp": 1,
        "retries": 0
      })
    );
  }

  #[test]
  fn test_eligibility_respects_next_attempt() {
    let mut action = QueuedAction::new(MutationMethod::Delete, "/api/tasks/1", "tasks", Value::Null, Utc::now());
    action.next_attempt_at = Some(5_000);
    assert!(!action.is_eligible(4_999));
    assert!(action.is_eligible(5_000));
    assert_eq!(action.to_request().body, None);
  }
}
