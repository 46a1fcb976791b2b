//! Transport abstraction between the offline layer and the HTTP stack.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use thiserror::Error;

/// HTTP verbs the layer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl HttpMethod {
  pub fn as_str(self) -> &'static str {
    match self {
      HttpMethod::Get => "GET",
      HttpMethod::Post => "POST",
      HttpMethod::Put => "PUT",
      HttpMethod::Patch => "PATCH",
      HttpMethod::Delete => "DELETE",
    }
  }
}

impl fmt::Display for HttpMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for HttpMethod {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(HttpMethod::Get),
      "POST" => Ok(HttpMethod::Post),
      "PUT" => Ok(HttpMethod::Put),
      "PATCH" => Ok(HttpMethod::Patch),
      "DELETE" => Ok(HttpMethod::Delete),
      other => Err(format!("unsupported HTTP method: {}", other)),
    }
  }
}

/// An outbound request, path relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
  pub method: HttpMethod,
  pub path: String,
  pub body: Option<Value>,
}

impl HttpRequest {
  pub fn new(method: HttpMethod, path: impl Into<String>, body: Option<Value>) -> Self {
    Self {
      method,
      path: path.into(),
      body,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(HttpMethod::Get, path, None)
  }
}

/// A response that made it back from the server, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: Value,
}

impl HttpResponse {
  pub fn new(status: u16, body: Value) -> Self {
    Self { status, body }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// How a request failed to produce a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
  /// The client knows it has no connectivity.
  Offline,
  /// Connection could not be established or was dropped.
  Unreachable,
  /// No response within the client timeout.
  Timeout,
  /// Anything else (malformed request, TLS setup, ...).
  Other,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
  pub kind: TransportErrorKind,
  pub message: String,
}

impl TransportError {
  pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }

  pub fn offline() -> Self {
    Self::new(TransportErrorKind::Offline, "client is offline")
  }

  pub fn unreachable(message: impl Into<String>) -> Self {
    Self::new(TransportErrorKind::Unreachable, message)
  }

  /// Connectivity-class failure, as opposed to a local or application fault.
  pub fn is_connectivity(&self) -> bool {
    !matches!(self.kind, TransportErrorKind::Other)
  }
}

/// Sends requests to the remote API.
///
/// `Ok` means a response was received (including 4xx/5xx). `Err` means no
/// response exists, and the error's kind tells connectivity failures apart
/// from everything else.
pub trait HttpTransport: Send + Sync + 'static {
  fn send(
    &self,
    request: &HttpRequest,
  ) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_method_case_insensitive() {
    assert_eq!("patch".parse::<HttpMethod>(), Ok(HttpMethod::Patch));
    assert_eq!("DELETE".parse::<HttpMethod>(), Ok(HttpMethod::Delete));
    assert!("TRACE".parse::<HttpMethod>().is_err());
  }

  #[test]
  fn test_success_range() {
    assert!(HttpResponse::new(200, Value::Null).is_success());
    assert!(HttpResponse::new(201, Value::Null).is_success());
    assert!(HttpResponse::new(204, Value::Null).is_success());
    assert!(!HttpResponse::new(304, Value::Null).is_success());
    assert!(!HttpResponse::new(404, Value::Null).is_success());
    assert!(!HttpResponse::new(500, Value::Null).is_success());
  }

  #[test]
  fn test_connectivity_classification() {
    assert!(TransportError::offline().is_connectivity());
    assert!(TransportError::unreachable("refused").is_connectivity());
    assert!(TransportError::new(TransportErrorKind::Timeout, "slow").is_connectivity());
    assert!(!TransportError::new(TransportErrorKind::Other, "bad url").is_connectivity());
  }
}
