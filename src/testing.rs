//! Test doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::network::{HttpRequest, HttpResponse, HttpTransport, TransportError};

type Scripted = Result<HttpResponse, TransportError>;

/// Transport that replays scripted outcomes in order and records every
/// request it receives.
pub struct ScriptedTransport {
  script: Mutex<VecDeque<Scripted>>,
  fallback: Scripted,
  calls: Mutex<Vec<HttpRequest>>,
  delay: Option<Duration>,
}

impl ScriptedTransport {
  /// Answers 200 once the script runs out.
  pub fn new() -> Self {
    Self::with_fallback(Ok(HttpResponse::new(200, Value::Null)))
  }

  /// Fails with a connectivity error once the script runs out.
  pub fn unreachable() -> Self {
    Self::with_fallback(Err(TransportError::unreachable("connection refused")))
  }

  pub fn with_fallback(fallback: Scripted) -> Self {
    Self {
      script: Mutex::new(VecDeque::new()),
      fallback,
      calls: Mutex::new(Vec::new()),
      delay: None,
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn push_response(&self, status: u16, body: Value) {
    self
      .script
      .lock()
      .unwrap()
      .push_back(Ok(HttpResponse::new(status, body)));
  }

  pub fn push_error(&self, error: TransportError) {
    self.script.lock().unwrap().push_back(Err(error));
  }

  pub fn calls(&self) -> Vec<HttpRequest> {
    self.calls.lock().unwrap().clone()
  }
}

impl HttpTransport for ScriptedTransport {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    self.calls.lock().unwrap().push(request.clone());
    let outcome = self
      .script
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or_else(|| self.fallback.clone());

    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    outcome
  }
}
