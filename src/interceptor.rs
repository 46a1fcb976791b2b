//! Request interception: send, and queue mutations that cannot reach the
//! server.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::network::{
  ConnectivityProbe, HttpMethod, HttpRequest, HttpResponse, HttpTransport, RouteTable,
  TransportError,
};
use crate::queue::{MutationMethod, QueuedAction};
use crate::store::Store;

/// Status of the synthetic response returned for a queued mutation.
pub const QUEUED_STATUS: u16 = 202;

/// Body of the synthetic response returned for a queued mutation.
pub fn queued_body() -> Value {
  json!({
    "message": "Request queued for sync when online",
    "queued": true,
  })
}

/// Wraps every outbound call.
///
/// Successful responses pass through untouched and application errors
/// surface immediately. A mutating call that fails for lack of connectivity
/// is persisted as a [`QueuedAction`] and answered with a synthetic 202 so
/// callers can proceed optimistically.
pub struct RequestInterceptor<T: HttpTransport, P: ConnectivityProbe> {
  transport: Arc<T>,
  store: Arc<Store>,
  probe: Arc<P>,
  routes: RouteTable,
  clock: Arc<dyn Clock>,
}

impl<T: HttpTransport, P: ConnectivityProbe> Clone for RequestInterceptor<T, P> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      store: Arc::clone(&self.store),
      probe: Arc::clone(&self.probe),
      routes: self.routes.clone(),
      clock: Arc::clone(&self.clock),
    }
  }
}

impl<T: HttpTransport, P: ConnectivityProbe> RequestInterceptor<T, P> {
  pub fn new(transport: Arc<T>, store: Arc<Store>, probe: Arc<P>, routes: RouteTable) -> Self {
    Self {
      transport,
      store,
      probe,
      routes,
      clock: Arc::new(SystemClock),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Send a request, queueing it if it is a mutation and the server is
  /// unreachable.
  pub async fn send(
    &self,
    method: HttpMethod,
    path: &str,
    body: Option<Value>,
  ) -> Result<HttpResponse> {
    let request = HttpRequest::new(method, path, body);

    let failure = if self.probe.is_online() {
      match self.transport.send(&request).await {
        Ok(response) if response.is_success() => return Ok(response),
        Ok(response) => {
          return Err(Error::Http {
            status: response.status,
            body: response.body,
          })
        }
        Err(e) => e,
      }
    } else {
      TransportError::offline()
    };

    if !failure.is_connectivity() {
      return Err(Error::Network(failure));
    }

    let Some(mutation) = MutationMethod::from_http(method) else {
      debug!(%method, path, "Read failed while offline, not queueing");
      return Err(Error::Network(failure));
    };

    let entity_type = self.routes.entity_type(path);
    let action = QueuedAction::new(
      mutation,
      path,
      entity_type,
      request.body.unwrap_or(Value::Null),
      self.clock.now(),
    );

    match self.store.enqueue_action(&action) {
      Ok(()) => {
        info!(
          id = %action.id,
          %method,
          path,
          entity_type = %action.entity_type,
          "Queued request for sync when online"
        );
        Ok(HttpResponse::new(QUEUED_STATUS, queued_body()))
      }
      Err(e) => {
        warn!(%method, path, error = %e, "Failed to queue offline request");
        Err(Error::Network(failure))
      }
    }
  }

  pub async fn get(&self, path: &str) -> Result<HttpResponse> {
    self.send(HttpMethod::Get, path, None).await
  }

  pub async fn post(&self, path: &str, body: Value) -> Result<HttpResponse> {
    self.send(HttpMethod::Post, path, Some(body)).await
  }

  pub async fn put(&self, path: &str, body: Value) -> Result<HttpResponse> {
    self.send(HttpMethod::Put, path, Some(body)).await
  }

  pub async fn patch(&self, path: &str, body: Value) -> Result<HttpResponse> {
    self.send(HttpMethod::Patch, path, Some(body)).await
  }

  pub async fn delete(&self, path: &str) -> Result<HttpResponse> {
    self.send(HttpMethod::Delete, path, None).await
  }
}
