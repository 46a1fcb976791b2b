use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::transport::{
  HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError, TransportErrorKind,
};
use crate::config::{ApiConfig, Config};
use crate::error::{Error, Result};

/// reqwest-backed transport for the remote API.
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  base_url: Url,
  token: Option<String>,
}

impl ApiClient {
  pub fn new(api: &ApiConfig) -> Result<Self> {
    let base_url = Url::parse(&api.base_url)
      .map_err(|e| Error::Config(format!("Invalid API base URL {}: {}", api.base_url, e)))?;

    let client = Client::builder()
      .timeout(Duration::from_secs(api.timeout_secs))
      .build()
      .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      token: Config::get_api_token(),
    })
  }

  fn url_for(&self, path: &str) -> std::result::Result<Url, TransportError> {
    self
      .base_url
      .join(path)
      .map_err(|e| TransportError::new(TransportErrorKind::Other, format!("Bad path {}: {}", path, e)))
  }
}

fn to_reqwest(method: HttpMethod) -> Method {
  match method {
    HttpMethod::Get => Method::GET,
    HttpMethod::Post => Method::POST,
    HttpMethod::Put => Method::PUT,
    HttpMethod::Patch => Method::PATCH,
    HttpMethod::Delete => Method::DELETE,
  }
}

/// Map a reqwest failure onto connectivity vs. local faults.
fn classify(e: reqwest::Error) -> TransportError {
  let kind = if e.is_timeout() {
    TransportErrorKind::Timeout
  } else if e.is_connect() || e.is_request() {
    TransportErrorKind::Unreachable
  } else {
    TransportErrorKind::Other
  };
  TransportError::new(kind, e.to_string())
}

impl HttpTransport for ApiClient {
  async fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
    let url = self.url_for(&request.path)?;

    let mut builder = self.client.request(to_reqwest(request.method), url);
    if let Some(token) = &self.token {
      builder = builder.bearer_auth(token);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder.send().await.map_err(classify)?;
    let status = response.status().as_u16();
    let text = response.text().await.map_err(classify)?;

    // Non-JSON bodies are kept as plain strings
    let body = if text.is_empty() {
      Value::Null
    } else {
      serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    Ok(HttpResponse { status, body })
  }
}
