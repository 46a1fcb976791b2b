//! Error types for the offline layer.

use thiserror::Error;

use crate::network::TransportError;

#[derive(Error, Debug)]
pub enum Error {
  /// The local database could not be opened or migrated. Nothing above the
  /// store works without it.
  #[error("Offline store unavailable: {0}")]
  StoreUnavailable(String),

  #[error("Store error: {0}")]
  Store(#[from] rusqlite::Error),

  #[error("Unknown collection: {0}")]
  UnknownCollection(String),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The request never produced a response.
  #[error("Network error: {0}")]
  Network(#[from] TransportError),

  /// The server answered with a non-success status.
  #[error("HTTP {status}: {body}")]
  Http {
    status: u16,
    body: serde_json::Value,
  },

  #[error("Configuration error: {0}")]
  Config(String),

  #[error("Lock poisoned: {0}")]
  Poisoned(String),
}

impl Error {
  /// Whether this error means the server could not be reached at all.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, Error::Network(e) if e.is_connectivity())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
