//! Error types shared by every storage backend.

use thiserror::Error;

use crate::types::DevlogId;

/// All errors a storage provider can surface.
#[derive(Debug, Error)]
pub enum StorageError {
  /// The id is structurally malformed (non-numeric, zero or negative).
  #[error("invalid devlog identifier: {0}")]
  InvalidIdentifier(String),

  #[error("devlog entry not found: {0}")]
  NotFound(DevlogId),

  /// The remote signalled a rate limit. Consumed by the rate limiter, which
  /// retries it; callers only see it if they bypass the limiter.
  #[error("rate limited by remote: {0}")]
  RateLimited(String),

  #[error("rate limit exceeded after {attempts} attempts")]
  RateLimitExceeded { attempts: u32 },

  /// Network failures, timeouts and 5xx responses.
  #[error("remote unavailable: {0}")]
  RemoteUnavailable(String),

  #[error("remote error (HTTP {status}): {message}")]
  Remote { status: u16, message: String },

  /// The remote returned fewer results than it reported, either because the
  /// search API caps result sets or because it timed out part of the query.
  #[error("incomplete remote results: fetched {fetched} of {total}")]
  IncompleteResults { fetched: usize, total: u64 },

  /// Reserved for bidirectional conflict detection. Reconciliation is
  /// timestamp-wins and does not raise it.
  #[error("sync conflict: {0}")]
  SyncConflict(String),

  #[error("configuration error: {0}")]
  Configuration(String),

  #[error("{0} storage used before initialize()")]
  NotInitialized(&'static str),

  #[error("database error: {0}")]
  Database(#[from] rusqlite::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("yaml error: {0}")]
  Yaml(#[from] serde_yaml::Error),
}

impl StorageError {
  /// Whether the rate limiter should retry this error.
  pub fn is_rate_limited(&self) -> bool {
    matches!(self, StorageError::RateLimited(_))
  }
}

/// A specialized Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
