use std::time::Duration;
use thiserror::Error;

/// Failure of a coordinated request.
///
/// Cloneable so a single outcome can be handed to every caller that joined a
/// deduplicated request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  #[error("request to {url} timed out after {}ms", .timeout.as_millis())]
  Timeout { url: String, timeout: Duration },

  #[error("request to {url} failed: {message}")]
  Network {
    url: String,
    status: Option<u16>,
    message: String,
  },

  #[error("circuit breaker open for {endpoint}")]
  CircuitOpen { endpoint: String },

  #[error("request cancelled")]
  Cancelled,

  #[error("authorization expired for {url}")]
  AuthExpired { url: String },

  #[error("invalid response from {url}: {message}")]
  Decode { url: String, message: String },

  #[error("invalid url {url}: {message}")]
  InvalidUrl { url: String, message: String },
}

impl FetchError {
  /// Whether retrying the same request could succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, FetchError::Timeout { .. } | FetchError::Network { .. })
  }

  /// HTTP status of the failed response, when there was one.
  pub fn status(&self) -> Option<u16> {
    match self {
      FetchError::Network { status, .. } => *status,
      FetchError::AuthExpired { .. } => Some(401),
      _ => None,
    }
  }
}
