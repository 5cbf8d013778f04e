//! Per-endpoint circuit breaking.
//!
//! Breakers are keyed by URL path, so every query-string variant of an
//! endpoint shares one breaker. While a breaker is open, calls fail fast. Once
//! the recovery window has elapsed the next call is let through as a trial:
//! success closes the breaker, failure opens it again for a new window.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerPolicy {
  /// Consecutive failures that open the breaker
  pub failure_threshold: u32,
  /// How long an open breaker rejects calls
  pub recovery_window: Duration,
}

impl Default for CircuitBreakerPolicy {
  fn default() -> Self {
    Self {
      failure_threshold: 5,
      recovery_window: Duration::from_secs(60),
    }
  }
}

/// Failure bookkeeping for one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitState {
  pub consecutive_failures: u32,
  pub opened_at: Option<Instant>,
}

impl CircuitState {
  /// Whether calls are currently rejected.
  pub fn is_open(&self, now: Instant, recovery_window: Duration) -> bool {
    match self.opened_at {
      Some(opened_at) => now.saturating_duration_since(opened_at) < recovery_window,
      None => false,
    }
  }

  pub fn record_success(&mut self) {
    self.consecutive_failures = 0;
    self.opened_at = None;
  }

  /// Count a failure. Returns true when this failure opened the breaker.
  pub fn record_failure(&mut self, now: Instant, failure_threshold: u32) -> bool {
    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    if self.consecutive_failures >= failure_threshold {
      self.opened_at = Some(now);
      return true;
    }
    false
  }
}

/// The path component of `url`, used as the breaker key.
///
/// Relative URLs are accepted; anything after `?` or `#` is ignored.
pub fn endpoint_of(url: &str) -> String {
  match url::Url::parse(url) {
    Ok(parsed) => parsed.path().to_string(),
    Err(_) => url
      .split(['?', '#'])
      .next()
      .unwrap_or_default()
      .to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_endpoint_ignores_query() {
    assert_eq!(
      endpoint_of("https://api.example.com/orders?page=1&pageSize=50"),
      "/orders"
    );
    assert_eq!(
      endpoint_of("https://api.example.com/orders?page=2"),
      endpoint_of("https://api.example.com/orders")
    );
    assert_eq!(endpoint_of("/api/orders/external?page=3"), "/api/orders/external");
  }

  #[test]
  fn test_opens_at_threshold() {
    let now = Instant::now();
    let mut state = CircuitState::default();
    assert!(!state.record_failure(now, 3));
    assert!(!state.record_failure(now, 3));
    assert!(state.record_failure(now, 3));
    assert!(state.is_open(now, Duration::from_secs(60)));
  }

  #[test]
  fn test_window_elapses() {
    let now = Instant::now();
    let mut state = CircuitState::default();
    state.record_failure(now, 1);
    assert!(state.is_open(now + Duration::from_secs(59), Duration::from_secs(60)));
    assert!(!state.is_open(now + Duration::from_secs(60), Duration::from_secs(60)));
  }

  #[test]
  fn test_success_resets() {
    let now = Instant::now();
    let mut state = CircuitState::default();
    state.record_failure(now, 1);
    state.record_success();
    assert_eq!(state, CircuitState::default());
  }
}
