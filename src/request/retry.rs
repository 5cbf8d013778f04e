//! Exponential backoff between retry attempts.
//!
//! The delay before retry `n` (1-based) is `base_delay * 2^(n-1)`, so with the
//! default one second base the waits are 1s, 2s, 4s, ... capped at
//! `max_delay`.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Delay after the first failed attempt
  pub base_delay: Duration,
  /// Cap for exponential growth
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
    }
  }
}

impl RetryPolicy {
  pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
    Self {
      base_delay,
      max_delay,
    }
  }

  /// Delay to wait after failed attempt number `attempt` (1-based).
  pub fn backoff_duration(&self, attempt: u32) -> Duration {
    if attempt == 0 {
      return Duration::ZERO;
    }
    let factor = 2u32.saturating_pow(attempt - 1);
    self
      .base_delay
      .checked_mul(factor)
      .unwrap_or(self.max_delay)
      .min(self.max_delay)
  }
}
