//! Cache entries and the presets used to size their lifetimes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A value with the window during which it may be served.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
  pub data: T,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub stored_at: DateTime<Utc>,
  #[serde(with = "chrono::serde::ts_milliseconds")]
  pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
  /// Create an entry stored at `now` that lives for `ttl`.
  ///
  /// A zero ttl is bumped to one millisecond so `expires_at` is always
  /// strictly after `stored_at`. Lifetimes past the representable range end
  /// at the latest representable time.
  pub fn new(data: T, now: DateTime<Utc>, ttl: Duration) -> Self {
    let expires_at = chrono::Duration::from_std(ttl)
      .ok()
      .map(|ttl| ttl.max(chrono::Duration::milliseconds(1)))
      .and_then(|ttl| now.checked_add_signed(ttl))
      .unwrap_or(DateTime::<Utc>::MAX_UTC);
    Self {
      data,
      stored_at: now,
      expires_at,
    }
  }

  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now > self.expires_at
  }

  /// Time left before expiry, zero once expired.
  pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
    (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
  }
}

/// Lifetime pairs for the kinds of data the dashboard caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePreset {
  OrdersSummary,
  OrderDetails,
  DashboardMetrics,
}

impl CachePreset {
  /// (memory ttl, storage ttl)
  pub fn ttls(self) -> (Duration, Duration) {
    match self {
      CachePreset::OrdersSummary => (minutes(5), minutes(30)),
      CachePreset::OrderDetails => (minutes(10), minutes(60)),
      CachePreset::DashboardMetrics => (minutes(2), minutes(10)),
    }
  }
}

fn minutes(n: u64) -> Duration {
  Duration::from_secs(n * 60)
}
