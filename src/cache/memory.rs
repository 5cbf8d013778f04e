//! Fast in-process tier.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

use super::entry::CacheEntry;

/// Bounded map of cache entries evicted in insertion order.
///
/// Re-setting an existing key keeps its original position, so the entry that
/// was first inserted is always the next to go.
#[derive(Debug)]
pub struct MemoryTier {
  entries: IndexMap<String, CacheEntry<Value>>,
  max_entries: usize,
}

impl MemoryTier {
  pub fn new(max_entries: usize) -> Self {
    Self {
      entries: IndexMap::new(),
      max_entries: max_entries.max(1),
    }
  }

  /// Look up a live entry, dropping it if it has expired.
  pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<&CacheEntry<Value>> {
    if self.entries.get(key)?.is_expired_at(now) {
      self.entries.shift_remove(key);
      return None;
    }
    self.entries.get(key)
  }

  /// Look at an entry without touching it, expired or not.
  pub fn peek(&self, key: &str) -> Option<&CacheEntry<Value>> {
    self.entries.get(key)
  }

  /// Insert an entry, returning the key evicted to make room, if any.
  pub fn insert(&mut self, key: String, entry: CacheEntry<Value>) -> Option<String> {
    if let Some(existing) = self.entries.get_mut(&key) {
      *existing = entry;
      return None;
    }

    let evicted = if self.entries.len() >= self.max_entries {
      self.entries.shift_remove_index(0).map(|(key, _)| key)
    } else {
      None
    };
    self.entries.insert(key, entry);
    evicted
  }

  pub fn remove(&mut self, key: &str) -> bool {
    self.entries.shift_remove(key).is_some()
  }

  /// Remove every key starting with `prefix`. Returns how many were removed.
  pub fn remove_prefix(&mut self, prefix: &str) -> usize {
    let before = self.entries.len();
    self.entries.retain(|key, _| !key.starts_with(prefix));
    before - self.entries.len()
  }

  /// Drop every expired entry. Returns how many were removed.
  pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
    let before = self.entries.len();
    self.entries.retain(|_, entry| !entry.is_expired_at(now));
    before - self.entries.len()
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  fn entry(n: i64, now: DateTime<Utc>) -> CacheEntry<Value> {
    CacheEntry::new(Value::from(n), now, Duration::from_secs(60))
  }

  #[test]
  fn test_evicts_first_inserted_when_full() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(3);
    for i in 0..3 {
      assert_eq!(tier.insert(format!("k{}", i), entry(i, now)), None);
    }

    let evicted = tier.insert("k3".to_string(), entry(3, now));
    assert_eq!(evicted.as_deref(), Some("k0"));
    assert_eq!(tier.len(), 3);
    assert!(tier.get("k0", now).is_none());
    for key in ["k1", "k2", "k3"] {
      assert!(tier.get(key, now).is_some(), "{} should be present", key);
    }
  }

  #[test]
  fn test_update_keeps_insertion_position() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(2);
    tier.insert("a".to_string(), entry(1, now));
    tier.insert("b".to_string(), entry(2, now));

    // Updating "a" does not make it younger than "b".
    assert_eq!(tier.insert("a".to_string(), entry(10, now)), None);
    assert_eq!(tier.get("a", now).map(|e| e.data.clone()), Some(Value::from(10)));

    let evicted = tier.insert("c".to_string(), entry(3, now));
    assert_eq!(evicted.as_deref(), Some("a"));
  }

  #[test]
  fn test_reads_do_not_refresh_position() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(2);
    tier.insert("a".to_string(), entry(1, now));
    tier.insert("b".to_string(), entry(2, now));
    assert!(tier.get("a", now).is_some());

    let evicted = tier.insert("c".to_string(), entry(3, now));
    assert_eq!(evicted.as_deref(), Some("a"));
  }

  #[test]
  fn test_expired_entry_is_dropped_on_read() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(4);
    tier.insert(
      "short".to_string(),
      CacheEntry::new(Value::Null, now, Duration::from_millis(5)),
    );

    let later = now + chrono::Duration::seconds(1);
    assert!(tier.get("short", later).is_none());
    assert!(tier.is_empty());
  }

  #[test]
  fn test_sweep_removes_only_expired() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(4);
    tier.insert(
      "old".to_string(),
      CacheEntry::new(Value::Null, now, Duration::from_millis(5)),
    );
    tier.insert("fresh".to_string(), entry(1, now));

    let removed = tier.sweep_expired(now + chrono::Duration::seconds(1));
    assert_eq!(removed, 1);
    assert!(tier.peek("fresh").is_some());
    assert!(tier.peek("old").is_none());
  }

  #[test]
  fn test_removal_keeps_remaining_order() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(3);
    for key in ["a", "b", "c"] {
      tier.insert(key.to_string(), entry(1, now));
    }
    assert!(tier.remove("b"));
    tier.insert("d".to_string(), entry(1, now));

    // "a" is still the oldest after a removal in the middle.
    assert_eq!(tier.insert("e".to_string(), entry(1, now)).as_deref(), Some("a"));
    assert_eq!(tier.insert("f".to_string(), entry(1, now)).as_deref(), Some("c"));
  }

  #[test]
  fn test_remove_prefix() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(10);
    tier.insert("orders:{}".to_string(), entry(1, now));
    tier.insert(r#"orders:{"page":2}"#.to_string(), entry(2, now));
    tier.insert("ordersummary:{}".to_string(), entry(3, now));

    assert_eq!(tier.remove_prefix("orders:"), 2);
    assert_eq!(tier.len(), 1);
    assert!(tier.peek("ordersummary:{}").is_some());
  }
}
