//! Two-tier cache store: a bounded in-process map in front of durable storage.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;

use super::entry::{CacheEntry, CachePreset};
use super::key::{cache_key, endpoint_prefix, Params};
use super::memory::MemoryTier;
use super::storage::PersistentStore;

/// Prefix for every key this cache writes to durable storage.
const STORAGE_PREFIX: &str = "cache:";

/// Remaining lifetime below which an entry should be refreshed.
const REFRESH_THRESHOLD: Duration = Duration::from_secs(30);

/// Tuning for a [`CacheStore`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
  /// Lifetime of fast-tier entries
  pub memory_ttl: Duration,
  /// Lifetime of durable-tier entries
  pub storage_ttl: Duration,
  /// Fast-tier capacity
  pub max_memory_items: usize,
  /// How often expired fast-tier entries are swept
  pub sweep_interval: Duration,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self::from_preset(CachePreset::OrdersSummary)
  }
}

impl CacheOptions {
  pub fn from_preset(preset: CachePreset) -> Self {
    let (memory_ttl, storage_ttl) = preset.ttls();
    Self {
      memory_ttl,
      storage_ttl,
      max_memory_items: 100,
      sweep_interval: Duration::from_secs(60),
    }
  }
}

/// Entry counts and lifetimes, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
  pub memory_entries: usize,
  pub storage_entries: usize,
  pub memory_ttl: Duration,
  pub storage_ttl: Duration,
}

struct CacheInner {
  memory: Mutex<MemoryTier>,
  storage: Arc<dyn PersistentStore>,
  options: CacheOptions,
  sweeper: Mutex<Option<AbortHandle>>,
}

/// Cache with a fast in-process tier and a durable tier.
///
/// Reads check memory first, then storage; storage hits are promoted into
/// memory. Storage failures are logged and otherwise ignored, so the cache
/// degrades to memory-only operation instead of failing callers.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct CacheStore {
  inner: Arc<CacheInner>,
}

impl CacheStore {
  /// Create a store over `storage`.
  ///
  /// When called inside a tokio runtime, a background task sweeps expired
  /// memory entries every `sweep_interval` until [`CacheStore::dispose`] is
  /// called or the last clone is dropped.
  pub fn new(storage: impl PersistentStore + 'static, options: CacheOptions) -> Self {
    Self::with_shared_storage(Arc::new(storage), options)
  }

  pub fn with_shared_storage(storage: Arc<dyn PersistentStore>, options: CacheOptions) -> Self {
    let inner = Arc::new(CacheInner {
      memory: Mutex::new(MemoryTier::new(options.max_memory_items)),
      storage,
      options,
      sweeper: Mutex::new(None),
    });

    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        let task = handle.spawn(sweep_loop(
          Arc::downgrade(&inner),
          inner.options.sweep_interval,
        ));
        *lock(&inner.sweeper) = Some(task.abort_handle());
      }
      Err(_) => tracing::warn!("No async runtime available, periodic cache sweep disabled"),
    }

    Self { inner }
  }

  pub fn options(&self) -> &CacheOptions {
    &self.inner.options
  }

  /// Look up a cached value.
  ///
  /// Returns `None` on a miss, on expiry, or when the stored value does not
  /// deserialize as `T`.
  pub fn get<T: DeserializeOwned>(&self, endpoint: &str, params: &Params) -> Option<T> {
    let key = cache_key(endpoint, params);
    let now = Utc::now();

    let from_memory = self
      .inner
      .memory()
      .get(&key, now)
      .map(|entry| entry.data.clone());
    if let Some(value) = from_memory {
      match serde_json::from_value(value) {
        Ok(data) => {
          tracing::debug!(key = %key, "memory cache hit");
          return Some(data);
        }
        Err(e) => {
          tracing::warn!(key = %key, error = %e, "Cached value has unexpected shape");
          self.inner.memory().remove(&key);
        }
      }
    }

    if let Some(entry) = self.inner.read_storage(&key, now) {
      match serde_json::from_value::<T>(entry.data.clone()) {
        Ok(data) => {
          tracing::debug!(key = %key, "storage cache hit");
          // Promote, without outliving the durable copy.
          let promoted = CacheEntry::new(entry.data, now, self.inner.options.memory_ttl);
          let expires_at = promoted.expires_at.min(entry.expires_at);
          self.inner.write_memory(
            key,
            CacheEntry {
              expires_at,
              ..promoted
            },
          );
          return Some(data);
        }
        Err(e) => {
          tracing::warn!(key = %key, error = %e, "Stored value has unexpected shape");
          return None;
        }
      }
    }

    tracing::debug!(key = %key, "cache miss");
    None
  }

  /// Store a value in both tiers.
  ///
  /// `ttl_override` replaces the default lifetime of both tiers. Never fails:
  /// serialization and storage errors are logged.
  pub fn set<T: Serialize>(
    &self,
    endpoint: &str,
    params: &Params,
    data: &T,
    ttl_override: Option<Duration>,
  ) {
    let options = &self.inner.options;
    let memory_ttl = ttl_override.unwrap_or(options.memory_ttl);
    let storage_ttl = ttl_override.unwrap_or(options.storage_ttl);
    self.write(endpoint, params, data, memory_ttl, storage_ttl);
  }

  /// Store a value with the per-tier lifetimes of `preset`.
  pub fn set_with_preset<T: Serialize>(
    &self,
    endpoint: &str,
    params: &Params,
    data: &T,
    preset: CachePreset,
  ) {
    let (memory_ttl, storage_ttl) = preset.ttls();
    self.write(endpoint, params, data, memory_ttl, storage_ttl);
  }

  fn write<T: Serialize>(
    &self,
    endpoint: &str,
    params: &Params,
    data: &T,
    memory_ttl: Duration,
    storage_ttl: Duration,
  ) {
    let key = cache_key(endpoint, params);
    let value = match serde_json::to_value(data) {
      Ok(value) => value,
      Err(e) => {
        tracing::warn!(key = %key, error = %e, "Failed to serialize value for caching");
        return;
      }
    };

    let now = Utc::now();
    tracing::debug!(key = %key, "caching value");
    self
      .inner
      .write_storage(&key, &CacheEntry::new(&value, now, storage_ttl));
    self
      .inner
      .write_memory(key, CacheEntry::new(value, now, memory_ttl));
  }

  /// Drop one entry from both tiers.
  pub fn invalidate(&self, endpoint: &str, params: &Params) {
    let key = cache_key(endpoint, params);
    tracing::debug!(key = %key, "invalidating cache entry");
    self.inner.memory().remove(&key);
    self.inner.remove_storage(&key);
  }

  /// Drop every entry of an endpoint, whatever its parameters.
  pub fn invalidate_endpoint(&self, endpoint: &str) {
    let prefix = endpoint_prefix(endpoint);
    let from_memory = self.inner.memory().remove_prefix(&prefix);
    let from_storage = self
      .inner
      .remove_storage_where(|key| key.starts_with(&prefix));
    tracing::info!(
      endpoint,
      memory = from_memory,
      storage = from_storage,
      "Invalidated endpoint cache"
    );
  }

  /// Drop every entry from both tiers.
  pub fn clear(&self) {
    self.inner.memory().clear();
    let removed = self.inner.remove_storage_where(|_| true);
    tracing::info!(storage = removed, "Cleared cache");
  }

  /// Stale-while-revalidate read.
  ///
  /// With a cached value, returns it at once and runs `fetcher` on a spawned
  /// task; a successful fetch overwrites the entry, a failed one is logged and
  /// the old value stays. Without a cached value, awaits `fetcher`, caches and
  /// returns its result.
  pub async fn refresh_in_background<T, E, F, Fut>(
    &self,
    endpoint: &str,
    params: &Params,
    fetcher: F,
  ) -> Result<T, E>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    E: Display + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    if let Some(cached) = self.get::<T>(endpoint, params) {
      let store = self.clone();
      let endpoint = endpoint.to_string();
      let params = params.clone();
      tokio::spawn(async move {
        match fetcher().await {
          Ok(fresh) => {
            store.set(&endpoint, &params, &fresh, None);
            tracing::debug!(endpoint = %endpoint, "background refresh completed");
          }
          Err(e) => {
            tracing::warn!(endpoint = %endpoint, error = %e, "Background refresh failed");
          }
        }
      });
      return Ok(cached);
    }

    let fresh = fetcher().await?;
    self.set(endpoint, params, &fresh, None);
    Ok(fresh)
  }

  /// Whether the memory entry is missing or about to expire.
  pub fn should_refresh(&self, endpoint: &str, params: &Params) -> bool {
    let key = cache_key(endpoint, params);
    match self.inner.memory().peek(&key) {
      Some(entry) => entry.remaining_at(Utc::now()) <= REFRESH_THRESHOLD,
      None => true,
    }
  }

  /// Remove expired memory entries now, without waiting for the sweep task.
  pub fn sweep_expired(&self) -> usize {
    self.inner.sweep_memory()
  }

  pub fn stats(&self) -> CacheStats {
    let storage_entries = self
      .inner
      .storage_keys()
      .map(|keys| keys.len())
      .unwrap_or(0);
    CacheStats {
      memory_entries: self.inner.memory().len(),
      storage_entries,
      memory_ttl: self.inner.options.memory_ttl,
      storage_ttl: self.inner.options.storage_ttl,
    }
  }

  /// Stop the periodic sweep. Cached data stays readable.
  pub fn dispose(&self) {
    if let Some(task) = lock(&self.inner.sweeper).take() {
      task.abort();
      tracing::debug!("cache sweep stopped");
    }
  }
}

async fn sweep_loop(inner: Weak<CacheInner>, period: Duration) {
  let mut ticker = tokio::time::interval(period);
  // The first tick completes immediately.
  ticker.tick().await;
  loop {
    ticker.tick().await;
    let Some(inner) = inner.upgrade() else {
      break;
    };
    let removed = inner.sweep_memory();
    if removed > 0 {
      tracing::debug!(removed, "swept expired memory cache entries");
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  // The guarded maps stay consistent even if a holder panicked.
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CacheInner {
  fn memory(&self) -> MutexGuard<'_, MemoryTier> {
    lock(&self.memory)
  }

  fn write_memory(&self, key: String, entry: CacheEntry<Value>) {
    if let Some(evicted) = self.memory().insert(key, entry) {
      tracing::debug!(key = %evicted, "evicted oldest memory cache entry");
    }
  }

  fn sweep_memory(&self) -> usize {
    self.memory().sweep_expired(Utc::now())
  }

  fn read_storage(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry<Value>> {
    let storage_key = storage_key(key);
    let raw = match self.storage.get_item(&storage_key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        tracing::warn!(key, error = %e, "Cache storage read error");
        return None;
      }
    };

    match serde_json::from_str::<CacheEntry<Value>>(&raw) {
      Ok(entry) if !entry.is_expired_at(now) => Some(entry),
      Ok(_) => {
        self.remove_storage(key);
        None
      }
      Err(e) => {
        tracing::warn!(key, error = %e, "Discarding corrupt cache storage entry");
        self.remove_storage(key);
        None
      }
    }
  }

  fn write_storage(&self, key: &str, entry: &CacheEntry<&Value>) {
    let raw = match serde_json::to_string(entry) {
      Ok(raw) => raw,
      Err(e) => {
        tracing::warn!(key, error = %e, "Failed to encode cache storage entry");
        return;
      }
    };

    if let Err(e) = self.storage.set_item(&storage_key(key), &raw) {
      tracing::warn!(key, error = %e, "Cache storage write error");
      let removed = self.sweep_storage(Utc::now());
      tracing::debug!(removed, "swept expired cache storage entries");
    }
  }

  fn remove_storage(&self, key: &str) {
    if let Err(e) = self.storage.remove_item(&storage_key(key)) {
      tracing::warn!(key, error = %e, "Cache storage remove error");
    }
  }

  fn storage_keys(&self) -> Option<Vec<String>> {
    match self.storage.keys() {
      Ok(keys) => Some(
        keys
          .into_iter()
          .filter(|k| k.starts_with(STORAGE_PREFIX))
          .collect(),
      ),
      Err(e) => {
        tracing::warn!(error = %e, "Cache storage listing error");
        None
      }
    }
  }

  /// Remove storage entries whose cache key (without the storage prefix)
  /// matches `predicate`.
  fn remove_storage_where(&self, predicate: impl Fn(&str) -> bool) -> usize {
    let Some(keys) = self.storage_keys() else {
      return 0;
    };
    let mut removed = 0;
    for storage_key in keys {
      let key = &storage_key[STORAGE_PREFIX.len()..];
      if predicate(key) {
        match self.storage.remove_item(&storage_key) {
          Ok(()) => removed += 1,
          Err(e) => tracing::warn!(key, error = %e, "Cache storage remove error"),
        }
      }
    }
    removed
  }

  /// Remove expired and unreadable storage entries.
  fn sweep_storage(&self, now: DateTime<Utc>) -> usize {
    let Some(keys) = self.storage_keys() else {
      return 0;
    };
    let mut removed = 0;
    for storage_key in keys {
      let stale = match self.storage.get_item(&storage_key) {
        Ok(Some(raw)) => serde_json::from_str::<CacheEntry<Value>>(&raw)
          .map(|entry| entry.is_expired_at(now))
          .unwrap_or(true),
        Ok(None) => false,
        Err(_) => true,
      };
      if stale && self.storage.remove_item(&storage_key).is_ok() {
        removed += 1;
      }
    }
    removed
  }
}

fn storage_key(key: &str) -> String {
  format!("{}{}", STORAGE_PREFIX, key)
}
