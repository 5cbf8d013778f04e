//! Durable key/value storage for the second cache tier.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key/value persistence that survives restarts.
///
/// Writes may fail (for instance when a quota is exhausted); callers treat the
/// tier as best effort.
pub trait PersistentStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  fn remove_item(&self, key: &str) -> Result<()>;

  fn keys(&self) -> Result<Vec<String>>;
}

/// In-process store, used for tests and for runs without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
  items: Mutex<BTreeMap<String, String>>,
  quota_bytes: Option<usize>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject writes once the stored values would exceed `bytes`.
  pub fn with_quota(bytes: usize) -> Self {
    Self {
      items: Mutex::new(BTreeMap::new()),
      quota_bytes: Some(bytes),
    }
  }

  fn items(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
    self.items.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl PersistentStore for MemoryStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    Ok(self.items()?.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let mut items = self.items()?;
    if let Some(quota) = self.quota_bytes {
      let used: usize = items
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(_, v)| v.len())
        .sum();
      if used + value.len() > quota {
        return Err(eyre!(
          "Storage quota exceeded: {} of {} bytes in use, {} requested",
          used,
          quota,
          value.len()
        ));
      }
    }
    items.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    self.items()?.remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(self.items()?.keys().cloned().collect())
  }
}

/// SQLite-based store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
  quota_bytes: Option<u64>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// A throwaway store living only as long as this value.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  /// Cap the total size of stored values.
  pub fn with_quota(mut self, bytes: u64) -> Self {
    self.quota_bytes = Some(bytes);
    self
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      quota_bytes: None,
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("orderdeck").join("cache.db"))
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl PersistentStore for SqliteStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let conn = self.conn()?;
    conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache item {}: {}", key, e))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let conn = self.conn()?;

    if let Some(quota) = self.quota_bytes {
      let used: i64 = conn
        .query_row(
          "SELECT COALESCE(SUM(LENGTH(value)), 0) FROM kv_store WHERE key != ?",
          params![key],
          |row| row.get(0),
        )
        .map_err(|e| eyre!("Failed to measure cache size: {}", e))?;
      let requested = value.len() as u64;
      if used.max(0) as u64 + requested > quota {
        return Err(eyre!(
          "Storage quota exceeded: {} of {} bytes in use, {} requested",
          used,
          quota,
          requested
        ));
      }
    }

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value, written_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to store cache item {}: {}", key, e))?;

    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove cache item {}: {}", key, e))?;
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv_store ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare key query: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list cache keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(store: &dyn PersistentStore) {
    assert_eq!(store.get_item("missing").unwrap(), None);

    store.set_item("cache:a", "1").unwrap();
    store.set_item("cache:b", "2").unwrap();
    store.set_item("cache:a", "3").unwrap();

    assert_eq!(store.get_item("cache:a").unwrap().as_deref(), Some("3"));
    assert_eq!(store.keys().unwrap(), vec!["cache:a", "cache:b"]);

    store.remove_item("cache:a").unwrap();
    assert_eq!(store.get_item("cache:a").unwrap(), None);
    assert_eq!(store.keys().unwrap(), vec!["cache:b"]);
  }

  #[test]
  fn test_memory_store_basics() {
    exercise(&MemoryStore::new());
  }

  #[test]
  fn test_sqlite_store_basics() {
    exercise(&SqliteStore::in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let store = SqliteStore::open(&path).unwrap();
      store.set_item("cache:orders", "[]").unwrap();
    }

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(
      reopened.get_item("cache:orders").unwrap().as_deref(),
      Some("[]")
    );
  }

  #[test]
  fn test_memory_quota_rejects_oversized_writes() {
    let store = MemoryStore::with_quota(10);
    store.set_item("a", "12345").unwrap();
    assert!(store.set_item("b", "123456").is_err());
    // Replacing a key only counts the new value.
    store.set_item("a", "1234567890").unwrap();
  }

  #[test]
  fn test_sqlite_quota_rejects_oversized_writes() {
    let store = SqliteStore::in_memory().unwrap().with_quota(8);
    store.set_item("a", "1234").unwrap();
    let err = store.set_item("b", "123456").unwrap_err();
    assert!(err.to_string().contains("quota"));
    assert_eq!(store.get_item("b").unwrap(), None);
  }
}
