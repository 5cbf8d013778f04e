//! Two-tier caching for fetched dashboard data.
//!
//! This module provides:
//! - Deterministic cache keys from an endpoint and its parameters
//! - A bounded in-process tier with insertion-order eviction
//! - A durable tier behind the [`PersistentStore`] trait (SQLite by default)
//! - Stale-while-revalidate reads and a periodic expiry sweep

mod entry;
mod key;
mod layer;
mod memory;
mod storage;

pub use entry::{CacheEntry, CachePreset};
pub use key::{cache_key, Params};
pub use layer::{CacheOptions, CacheStats, CacheStore};
pub use storage::{MemoryStore, PersistentStore, SqliteStore};
