//! # strata-store
//!
//! Persistent key-value storage for client-side caches: the per-account
//! transaction ledger and the local profile copy.
//!
//! Everything stored here is a cache. Callers treat read and write
//! failures as non-fatal; the chain and the remote profile store remain
//! the source of truth.
//!
//! Two backends implement [`KvStore`]:
//! - [`MemoryStore`] for tests and ephemeral sessions
//! - [`SqliteStore`] backed by a single SQLite `kv` table (WAL mode,
//!   schema version in `PRAGMA user_version`)

pub mod keys;
pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Storage error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("quota exceeded: {0} bytes")]
    QuotaExceeded(usize),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A string key-value store with browser-storage semantics.
///
/// `get` returns `Ok(None)` for a missing key; `remove` of a missing key
/// is not an error.
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete `key`.
    fn remove(&self, key: &str) -> Result<()>;
}

impl<S: KvStore + ?Sized> KvStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

/// Open or create the SQLite-backed store at the given path.
pub fn open(path: &std::path::Path) -> Result<SqliteStore> {
    SqliteStore::open(path)
}

/// Open an in-memory SQLite store (for testing).
pub fn open_memory() -> Result<SqliteStore> {
    SqliteStore::open_memory()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory() {
        let store = open_memory().expect("open in-memory store");
        assert_eq!(store.schema_version().expect("version"), SCHEMA_VERSION);
    }

    #[test]
    fn test_arc_store_delegates() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.set("k", "v").expect("set");
        assert_eq!(store.get("k").expect("get").as_deref(), Some("v"));
        store.remove("k").expect("remove");
        assert!(store.get("k").expect("get").is_none());
    }
}
