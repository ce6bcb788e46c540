//! Durable key-value persistence port
//!
//! The queue is stored as a single JSON document under one key. Adapters:
//! - [`MemoryKvStore`]: process-local, for tests and ephemeral hosts
//! - [`FileKvStore`]: one file per key, replaced atomically
//! - [`SqliteKvStore`]: a `kv` table in a WAL-mode SQLite database

mod file;
mod memory;
mod sqlite;

pub use file::FileKvStore;
pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

use async_trait::async_trait;

use crate::error::Result;

/// Async string key-value store.
///
/// Every `set` is a full replace of the value; adapters must never leave a
/// partially written value visible to a later `get`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing an absent key is not an error
    async fn remove(&self, key: &str) -> Result<()>;
}
