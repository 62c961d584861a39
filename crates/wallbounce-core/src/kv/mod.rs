//! Key-value store abstraction used for session persistence.
//!
//! The core assumes only per-key atomicity for single operations; it never
//! relies on multi-key transactions. Two implementations ship:
//!
//! - [`MemoryKvStore`]: in-process default, suitable for tests and
//!   single-process deployments without durability.
//! - [`SqliteKvStore`]: durable store over SQLite (WAL mode), selected at
//!   construction when a database path is configured.

mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

use std::time::Duration;

use crate::error::KvError;

/// Abstract key-value store with TTL support and a string-set type.
///
/// Implementations must be safe for concurrent use. Expired keys behave
/// as absent from every read operation.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value stored at `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Store `value` at `key`. A `ttl` of `None` means the key never expires.
    /// Overwrites any previous value and TTL.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Add `member` to the set stored at `set_key`. Idempotent.
    async fn set_add_member(&self, set_key: &str, member: &str) -> Result<(), KvError>;

    /// List all members of the set stored at `set_key`.
    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, KvError>;

    /// Remove `member` from the set stored at `set_key`. Idempotent.
    async fn set_remove_member(&self, set_key: &str, member: &str) -> Result<(), KvError>;
}
