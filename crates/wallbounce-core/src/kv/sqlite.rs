//! Durable `KvStore` implementation over SQLite.
//!
//! Uses SQLx with WAL mode for concurrent access, mirroring the behavior of
//! a remote cache: values carry an optional expiry and expired rows are
//! invisible to reads and opportunistically purged on writes.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use super::KvStore;
use crate::error::KvError;

/// Type alias for the SQLite connection pool.
pub type DbPool = sqlx::SqlitePool;

/// Durable key-value store backed by SQLite.
pub struct SqliteKvStore {
    pool: DbPool,
}

impl SqliteKvStore {
    /// Open (or create) the database at `db_path` and run migrations.
    pub async fn open(db_path: &str) -> Result<Self, KvError> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| KvError::Connection {
                source: sqlx::Error::Configuration(
                    format!("failed to create directory {}: {e}", parent.display()).into(),
                ),
            })?;
        }

        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| KvError::Connection { source: e })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .connect_with(connect_options)
            .await
            .map_err(|e| KvError::Connection { source: e })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| KvError::Migration { source: e })?;

        Ok(Self { pool })
    }

    /// Open an in-memory SQLite database (used in tests).
    pub async fn open_in_memory() -> Result<Self, KvError> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| KvError::Connection { source: e })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(|e| KvError::Connection { source: e })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| KvError::Migration { source: e })?;

        Ok(Self { pool })
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn now_unix() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[async_trait::async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let now = Self::now_unix();
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            "SELECT value FROM kv_entries
             WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| KvError::Query { source: e })?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        let expires_at = ttl.map(|t| Self::now_unix() + t.as_secs() as i64);

        sqlx::query(
            "INSERT INTO kv_entries (key, value, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| KvError::Query { source: e })?;

        // Opportunistic purge of expired rows.
        sqlx::query("DELETE FROM kv_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(Self::now_unix())
            .execute(&self.pool)
            .await
            .map_err(|e| KvError::Query { source: e })?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| KvError::Query { source: e })?;
        Ok(())
    }

    async fn set_add_member(&self, set_key: &str, member: &str) -> Result<(), KvError> {
        sqlx::query("INSERT OR IGNORE INTO kv_set_members (set_key, member) VALUES (?, ?)")
            .bind(set_key)
            .bind(member)
            .execute(&self.pool)
            .await
            .map_err(|e| KvError::Query { source: e })?;
        Ok(())
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, KvError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT member FROM kv_set_members WHERE set_key = ? ORDER BY member")
                .bind(set_key)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| KvError::Query { source: e })?;

        Ok(rows.into_iter().map(|(m,)| m).collect())
    }

    async fn set_remove_member(&self, set_key: &str, member: &str) -> Result<(), KvError> {
        sqlx::query("DELETE FROM kv_set_members WHERE set_key = ? AND member = ?")
            .bind(set_key)
            .bind(member)
            .execute(&self.pool)
            .await
            .map_err(|e| KvError::Query { source: e })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_in_memory() {
        let store = SqliteKvStore::open_in_memory().await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", b"hello", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"hello".to_vec()));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_keys_are_invisible() {
        let store = SqliteKvStore::open_in_memory().await.unwrap();

        // A zero TTL expires immediately (expires_at == now is not > now).
        store.set("k", b"v", Some(Duration::ZERO)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        store
            .set("k2", b"v2", Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(store.get("k2").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn set_members_sorted_and_idempotent() {
        let store = SqliteKvStore::open_in_memory().await.unwrap();

        store.set_add_member("s", "beta").await.unwrap();
        store.set_add_member("s", "alpha").await.unwrap();
        store.set_add_member("s", "beta").await.unwrap();

        assert_eq!(store.set_members("s").await.unwrap(), vec!["alpha", "beta"]);

        store.set_remove_member("s", "alpha").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["beta"]);
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("kv.db");
        let store = SqliteKvStore::open(path.to_str().unwrap()).await.unwrap();
        store.set("k", b"v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        store.close().await;
    }
}
