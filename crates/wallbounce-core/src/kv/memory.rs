//! In-memory `KvStore` implementation.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::KvStore;
use crate::error::KvError;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory key-value store. The process-lifetime default.
///
/// Expiry is lazy: expired entries are dropped when read or overwritten,
/// not by a background sweeper.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // The entry exists but is expired; drop it under the write lock.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(Entry::expired) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn set_add_member(&self, set_key: &str, member: &str) -> Result<(), KvError> {
        let mut sets = self.sets.write().await;
        sets.entry(set_key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_members(&self, set_key: &str) -> Result<Vec<String>, KvError> {
        let sets = self.sets.read().await;
        let mut members: Vec<String> = sets
            .get(set_key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn set_remove_member(&self, set_key: &str, member: &str) -> Result<(), KvError> {
        let mut sets = self.sets.write().await;
        if let Some(set) = sets.get_mut(set_key) {
            set.remove(member);
            if set.is_empty() {
                sets.remove(set_key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_set_delete_roundtrip() {
        let store = MemoryKvStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", b"value", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"value".to_vec()));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expires_keys() {
        let store = MemoryKvStore::new();
        store
            .set("k", b"v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites_value_and_ttl() {
        let store = MemoryKvStore::new();
        store
            .set("k", b"old", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        store.set("k", b"new", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn set_membership_operations() {
        let store = MemoryKvStore::new();
        store.set_add_member("s", "a").await.unwrap();
        store.set_add_member("s", "b").await.unwrap();
        store.set_add_member("s", "a").await.unwrap();

        assert_eq!(store.set_members("s").await.unwrap(), vec!["a", "b"]);

        store.set_remove_member("s", "a").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["b"]);

        store.set_remove_member("s", "missing").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn empty_set_returns_empty_vec() {
        let store = MemoryKvStore::new();
        assert!(store.set_members("nope").await.unwrap().is_empty());
    }
}
