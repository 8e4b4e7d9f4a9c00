//! In-process `Store` implementation backing tests and local development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Store, TxOutcome};
use crate::error::Result;

/// A plain `HashMap<String, String>` guarded by an `RwLock`, shared by
/// `Clone` via an inner `Arc` so a single logical store can be handed to
/// multiple components (and cloned freely in tests).
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn hash_field_key(key: &str, field: &str) -> String {
        format!("{key}\u{0}{field}")
    }

    fn hash_prefix(key: &str) -> String {
        format!("{key}\u{0}")
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let full = Self::hash_field_key(key, field);
        Ok(self.data.read().await.get(&full).cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let full = Self::hash_field_key(key, field);
        self.data.write().await.insert(full, value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let prefix = Self::hash_prefix(key);
        let guard = self.data.read().await;
        Ok(guard
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&prefix)
                    .map(|field| (field.to_string(), v.clone()))
            })
            .collect())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut guard = self.data.write().await;
        let entry = guard.entry(key.to_string()).or_insert_with(|| "0".to_string());
        let next: i64 = entry.parse().unwrap_or(0) + 1;
        *entry = next.to_string();
        Ok(next)
    }

    async fn watch_snapshot(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let guard = self.data.read().await;
        Ok(keys.iter().map(|k| guard.get(k).cloned()).collect())
    }

    async fn commit_if_unchanged(
        &self,
        keys: &[String],
        snapshot: &[Option<String>],
        writes: Vec<(String, String)>,
    ) -> Result<TxOutcome> {
        let mut guard = self.data.write().await;
        for (key, expected) in keys.iter().zip(snapshot.iter()) {
            if guard.get(key) != expected.as_ref() {
                return Ok(TxOutcome::Conflict);
            }
        }
        for (key, value) in writes {
            guard.insert(key, value);
        }
        Ok(TxOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_roundtrip() {
        let store = MemoryStore::new();
        store.hset("h", "a", "1").await.unwrap();
        store.hset("h", "b", "2").await.unwrap();
        assert_eq!(store.hget("h", "a").await.unwrap().as_deref(), Some("1"));
        let all = store.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("b").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn hash_and_string_keyspaces_dont_collide() {
        let store = MemoryStore::new();
        store.set("h", "plain-string-value").await.unwrap();
        store.hset("h", "field", "hash-value").await.unwrap();
        assert_eq!(store.get("h").await.unwrap().as_deref(), Some("plain-string-value"));
        assert_eq!(store.hget("h", "field").await.unwrap().as_deref(), Some("hash-value"));
    }

    #[tokio::test]
    async fn incr_starts_at_one() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("ctr").await.unwrap(), 1);
        assert_eq!(store.incr("ctr").await.unwrap(), 2);
    }
}
