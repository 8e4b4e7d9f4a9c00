//! Redis-backed `Store` implementation (the reference production backend).
//!
//! Hash/string primitives map directly onto `HSET`/`HGETALL`/`GET`/`SET`;
//! the `watch` transaction maps onto `WATCH`+`MULTI`/`EXEC`. All keys are
//! namespaced by `key_prefix` so multiple proxies can share one Redis
//! instance without collision.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use super::{Store, TxOutcome};
use crate::error::{AppError, Result};

/// Redis store client. Falls back to the most recently cached value on a
/// connectivity failure for reads; writes fail loudly.
pub struct RedisStore {
    manager: ConnectionManager,
    prefix: String,
    /// Read-through cache: last known-good value per namespaced key,
    /// consulted only when the live Redis call itself fails.
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl RedisStore {
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Internal(format!("invalid store url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::Internal(format!("store unreachable: {e}")))?;
        Ok(Self {
            manager,
            prefix: prefix.to_string(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn ns(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn cache_get(&self, key: &str) -> Option<String> {
        self.cache.read().await.get(key).cloned()
    }

    async fn cache_put(&self, key: &str, value: &str) {
        self.cache.write().await.insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let full = self.ns(key);
        let mut conn = self.manager.clone();
        match conn.get::<_, Option<String>>(&full).await {
            Ok(Some(v)) => {
                self.cache_put(&full, &v).await;
                Ok(Some(v))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(error = %e, key = %full, "store unreachable, serving cached value");
                Ok(self.cache_get(&full).await)
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let full = self.ns(key);
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(&full, value)
            .await
            .map_err(|e| AppError::Internal(format!("store write failed: {e}")))?;
        self.cache_put(&full, value).await;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let full = self.ns(key);
        let cache_key = format!("{full}\u{0}{field}");
        let mut conn = self.manager.clone();
        match conn.hget::<_, _, Option<String>>(&full, field).await {
            Ok(Some(v)) => {
                self.cache_put(&cache_key, &v).await;
                Ok(Some(v))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(error = %e, key = %full, "store unreachable, serving cached value");
                Ok(self.cache_get(&cache_key).await)
            }
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let full = self.ns(key);
        let mut conn = self.manager.clone();
        conn.hset::<_, _, _, ()>(&full, field, value)
            .await
            .map_err(|e| AppError::Internal(format!("store write failed: {e}")))?;
        self.cache_put(&format!("{full}\u{0}{field}"), value).await;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let full = self.ns(key);
        let mut conn = self.manager.clone();
        match conn.hgetall::<_, HashMap<String, String>>(&full).await {
            Ok(map) => {
                for (field, value) in &map {
                    self.cache_put(&format!("{full}\u{0}{field}"), value).await;
                }
                Ok(map)
            }
            Err(e) => {
                tracing::warn!(error = %e, key = %full, "store unreachable, serving cached hash");
                let prefix = format!("{full}\u{0}");
                let guard = self.cache.read().await;
                Ok(guard
                    .iter()
                    .filter_map(|(k, v)| {
                        k.strip_prefix(&prefix).map(|field| (field.to_string(), v.clone()))
                    })
                    .collect())
            }
        }
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let full = self.ns(key);
        let mut conn = self.manager.clone();
        conn.incr(&full, 1)
            .await
            .map_err(|e| AppError::Internal(format!("store incr failed: {e}")))
    }

    // NOTE: ConnectionManager multiplexes over a single shared connection,
    // so WATCH set here and MULTI/EXEC issued in commit_if_unchanged below
    // observe the same server-side watch state as long as no other command
    // interleaves on this client between the two calls. `pool::update`'s
    // watch loop in the caller is the only place that pairs them.
    //
    // A key containing a NUL byte is a compound "hash-key\0field" watch-key
    // (the convention `CredentialPool`/`TokenStore` use to address one hash
    // field): it resolves to HGET/HSET against the parent hash, with WATCH
    // set on the parent hash key itself since Redis cannot watch a single
    // field. A key with no NUL is a plain string GET/SET.
    async fn watch_snapshot(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let mut conn = self.manager.clone();
        let watch_targets: Vec<String> = keys.iter().map(|k| self.ns(hash_key_of(k))).collect();
        redis::cmd("WATCH")
            .arg(&watch_targets)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("store watch failed: {e}")))?;

        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let full = self.ns(hash_key_of(key));
            let value = match field_of(key) {
                Some(field) => conn.hget(&full, field).await,
                None => conn.get(&full).await,
            }
            .map_err(|e: redis::RedisError| AppError::Internal(format!("store read failed: {e}")))?;
            values.push(value);
        }
        Ok(values)
    }

    async fn commit_if_unchanged(
        &self,
        _keys: &[String],
        _snapshot: &[Option<String>],
        writes: Vec<(String, String)>,
    ) -> Result<TxOutcome> {
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in &writes {
            let full = self.ns(hash_key_of(key));
            match field_of(key) {
                Some(field) => {
                    pipe.hset(full, field, value);
                }
                None => {
                    pipe.set(full, value);
                }
            }
        }
        // MULTI/EXEC returns nil (aborted) if a watched key changed since
        // watch_snapshot's WATCH; redis-rs surfaces this as an empty result.
        let result: Option<Vec<redis::Value>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Internal(format!("store commit failed: {e}")))?;

        match result {
            Some(_) => {
                for (key, value) in &writes {
                    let full = self.ns(hash_key_of(key));
                    let cache_key = match field_of(key) {
                        Some(field) => format!("{full}\u{0}{field}"),
                        None => full,
                    };
                    self.cache_put(&cache_key, value).await;
                }
                Ok(TxOutcome::Committed)
            }
            None => Ok(TxOutcome::Conflict),
        }
    }
}

/// Splits a `watch`-style key on its first NUL byte. Returns the part
/// before it (the plain key, or the parent hash key for a compound key).
fn hash_key_of(key: &str) -> &str {
    key.split('\u{0}').next().unwrap_or(key)
}

/// The hash field half of a compound `hashkey\0field` watch-key, or `None`
/// for a plain string key.
fn field_of(key: &str) -> Option<&str> {
    key.split_once('\u{0}').map(|(_, field)| field)
}
