//! Store Client: a namespaced key/value/hash abstraction backing the
//! Credential Pool and Token Store, with an optimistic-transaction `watch`
//! primitive modeled on Redis `WATCH`/`MULTI`/`EXEC`.
//!
//! The trait is backend-agnostic; [`memory::MemoryStore`] backs tests and
//! local development, [`redis_backend::RedisStore`] (behind the
//! `redis-store` feature) is the reference production backend.

pub mod memory;
#[cfg(feature = "redis-store")]
pub mod redis_backend;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::{AppError, Result};

/// Outcome of a `watch` transaction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    Conflict,
}

/// Namespaced key/value/hash store with optimistic transactions.
///
/// All keys passed to trait methods are caller-relative; implementations
/// prefix them with the configured `key_prefix` internally.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Snapshot of the watched keys, used internally by `watch`'s retry loop
    /// to detect whether any of them changed between read and commit.
    async fn watch_snapshot(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Commit staged writes iff `snapshot` still matches the current store
    /// state for `keys`. Returns `Conflict` without writing on mismatch.
    async fn commit_if_unchanged(
        &self,
        keys: &[String],
        snapshot: &[Option<String>],
        writes: Vec<(String, String)>,
    ) -> Result<TxOutcome>;
}

/// Run `f` inside an optimistic transaction over `keys`: read their current
/// values, let `f` inspect them and stage writes, then commit iff none of
/// the watched keys changed. Retries up to three times with a 5ms-base
/// jittered exponential backoff on conflict.
///
/// `f` receives the snapshotted values (in the same order as `keys`) and
/// returns the `(key, value)` pairs to write on success.
pub async fn watch<S, F>(store: &S, keys: &[String], mut f: F) -> Result<()>
where
    S: Store + ?Sized,
    F: FnMut(&[Option<String>]) -> Result<Vec<(String, String)>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    const BASE_DELAY_MS: u64 = 5;

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            let backoff = BASE_DELAY_MS * 2u64.pow(attempt - 1);
            let jitter = rand::rng().random_range(0.5..=1.5);
            let delay = Duration::from_millis((backoff as f64 * jitter) as u64);
            tokio::time::sleep(delay).await;
        }

        let snapshot = store.watch_snapshot(keys).await?;
        let writes = f(&snapshot)?;
        match store.commit_if_unchanged(keys, &snapshot, writes).await? {
            TxOutcome::Committed => return Ok(()),
            TxOutcome::Conflict => continue,
        }
    }

    Err(AppError::Internal(format!(
        "watch transaction over {:?} failed after {MAX_ATTEMPTS} attempts (conflicting writers)",
        keys
    )))
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;

    #[tokio::test]
    async fn watch_commits_when_uncontended() {
        let store = MemoryStore::new();
        store.set("k", "1").await.unwrap();

        watch(&store, &["k".to_string()], |snapshot| {
            let current: i64 = snapshot[0].as_deref().unwrap_or("0").parse().unwrap();
            Ok(vec![("k".to_string(), (current + 1).to_string())])
        })
        .await
        .unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn commit_if_unchanged_rejects_stale_snapshot() {
        let store = MemoryStore::new();
        store.set("k", "0").await.unwrap();

        let keys = vec!["k".to_string()];
        let snapshot = store.watch_snapshot(&keys).await.unwrap();

        // A concurrent writer commits after our snapshot was taken.
        store.set("k", "999").await.unwrap();

        let outcome = store
            .commit_if_unchanged(&keys, &snapshot, vec![("k".to_string(), "1".to_string())])
            .await
            .unwrap();
        assert_eq!(outcome, TxOutcome::Conflict);
        // The conflicting write must not have been clobbered.
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("999"));
    }
}
