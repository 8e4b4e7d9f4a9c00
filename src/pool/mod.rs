//! Credential Pool: the exclusive owner of `Credential` records.
//!
//! Backed by the Store Client's `pools:claude-kiro-oauth` hash (one field
//! per UUID, JSON-encoded `Credential`). Reads consult an in-memory cache
//! first and fall back to it when the store is unreachable; writes always
//! go through the store's optimistic `watch` transaction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use tokio::sync::{mpsc, RwLock};

use crate::domain::Credential;
use crate::error::{AppError, Result};
use crate::store::{self, Store};

const POOL_KEY: &str = "pools:claude-kiro-oauth";

/// The Credential Pool.
pub struct CredentialPool {
    store: Arc<dyn Store>,
    cache: RwLock<HashMap<String, Credential>>,
    /// Sender into the Refresh Coordinator's queue; `mark_need_refresh`
    /// pushes a UUID here without touching the credential's health fields.
    refresh_tx: mpsc::Sender<String>,
}

impl CredentialPool {
    pub fn new(store: Arc<dyn Store>, refresh_tx: mpsc::Sender<String>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            refresh_tx,
        }
    }

    async fn refresh_cache(&self) -> Result<Vec<Credential>> {
        let raw = self.store.hgetall(POOL_KEY).await.map_err(|e| {
            AppError::Store(format!("failed to list credentials: {e}"))
        })?;
        let mut creds = Vec::with_capacity(raw.len());
        let mut cache = self.cache.write().await;
        cache.clear();
        for (uuid, json) in raw {
            match serde_json::from_str::<Credential>(&json) {
                Ok(cred) => {
                    cache.insert(uuid, cred.clone());
                    creds.push(cred);
                }
                Err(e) => {
                    tracing::warn!(uuid = %uuid, error = %e, "dropping unparseable credential record");
                }
            }
        }
        Ok(creds)
    }

    /// All known credentials. Serves the cache if the store is unreachable.
    pub async fn list_all(&self) -> Result<Vec<Credential>> {
        match self.refresh_cache().await {
            Ok(creds) => Ok(creds),
            Err(e) => {
                let cache = self.cache.read().await;
                if cache.is_empty() {
                    Err(e)
                } else {
                    tracing::warn!(error = %e, "store unreachable, serving cached credential pool");
                    Ok(cache.values().cloned().collect())
                }
            }
        }
    }

    /// A single credential by UUID.
    pub async fn get(&self, uuid: &str) -> Result<Option<Credential>> {
        match self.store.hget(POOL_KEY, uuid).await {
            Ok(Some(json)) => {
                let cred: Credential = serde_json::from_str(&json)
                    .map_err(|e| AppError::Store(format!("corrupt credential {uuid}: {e}")))?;
                self.cache.write().await.insert(uuid.to_string(), cred.clone());
                Ok(Some(cred))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(uuid = %uuid, error = %e, "store unreachable, serving cached credential");
                Ok(self.cache.read().await.get(uuid).cloned())
            }
        }
    }

    /// Optimistic read-modify-write. `mutator` receives an owned copy of
    /// the current record and returns the version to persist. Retries up
    /// to three times on a conflicting concurrent writer.
    pub async fn update<F>(&self, uuid: &str, mutator: F) -> Result<()>
    where
        F: Fn(Credential) -> Credential + Send + Sync,
    {
        let field_key = format!("{POOL_KEY}\u{0}{uuid}");
        store::watch(&*self.store, &[field_key], |snapshot| {
            let current_json = snapshot[0]
                .as_deref()
                .ok_or_else(|| AppError::Store(format!("credential {uuid} not found")))?;
            let current: Credential = serde_json::from_str(current_json)
                .map_err(|e| AppError::Store(format!("corrupt credential {uuid}: {e}")))?;
            let updated = mutator(current);
            let json = serde_json::to_string(&updated)
                .map_err(|e| AppError::Internal(format!("failed to encode credential: {e}")))?;
            Ok(vec![(format!("{POOL_KEY}\u{0}{uuid}"), json)])
        })
        .await?;

        // The watch helper above operates on the Store trait's flat
        // key/value view; the actual persistence goes through the hash
        // field so reads via hget/hgetall see it too.
        self.get(uuid).await?;
        Ok(())
    }

    /// Mark a successful request: clears unhealthy/recovery state, bumps
    /// usage, stamps the health-check and last-used timestamps.
    pub async fn record_success(&self, uuid: &str) -> Result<()> {
        self.update(uuid, |mut cred| {
            cred.is_healthy = true;
            cred.usage_count += 1;
            let now = Utc::now();
            cred.last_used = Some(now);
            cred.last_health_check_time = Some(now);
            cred.scheduled_recovery_time = None;
            cred
        })
        .await
    }

    /// Enqueue a refresh without mutating health state (the 401 path: the
    /// token is bad, not necessarily the credential).
    pub async fn mark_need_refresh(&self, uuid: &str) {
        if self.refresh_tx.send(uuid.to_string()).await.is_err() {
            tracing::error!(uuid = %uuid, "refresh coordinator channel closed");
        }
    }

    pub async fn mark_unhealthy(&self, uuid: &str, reason: &str) -> Result<()> {
        tracing::warn!(uuid = %uuid, reason, "marking credential unhealthy");
        self.update(uuid, |mut cred| {
            cred.is_healthy = false;
            cred.error_count += 1;
            cred.last_error_time = Some(Utc::now());
            cred
        })
        .await
    }

    /// Same as `mark_unhealthy` plus a scheduled recovery time (quota
    /// exhaustion: the first moment of next month, UTC).
    pub async fn mark_unhealthy_until(
        &self,
        uuid: &str,
        reason: &str,
        recovery_at: DateTime<Utc>,
    ) -> Result<()> {
        tracing::warn!(uuid = %uuid, reason, recovery_at = %recovery_at, "marking credential unhealthy until scheduled recovery");
        self.update(uuid, |mut cred| {
            cred.is_healthy = false;
            cred.error_count += 1;
            cred.last_error_time = Some(Utc::now());
            cred.scheduled_recovery_time = Some(recovery_at);
            cred
        })
        .await
    }
}

/// First moment (00:00 UTC) of the month after `now`. Used as the recovery
/// time for quota-exhaustion (HTTP 402) unhealthy marks.
pub fn first_of_next_month_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of month is always a valid timestamp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn sample_credential(uuid: &str) -> Credential {
        Credential {
            uuid: uuid.to_string(),
            provider_type: "claude-kiro-oauth".into(),
            region: "us-east-1".into(),
            profile_arn: None,
            is_healthy: true,
            is_disabled: false,
            scheduled_recovery_time: None,
            usage_count: 0,
            error_count: 0,
            last_used: None,
            last_error_time: None,
            last_health_check_time: None,
            added_at: Utc::now(),
        }
    }

    async fn seeded_pool() -> (CredentialPool, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let cred = sample_credential("c1");
        store
            .hset(POOL_KEY, "c1", &serde_json::to_string(&cred).unwrap())
            .await
            .unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let pool = CredentialPool::new(store.clone(), tx);
        (pool, store)
    }

    #[tokio::test]
    async fn list_all_returns_seeded_credentials() {
        let (pool, _store) = seeded_pool().await;
        let all = pool.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].uuid, "c1");
    }

    #[tokio::test]
    async fn record_success_clears_recovery_and_bumps_usage() {
        let (pool, _store) = seeded_pool().await;
        pool.update("c1", |mut c| {
            c.is_healthy = false;
            c.scheduled_recovery_time = Some(Utc::now() + chrono::Duration::days(1));
            c
        })
        .await
        .unwrap();

        pool.record_success("c1").await.unwrap();
        let cred = pool.get("c1").await.unwrap().unwrap();
        assert!(cred.is_healthy);
        assert_eq!(cred.usage_count, 1);
        assert!(cred.scheduled_recovery_time.is_none());
    }

    #[tokio::test]
    async fn mark_unhealthy_increments_error_count() {
        let (pool, _store) = seeded_pool().await;
        pool.mark_unhealthy("c1", "test failure").await.unwrap();
        let cred = pool.get("c1").await.unwrap().unwrap();
        assert!(!cred.is_healthy);
        assert_eq!(cred.error_count, 1);
        assert!(cred.last_error_time.is_some());
    }

    #[tokio::test]
    async fn mark_unhealthy_until_sets_recovery_time() {
        let (pool, _store) = seeded_pool().await;
        let recovery = first_of_next_month_utc(Utc::now());
        pool.mark_unhealthy_until("c1", "quota exhausted", recovery)
            .await
            .unwrap();
        let cred = pool.get("c1").await.unwrap().unwrap();
        assert_eq!(cred.scheduled_recovery_time, Some(recovery));
    }

    #[test]
    fn first_of_next_month_rolls_over_december() {
        let dec = Utc.with_ymd_and_hms(2026, 12, 15, 10, 0, 0).unwrap();
        let next = first_of_next_month_utc(dec);
        assert_eq!((next.year(), next.month(), next.day()), (2027, 1, 1));
    }

    #[tokio::test]
    async fn mark_need_refresh_enqueues_uuid() {
        let store = Arc::new(MemoryStore::new());
        let cred = sample_credential("c1");
        store
            .hset(POOL_KEY, "c1", &serde_json::to_string(&cred).unwrap())
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let pool = CredentialPool::new(store, tx);
        pool.mark_need_refresh("c1").await;
        assert_eq!(rx.recv().await.as_deref(), Some("c1"));
    }
}
