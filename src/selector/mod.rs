//! Selector: stateless credential selection with round-robin fairness and
//! health/cooldown-aware failover.
//!
//! The only state carried between calls is a process-local round-robin
//! counter; everything else is recomputed from the Credential Pool's
//! current snapshot on every `select` call.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::Credential;
use crate::error::{AppError, Result};
use crate::pool::CredentialPool;

pub struct Selector {
    pool: Arc<CredentialPool>,
    cooldown_secs: i64,
    counter: AtomicUsize,
}

impl Selector {
    pub fn new(pool: Arc<CredentialPool>, cooldown_secs: u64) -> Self {
        Self {
            pool,
            cooldown_secs: cooldown_secs as i64,
            counter: AtomicUsize::new(0),
        }
    }

    /// Select the next eligible credential, excluding any UUID already
    /// tried in this request's failover chain.
    pub async fn select(&self, excluded: &HashSet<String>) -> Result<Credential> {
        let all = self.pool.list_all().await?;
        let now = Utc::now();
        Self::pick(&all, excluded, now, self.cooldown_secs, &self.counter)
    }

    fn pick(
        all: &[Credential],
        excluded: &HashSet<String>,
        now: DateTime<Utc>,
        cooldown_secs: i64,
        counter: &AtomicUsize,
    ) -> Result<Credential> {
        let eligible: Vec<&Credential> = all
            .iter()
            .filter(|c| !c.is_disabled)
            .filter(|c| !excluded.contains(&c.uuid))
            .filter(|c| match c.scheduled_recovery_time {
                Some(t) => t <= now,
                None => true,
            })
            .collect();

        if eligible.is_empty() {
            return Err(AppError::NoAccountsAvailable);
        }

        let mut healthy: Vec<&Credential> = eligible.iter().filter(|c| c.is_healthy).copied().collect();
        let mut cooling: Vec<&Credential> = eligible
            .iter()
            .filter(|c| {
                !c.is_healthy
                    && c.last_error_time
                        .map(|t| (now - t).num_seconds() >= cooldown_secs)
                        .unwrap_or(true)
            })
            .copied()
            .collect();

        let bucket = if !healthy.is_empty() {
            &mut healthy
        } else if !cooling.is_empty() {
            &mut cooling
        } else {
            return Err(AppError::NoAccountsAvailable);
        };

        // Deterministic tie-break on `last_used` (unset sorts first),
        // then UUID lexical order, so repeated selections over an
        // unchanged snapshot are reproducible in tests.
        bucket.sort_by(|a, b| a.last_used.cmp(&b.last_used).then_with(|| a.uuid.cmp(&b.uuid)));

        let idx = counter.fetch_add(1, Ordering::Relaxed) % bucket.len();
        Ok(bucket[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use tokio::sync::mpsc;

    fn cred(uuid: &str, healthy: bool) -> Credential {
        Credential {
            uuid: uuid.to_string(),
            provider_type: "claude-kiro-oauth".into(),
            region: "us-east-1".into(),
            profile_arn: None,
            is_healthy: healthy,
            is_disabled: false,
            scheduled_recovery_time: None,
            usage_count: 0,
            error_count: 0,
            last_used: None,
            last_error_time: if healthy { None } else { Some(Utc::now()) },
            last_health_check_time: None,
            added_at: Utc::now(),
        }
    }

    #[test]
    fn prefers_healthy_over_cooling() {
        let all = vec![cred("unhealthy", false), cred("healthy", true)];
        let counter = AtomicUsize::new(0);
        let picked = Selector::pick(&all, &HashSet::new(), Utc::now(), 6, &counter).unwrap();
        assert_eq!(picked.uuid, "healthy");
    }

    #[test]
    fn falls_back_to_cooling_after_cooldown_when_none_healthy() {
        let mut c = cred("cooling", false);
        c.last_error_time = Some(Utc::now() - chrono::Duration::seconds(10));
        let all = vec![c];
        let counter = AtomicUsize::new(0);
        let picked = Selector::pick(&all, &HashSet::new(), Utc::now(), 6, &counter).unwrap();
        assert_eq!(picked.uuid, "cooling");
    }

    #[test]
    fn excludes_credentials_still_within_cooldown() {
        let mut c = cred("too-fresh", false);
        c.last_error_time = Some(Utc::now());
        let all = vec![c];
        let counter = AtomicUsize::new(0);
        let err = Selector::pick(&all, &HashSet::new(), Utc::now(), 6, &counter).unwrap_err();
        assert!(matches!(err, AppError::NoAccountsAvailable));
    }

    #[test]
    fn excludes_disabled_and_excluded_and_future_recovery() {
        let mut disabled = cred("disabled", true);
        disabled.is_disabled = true;
        let mut scheduled = cred("scheduled", true);
        scheduled.scheduled_recovery_time = Some(Utc::now() + chrono::Duration::days(1));
        let ok = cred("ok", true);
        let all = vec![disabled, scheduled, ok];

        let mut excluded = HashSet::new();
        excluded.insert("ok".to_string());
        let counter = AtomicUsize::new(0);
        let err = Selector::pick(&all, &excluded, Utc::now(), 6, &counter).unwrap_err();
        assert!(matches!(err, AppError::NoAccountsAvailable));
    }

    #[test]
    fn round_robins_across_healthy_bucket() {
        let all = vec![cred("a", true), cred("b", true)];
        let counter = AtomicUsize::new(0);
        let first = Selector::pick(&all, &HashSet::new(), Utc::now(), 6, &counter).unwrap();
        let second = Selector::pick(&all, &HashSet::new(), Utc::now(), 6, &counter).unwrap();
        assert_ne!(first.uuid, second.uuid);
    }

    #[tokio::test]
    async fn select_reports_no_accounts_available_on_empty_pool() {
        let store = Arc::new(MemoryStore::new());
        let (tx, _rx) = mpsc::channel(16);
        let pool = Arc::new(CredentialPool::new(store, tx));
        let selector = Selector::new(pool, 6);
        let err = selector.select(&HashSet::new()).await.unwrap_err();
        assert!(matches!(err, AppError::NoAccountsAvailable));
    }
}
