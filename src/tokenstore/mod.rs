//! Token Store: the exclusive owner of `Token` records.
//!
//! Backed by one JSON string per credential at
//! `tokens:claude-kiro-oauth:{uuid}`. Unlike the Credential Pool's hash,
//! each token lives at its own top-level key so `atomic_update`'s watch
//! only ever contends with other writers of the same UUID.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::RwLock;

use crate::domain::Token;
use crate::error::{AppError, Result};
use crate::store::{self, Store};

fn token_key(uuid: &str) -> String {
    format!("tokens:claude-kiro-oauth:{uuid}")
}

/// Outcome of an `atomic_update` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The stored token had already moved past `prior_refresh_token` (a
    /// concurrent refresh won the race); the caller's result was dropped.
    Conflict,
}

pub struct TokenStore {
    store: Arc<dyn Store>,
    cache: RwLock<HashMap<String, Token>>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Current token for a credential. Serves the cache if the store is
    /// unreachable.
    pub async fn get(&self, uuid: &str) -> Result<Option<Token>> {
        match self.store.get(&token_key(uuid)).await {
            Ok(Some(json)) => {
                let token: Token = serde_json::from_str(&json)
                    .map_err(|e| AppError::Store(format!("corrupt token for {uuid}: {e}")))?;
                self.cache.write().await.insert(uuid.to_string(), token.clone());
                Ok(Some(token))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!(uuid = %uuid, error = %e, "store unreachable, serving cached token");
                Ok(self.cache.read().await.get(uuid).cloned())
            }
        }
    }

    /// Unconditional overwrite (used when first provisioning a credential).
    pub async fn set(&self, uuid: &str, token: &Token) -> Result<()> {
        let json = serde_json::to_string(token)
            .map_err(|e| AppError::Internal(format!("failed to encode token: {e}")))?;
        self.store.set(&token_key(uuid), &json).await?;
        self.cache.write().await.insert(uuid.to_string(), token.clone());
        Ok(())
    }

    /// Optimistic update after a refresh: succeeds only if the stored
    /// token's `refresh_token` still equals `prior_refresh_token`, or the
    /// stored token's `expires_at` is already earlier than `new_token`'s
    /// (a stale read racing a newer refresh never wins, but a genuinely
    /// newer token is still accepted even if the refresh token changed
    /// underneath a slow caller).
    pub async fn atomic_update(
        &self,
        uuid: &str,
        new_token: Token,
        prior_refresh_token: &str,
    ) -> Result<UpdateOutcome> {
        let key = token_key(uuid);
        let mut conflict = false;
        store::watch(&*self.store, &[key.clone()], |snapshot| {
            let current: Option<Token> = match snapshot[0].as_deref() {
                Some(json) => Some(
                    serde_json::from_str(json)
                        .map_err(|e| AppError::Store(format!("corrupt token for {uuid}: {e}")))?,
                ),
                None => None,
            };

            let accept = match &current {
                None => true,
                Some(stored) => {
                    stored.refresh_token == prior_refresh_token
                        || stored.expires_at < new_token.expires_at
                }
            };

            if !accept {
                conflict = true;
                // No writes: the caller already holds the snapshot it read,
                // so returning an empty write set is a silent no-op commit.
                return Ok(Vec::new());
            }

            let json = serde_json::to_string(&new_token)
                .map_err(|e| AppError::Internal(format!("failed to encode token: {e}")))?;
            Ok(vec![(key.clone(), json)])
        })
        .await?;

        if conflict {
            tracing::warn!(uuid = %uuid, "atomic token update rejected: refresh token mismatch");
            Ok(UpdateOutcome::Conflict)
        } else {
            self.cache.write().await.insert(uuid.to_string(), new_token);
            Ok(UpdateOutcome::Applied)
        }
    }

    pub fn is_expiring_soon(token: &Token, threshold: Duration) -> bool {
        token.is_expiring_soon(threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::Utc;
    use kiro_gateway::models::auth::AuthMethod;

    fn sample_token(refresh_token: &str, expires_in_secs: i64) -> Token {
        Token {
            access_token: "access".into(),
            refresh_token: refresh_token.into(),
            client_id: None,
            client_secret: None,
            expires_at: Some(Utc::now() + Duration::seconds(expires_in_secs)),
            auth_method: AuthMethod::Social,
            last_refreshed: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = Arc::new(MemoryStore::new());
        let ts = TokenStore::new(store);
        let token = sample_token("r1", 3600);
        ts.set("c1", &token).await.unwrap();
        let fetched = ts.get("c1").await.unwrap().unwrap();
        assert_eq!(fetched.refresh_token, "r1");
    }

    #[tokio::test]
    async fn atomic_update_applies_when_refresh_token_matches() {
        let store = Arc::new(MemoryStore::new());
        let ts = TokenStore::new(store);
        ts.set("c1", &sample_token("r1", 3600)).await.unwrap();

        let outcome = ts
            .atomic_update("c1", sample_token("r2", 7200), "r1")
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);
        assert_eq!(ts.get("c1").await.unwrap().unwrap().refresh_token, "r2");
    }

    #[tokio::test]
    async fn atomic_update_rejects_mismatched_prior_refresh_token() {
        let store = Arc::new(MemoryStore::new());
        let ts = TokenStore::new(store);
        ts.set("c1", &sample_token("r-current", 3600)).await.unwrap();

        // Some other refresh already moved refresh_token past "r-stale".
        let outcome = ts
            .atomic_update("c1", sample_token("r-attempt", 60), "r-stale")
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Conflict);
        assert_eq!(ts.get("c1").await.unwrap().unwrap().refresh_token, "r-current");
    }

    #[tokio::test]
    async fn atomic_update_accepts_strictly_newer_expiry_despite_refresh_token_mismatch() {
        let store = Arc::new(MemoryStore::new());
        let ts = TokenStore::new(store);
        ts.set("c1", &sample_token("r-current", 10)).await.unwrap();

        let newer = sample_token("r-newer", 99_999);
        let outcome = ts.atomic_update("c1", newer, "r-stale").await.unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);
    }

    #[test]
    fn is_expiring_soon_true_within_threshold() {
        let token = sample_token("r1", 100);
        assert!(TokenStore::is_expiring_soon(&token, Duration::seconds(300)));
        assert!(!TokenStore::is_expiring_soon(&token, Duration::seconds(10)));
    }

    #[tokio::test]
    async fn atomic_update_overwrites_a_row_with_malformed_expires_at() {
        let store = Arc::new(MemoryStore::new());
        let ts = TokenStore::new(store);
        ts.store
            .set(
                &token_key("c1"),
                &serde_json::json!({
                    "accessToken": "a-stale",
                    "refreshToken": "r-stale",
                    "expiresAt": "garbage",
                })
                .to_string(),
            )
            .await
            .unwrap();

        let fetched = ts.get("c1").await.unwrap().unwrap();
        assert!(fetched.expires_at.is_none());
        assert!(Token::is_expiring_soon(&fetched, Duration::seconds(0)));

        let outcome = ts
            .atomic_update("c1", sample_token("r-fresh", 3600), "r-stale")
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);
    }
}
