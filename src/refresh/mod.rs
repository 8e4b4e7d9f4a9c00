//! Refresh Coordinator: a single background worker that owns every token
//! refresh for the process.
//!
//! Callers never call the refresh endpoints directly. They enqueue a UUID
//! (`CredentialPool::mark_need_refresh` for the 401 path, or the Selector's
//! passive near-expiry check) and the worker drains the queue, collapsing
//! duplicate enqueues of the same UUID onto a single in-flight future so
//! concurrent callers all observe the same outcome instead of racing two
//! refreshes against the same refresh token.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use kiro_gateway::models::auth::AuthMethod;
use tokio::sync::{mpsc, Mutex};

use crate::domain::Token;
use crate::error::{AppError, Result};
use crate::pool::CredentialPool;
use crate::tokenstore::{TokenStore, UpdateOutcome};

/// `Shared` requires a `Clone` output; `AppError` doesn't implement `Clone`
/// (it wraps `reqwest::Error` and friends), so in-flight futures share an
/// `Arc<AppError>` instead.
type SharedRefresh = Shared<BoxFuture<'static, std::result::Result<(), Arc<AppError>>>>;

pub struct RefreshCoordinator {
    pool: Arc<CredentialPool>,
    tokens: Arc<TokenStore>,
    http: reqwest::Client,
    inflight: Mutex<HashMap<String, SharedRefresh>>,
}

impl RefreshCoordinator {
    pub fn new(pool: Arc<CredentialPool>, tokens: Arc<TokenStore>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            tokens,
            http: reqwest::Client::new(),
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Drains `queue` until the sender side is dropped. Intended to be
    /// spawned once as the process's single refresh worker task.
    pub async fn run(self: Arc<Self>, mut queue: mpsc::Receiver<String>) {
        while let Some(uuid) = queue.recv().await {
            let fut = self.attach_or_start(uuid.clone()).await;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = fut.await {
                    tracing::error!(uuid = %uuid, error = %e, "token refresh failed");
                }
                this.inflight.lock().await.remove(&uuid);
            });
        }
    }

    /// Returns the `Shared` future for `uuid`'s refresh, starting a new one
    /// only if none is already in flight. Exposed separately from `run` so
    /// the passive near-expiry path (Selector) can await the same
    /// singleflight slot instead of going through the queue.
    async fn attach_or_start(self: &Arc<Self>, uuid: String) -> SharedRefresh {
        let mut inflight = self.inflight.lock().await;
        inflight
            .entry(uuid.clone())
            .or_insert_with(|| {
                let this = self.clone();
                async move { this.do_refresh(&uuid).await.map_err(Arc::new) }
                    .boxed()
                    .shared()
            })
            .clone()
    }

    async fn do_refresh(&self, uuid: &str) -> Result<()> {
        let cred = self
            .pool
            .get(uuid)
            .await?
            .ok_or_else(|| AppError::Store(format!("unknown credential {uuid}")))?;

        let token = match self.tokens.get(uuid).await? {
            Some(t) if !t.refresh_token.is_empty() => t,
            _ => {
                self.pool
                    .mark_unhealthy(uuid, "no refresh token on file")
                    .await?;
                return Err(AppError::UpstreamAuthFailure);
            }
        };

        let fingerprint = cred.fingerprint(token.client_id.as_deref());

        let refreshed = match token.auth_method {
            AuthMethod::Social => kiro_gateway::auth::kiro_desktop::refresh_token(
                &self.http,
                &cred.region,
                &token.refresh_token,
                &fingerprint,
            )
            .await
            .map(|r| (r.access_token, r.refresh_token, r.expires_in)),
            AuthMethod::BuilderId => {
                let client_id = token.client_id.as_deref().unwrap_or_default();
                let client_secret = token.client_secret.as_deref().unwrap_or_default();
                kiro_gateway::auth::aws_sso_oidc::refresh_token(
                    &self.http,
                    &token.refresh_token,
                    client_id,
                    client_secret,
                    &cred.region,
                )
                .await
                .map(|r| (r.access_token, r.refresh_token, r.expires_in))
            }
        };

        match refreshed {
            Ok((access_token, refresh_token, expires_in)) => {
                let new_token = Token {
                    access_token,
                    refresh_token: refresh_token.unwrap_or_else(|| token.refresh_token.clone()),
                    client_id: token.client_id.clone(),
                    client_secret: token.client_secret.clone(),
                    expires_at: Some(Utc::now() + chrono::Duration::milliseconds(expires_in * 1000)),
                    auth_method: token.auth_method,
                    last_refreshed: Some(Utc::now()),
                };
                match self
                    .tokens
                    .atomic_update(uuid, new_token, &token.refresh_token)
                    .await?
                {
                    UpdateOutcome::Applied => {
                        self.pool.record_success(uuid).await?;
                        Ok(())
                    }
                    UpdateOutcome::Conflict => {
                        tracing::debug!(
                            uuid = %uuid,
                            "refresh result superseded by a concurrent winner, dropping"
                        );
                        Ok(())
                    }
                }
            }
            Err(e) => {
                self.pool
                    .mark_unhealthy(uuid, &format!("refresh failed: {e}"))
                    .await?;
                Err(e.into())
            }
        }
    }
}

/// Creates the bounded, duplicate-collapsing queue the Coordinator's
/// worker consumes, and the paired sender every enqueue path uses
/// (`CredentialPool::mark_need_refresh`, passive near-expiry checks).
pub fn channel(capacity: usize) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel(capacity)
}
