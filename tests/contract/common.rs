//! Shared fixtures for contract tests: a fully wired `AppState` backed by
//! an in-memory store, with a helper to seed credentials/tokens through
//! the same keys the Credential Pool and Token Store read.

use std::sync::Arc;

use kiro_gateway::convert::ModelResolver;
use kiro_gateway::transport::http::KiroHttpClient;
use kiro_proxy::config::RuntimeConfig;
use kiro_proxy::domain::{Credential, Token};
use kiro_proxy::pool::CredentialPool;
use kiro_proxy::refresh::{self, RefreshCoordinator};
use kiro_proxy::selector::Selector;
use kiro_proxy::store::memory::MemoryStore;
use kiro_proxy::store::Store;
use kiro_proxy::tokenstore::TokenStore;
use kiro_proxy::AppState;

const POOL_KEY: &str = "pools:claude-kiro-oauth";
pub const API_KEY: &str = "sk-test-key";

/// A test state plus the raw store it's backed by, so tests can seed
/// credentials/tokens through the same `Store` the pool and token store
/// read from without going through an onboarding flow this crate doesn't
/// expose over HTTP.
pub struct Fixture {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

pub async fn seeded_state() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn Store> = store.clone();
    let (refresh_tx, refresh_rx) = refresh::channel(16);
    let pool = Arc::new(CredentialPool::new(dyn_store.clone(), refresh_tx.clone()));
    let tokens = Arc::new(TokenStore::new(dyn_store));
    let selector = Arc::new(Selector::new(pool.clone(), 6));
    let coordinator = RefreshCoordinator::new(pool.clone(), tokens.clone());
    tokio::spawn(coordinator.clone().run(refresh_rx));

    let mut config = RuntimeConfig::default();
    config.auth.api_key = API_KEY.to_string();

    let state = AppState {
        config: Arc::new(config),
        pool,
        tokens,
        selector,
        refresh: coordinator,
        refresh_tx,
        http: Arc::new(KiroHttpClient::new()),
        model_resolver: Arc::new(ModelResolver::new().expect("model resolver")),
    };

    Fixture { state, store }
}

pub async fn add_credential(fixture: &Fixture, uuid: &str) {
    let cred = Credential {
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
        added_at: chrono::Utc::now(),
    };
    fixture
        .store
        .hset(POOL_KEY, uuid, &serde_json::to_string(&cred).unwrap())
        .await
        .unwrap();

    let token = Token {
        access_token: "test-access-token".into(),
        refresh_token: "test-refresh-token".into(),
        client_id: None,
        client_secret: None,
        expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
        auth_method: kiro_gateway::models::auth::AuthMethod::Social,
        last_refreshed: Some(chrono::Utc::now()),
    };
    fixture.state.tokens.set(uuid, &token).await.unwrap();
}

pub fn router(state: AppState) -> axum::Router {
    kiro_proxy::api::build_api_router(state.clone()).with_state(state)
}
