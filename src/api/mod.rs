pub mod health;
pub mod messages;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::auth::middleware::require_api_key;
use crate::AppState;

/// Build the full API router.
///
/// Route layout:
/// ```text
/// /health                         GET    (no auth)
/// /v1/messages                    POST   (auth required)
/// /v1/messages/count_tokens       POST   (auth required)
/// ```
pub fn build_api_router(state: AppState) -> Router<AppState> {
    let v1_routes = Router::new()
        .route("/messages", post(messages::messages))
        .route("/messages/count_tokens", post(messages::count_tokens))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/v1", v1_routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    use crate::config::RuntimeConfig;
    use crate::pool::CredentialPool;
    use crate::refresh::RefreshCoordinator;
    use crate::selector::Selector;
    use crate::store::memory::MemoryStore;
    use crate::tokenstore::TokenStore;
    use kiro_gateway::convert::ModelResolver;
    use kiro_gateway::transport::http::KiroHttpClient;

    fn test_state() -> AppState {
        let store = Arc::new(MemoryStore::new());
        let (refresh_tx, _refresh_rx) = mpsc::channel(16);
        let pool = Arc::new(CredentialPool::new(store.clone(), refresh_tx.clone()));
        let tokens = Arc::new(TokenStore::new(store));
        AppState {
            config: Arc::new(RuntimeConfig::default()),
            pool: pool.clone(),
            tokens: tokens.clone(),
            selector: Arc::new(Selector::new(pool.clone(), 6)),
            refresh: RefreshCoordinator::new(pool, tokens),
            refresh_tx,
            http: Arc::new(KiroHttpClient::new()),
            model_resolver: Arc::new(ModelResolver::new().unwrap()),
        }
    }

    #[test]
    fn build_api_router_creates_router() {
        let state = test_state();
        let _router: Router<AppState> = build_api_router(state);
    }
}
