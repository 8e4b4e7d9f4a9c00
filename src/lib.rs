pub mod api;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod pool;
pub mod refresh;
pub mod selector;
pub mod store;
pub mod tokenstore;

use std::sync::Arc;

use kiro_gateway::convert::ModelResolver;
use kiro_gateway::transport::http::KiroHttpClient;

use crate::config::RuntimeConfig;
use crate::pool::CredentialPool;
use crate::refresh::RefreshCoordinator;
use crate::selector::Selector;
use crate::tokenstore::TokenStore;

/// Shared application state accessible from all handlers.
///
/// Constructed once in `main` and cloned (cheaply, via the inner `Arc`s)
/// into every axum handler through `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RuntimeConfig>,
    pub pool: Arc<CredentialPool>,
    pub tokens: Arc<TokenStore>,
    pub selector: Arc<Selector>,
    pub refresh: Arc<RefreshCoordinator>,
    pub refresh_tx: tokio::sync::mpsc::Sender<String>,
    pub http: Arc<KiroHttpClient>,
    pub model_resolver: Arc<ModelResolver>,
}
