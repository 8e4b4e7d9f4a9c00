use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pool_size: usize,
    pub healthy_credentials: usize,
}

/// GET /health
///
/// Liveness probe: reports overall pool state so operators can see
/// account health without scraping logs. No authentication required.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let credentials = state.pool.list_all().await.unwrap_or_default();
    let healthy_credentials = credentials.iter().filter(|c| c.is_healthy).count();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pool_size: credentials.len(),
        healthy_credentials,
    })
}
