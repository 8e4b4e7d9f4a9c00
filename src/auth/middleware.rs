//! Static API key authentication for the `/v1/*` surface.
//!
//! There is a single shared secret (`RuntimeConfig.auth.api_key`), not a
//! per-user credential store, so unlike the teacher's three-mode dispatch
//! (disabled / TLS client cert / per-user Bearer lookup) this middleware
//! has exactly one check: does the caller's key match the configured one.
//! Anthropic's own API accepts the key via either `x-api-key` or
//! `Authorization: Bearer`, so both are checked, `x-api-key` first.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::AppError;
use crate::AppState;

/// Axum middleware requiring a valid API key on every `/v1/*` request.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.config.auth.api_key.is_empty() {
        return Err(AppError::Unauthorized(
            "no API key configured for this proxy".to_string(),
        ));
    }

    let presented = extract_api_key(&request)?;
    if presented != state.config.auth.api_key {
        return Err(AppError::Unauthorized("invalid API key".to_string()));
    }

    Ok(next.run(request).await)
}

/// Pull the caller's key from `x-api-key`, falling back to a Bearer
/// `Authorization` header.
fn extract_api_key(request: &Request) -> Result<String, AppError> {
    if let Some(value) = request.headers().get("x-api-key") {
        let key = value
            .to_str()
            .map_err(|_| AppError::Unauthorized("invalid x-api-key header encoding".to_string()))?
            .trim();
        if key.is_empty() {
            return Err(AppError::Unauthorized("empty x-api-key header".to_string()));
        }
        return Ok(key.to_string());
    }

    extract_bearer_token(request)
}

/// Extract the Bearer token from the Authorization header.
fn extract_bearer_token(request: &Request) -> Result<String, AppError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("missing x-api-key or Authorization header".to_string()))?;

    let value = header
        .to_str()
        .map_err(|_| AppError::Unauthorized("invalid Authorization header encoding".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Authorization header must use Bearer scheme".to_string()))?
        .trim();

    if token.is_empty() {
        return Err(AppError::Unauthorized("empty Bearer token".to_string()));
    }

    Ok(token.to_string())
}
