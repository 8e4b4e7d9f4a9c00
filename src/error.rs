//! Application error taxonomy and its Anthropic-shaped HTTP envelope.
//!
//! Mirrors the split `kiro-gateway-rs/src/error.rs` uses: a `thiserror`
//! enum covering everything that can go wrong (store, pool, selector,
//! upstream, translator), with `requires_reauth`/`should_switch_credential`/
//! `skip_error_count` predicate methods so the handler's failover loop
//! reads policy off the error instead of re-deriving it from status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The application-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request too large: {0}")]
    RequestTooLarge(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no healthy credentials available")]
    NoAccountsAvailable,

    #[error("upstream error (retryable): {0}")]
    UpstreamRetryable(String),

    #[error("upstream authentication failure")]
    UpstreamAuthFailure,

    #[error("upstream quota exhausted")]
    UpstreamQuotaExhausted,

    #[error("upstream forbidden: {0}")]
    UpstreamForbidden(String),

    #[error("upstream error: {0}")]
    UpstreamFatal(String),

    #[error("upstream stream corrupt: {0}")]
    StreamCorrupt(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True if this error should trigger an enqueued token refresh before
    /// (or instead of) retrying.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, Self::UpstreamAuthFailure)
    }

    /// True if the request handler's retry loop should add the current
    /// credential to the exclusion set and reselect, per the Selector's
    /// failover protocol.
    pub fn should_switch_credential(&self) -> bool {
        matches!(
            self,
            Self::UpstreamRetryable(_)
                | Self::UpstreamAuthFailure
                | Self::UpstreamQuotaExhausted
                | Self::UpstreamForbidden(_)
        )
    }

    /// True if this error is an expected operational condition (401/402/
    /// 403/429/5xx) that must not increment the credential's `errorCount`.
    pub fn skip_error_count(&self) -> bool {
        matches!(
            self,
            Self::UpstreamRetryable(_)
                | Self::UpstreamAuthFailure
                | Self::UpstreamQuotaExhausted
                | Self::UpstreamForbidden(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RequestTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NoAccountsAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamRetryable(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamAuthFailure => StatusCode::BAD_GATEWAY,
            Self::UpstreamQuotaExhausted => StatusCode::BAD_GATEWAY,
            Self::UpstreamForbidden(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamFatal(_) => StatusCode::BAD_GATEWAY,
            Self::StreamCorrupt(_) => StatusCode::BAD_GATEWAY,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_request_error",
            Self::RequestTooLarge(_) => "invalid_request_error",
            Self::Unauthorized(_) => "authentication_error",
            Self::NoAccountsAvailable => "overloaded_error",
            Self::UpstreamRetryable(_) => "api_error",
            Self::UpstreamAuthFailure => "api_error",
            Self::UpstreamQuotaExhausted => "api_error",
            Self::UpstreamForbidden(_) => "permission_error",
            Self::UpstreamFatal(_) => "api_error",
            Self::StreamCorrupt(_) => "api_error",
            Self::Store(_) | Self::Internal(_) => "api_error",
        }
    }
}

/// Anthropic-shaped error envelope: `{type: "error", error: {type, message}}`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    r#type: &'static str,
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    r#type: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::error!(error = %self, status = status.as_u16(), "request failed");
        let body = ErrorEnvelope {
            r#type: "error",
            error: ErrorDetail {
                r#type: self.error_type(),
                message: self.to_string(),
            },
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<kiro_gateway::Error> for AppError {
    fn from(err: kiro_gateway::Error) -> Self {
        use kiro_gateway::Error as E;
        match err {
            E::StreamCorrupt(msg) => Self::StreamCorrupt(msg),
            E::EmptyMessages | E::Conversion(_) => Self::BadRequest(err.to_string()),
            E::RequestTooLarge(msg) => Self::RequestTooLarge(msg),
            E::Api { status: 401, .. } => Self::UpstreamAuthFailure,
            E::Api { status: 402, .. } => Self::UpstreamQuotaExhausted,
            E::Api { status: 403, message } => Self::UpstreamForbidden(message),
            E::Api { status, message } if status == 429 || status >= 500 => {
                Self::UpstreamRetryable(format!("{status}: {message}"))
            }
            E::Api { status, message } => Self::UpstreamFatal(format!("{status}: {message}")),
            E::RateLimited { .. } | E::Network(_) | E::Timeout | E::RetriesExhausted { .. } => {
                Self::UpstreamRetryable(err.to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("invalid JSON: {err}"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_auth_failure_requires_reauth_and_failover() {
        let err = AppError::UpstreamAuthFailure;
        assert!(err.requires_reauth());
        assert!(err.should_switch_credential());
        assert!(err.skip_error_count());
    }

    #[test]
    fn bad_request_does_not_failover() {
        let err = AppError::BadRequest("x".into());
        assert!(!err.should_switch_credential());
        assert!(!err.skip_error_count());
    }

    #[test]
    fn maps_upstream_401_to_auth_failure() {
        let err: AppError = kiro_gateway::Error::Api {
            status: 401,
            message: "nope".into(),
        }
        .into();
        assert!(matches!(err, AppError::UpstreamAuthFailure));
    }

    #[test]
    fn maps_upstream_429_to_retryable() {
        let err: AppError = kiro_gateway::Error::Api {
            status: 429,
            message: "slow down".into(),
        }
        .into();
        assert!(matches!(err, AppError::UpstreamRetryable(_)));
        assert!(err.skip_error_count());
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(AppError::NoAccountsAvailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::RequestTooLarge("x".into()).status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(AppError::Unauthorized("x".into()).status_code(), StatusCode::UNAUTHORIZED);
    }
}
