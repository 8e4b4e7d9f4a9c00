//! Error types for kiro-gateway.

use std::time::Duration;
use thiserror::Error;

/// The main error type for kiro-gateway.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ───────────────────────────────────────────────────────
    /// No credentials available.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Token has expired and refresh failed.
    #[error("Token expired")]
    TokenExpired,

    /// Token refresh failed.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Missing required credential field.
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    // ── API ──────────────────────────────────────────────────────────────────
    /// API returned an error response.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Rate limited by the API.
    #[error("Rate limited - retry after {retry_after:?}")]
    RateLimited {
        /// Suggested retry delay, if provided.
        retry_after: Option<Duration>,
    },

    /// All retry attempts exhausted.
    #[error("Request failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Description of the last error.
        message: String,
    },

    // ── Conversion ───────────────────────────────────────────────────────────
    /// Error converting between Anthropic and Kiro formats.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// No messages provided in request.
    #[error("No messages to send")]
    EmptyMessages,

    /// Estimated input size exceeds the context window.
    #[error("Request too large: {0}")]
    RequestTooLarge(String),

    // ── Storage ──────────────────────────────────────────────────────────────
    /// Generic storage error (credential/token persistence).
    #[error("Storage error: {0}")]
    Storage(String),

    // ── Infrastructure ───────────────────────────────────────────────────────
    /// Network/HTTP error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Streaming error (non-fatal, e.g. a payload didn't match any known shape).
    #[error("Stream error: {0}")]
    Stream(String),

    /// Event-stream framing is corrupt (CRC mismatch or malformed prelude).
    /// Fatal: the response is aborted, no further events are emitted.
    #[error("Stream corrupt: {0}")]
    StreamCorrupt(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request timeout.
    #[error("Request timed out")]
    Timeout,
}

impl Error {
    /// Returns true if this error indicates re-authentication is needed.
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Error::NotAuthenticated
                | Error::TokenExpired
                | Error::RefreshFailed(_)
                | Error::Api { status: 401, .. }
                | Error::Api { status: 403, .. }
        )
    }

    /// Returns true if a handler encountering this error should fail over to
    /// another credential rather than surface it to the caller directly.
    #[must_use]
    pub fn should_switch_credential(&self) -> bool {
        match self {
            Error::Api { status, .. } => {
                matches!(*status, 401 | 402 | 403 | 429) || *status >= 500
            }
            Error::RateLimited { .. } | Error::Network(_) | Error::Timeout | Error::StreamCorrupt(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error is an expected operational condition that
    /// should not count against the credential's `errorCount`.
    #[must_use]
    pub fn skip_error_count(&self) -> bool {
        match self {
            Error::Api { status, .. } => matches!(*status, 401 | 402 | 403 | 429) || *status >= 500,
            Error::RateLimited { .. } => true,
            _ => false,
        }
    }
}

/// Convenience type alias.
pub type Result<T> = std::result::Result<T, Error>;
