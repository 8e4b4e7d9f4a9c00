//! Authentication-related wire types.
//!
//! The credential/token records themselves are owned by the proxy's
//! Credential Pool and Token Store (outside this crate); this module only
//! carries the shapes needed to talk to the two refresh endpoints.

use serde::{Deserialize, Serialize};

/// Which upstream token-refresh flavor a credential uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// Kiro Desktop refresh endpoint: `POST /refreshToken` with `{refreshToken}`.
    #[default]
    Social,
    /// AWS SSO OIDC refresh endpoint: `POST /token` with client credentials.
    BuilderId,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Social => write!(f, "social"),
            Self::BuilderId => write!(f, "builder-id"),
        }
    }
}

/// Response from the Kiro Desktop Auth refresh endpoint (`authMethod = social`).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroDesktopRefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    #[serde(default)]
    pub profile_arn: Option<String>,
}

impl std::fmt::Debug for KiroDesktopRefreshResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiroDesktopRefreshResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("profile_arn", &self.profile_arn)
            .finish()
    }
}

/// Response from the AWS SSO OIDC token endpoint (`authMethod = builder-id`).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsSsoOidcRefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    #[serde(default)]
    pub profile_arn: Option<String>,
}

impl std::fmt::Debug for AwsSsoOidcRefreshResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSsoOidcRefreshResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("profile_arn", &self.profile_arn)
            .finish()
    }
}

fn default_expires_in() -> i64 {
    3600
}
