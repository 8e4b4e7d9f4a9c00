//! Core data model: the records the Credential Pool and Token Store manage.
//!
//! These mirror the shapes persisted under the `pools:claude-kiro-oauth` hash
//! and `tokens:claude-kiro-oauth:{uuid}` keys (see `store` module docs); the
//! wire protocol to the upstream Kiro API itself lives in `kiro_gateway`.

use chrono::{DateTime, Utc};
use kiro_gateway::models::auth::AuthMethod;
use serde::{Deserialize, Serialize};

/// One upstream account. Owned exclusively by the Credential Pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub uuid: String,
    #[serde(default = "default_provider_type")]
    pub provider_type: String,
    pub region: String,
    #[serde(default)]
    pub profile_arn: Option<String>,
    #[serde(default)]
    pub is_healthy: bool,
    #[serde(default)]
    pub is_disabled: bool,
    /// ISO-8601 timestamp; a credential is ineligible while this is set and
    /// in the future, independent of `is_healthy`.
    #[serde(default)]
    pub scheduled_recovery_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_health_check_time: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
}

fn default_provider_type() -> String {
    "claude-kiro-oauth".to_string()
}

impl Credential {
    /// Deterministic per-credential fingerprint sent as part of the upstream
    /// User-Agent; derives from fields only this credential owns so two
    /// pooled credentials never collide.
    pub fn fingerprint(&self, client_id: Option<&str>) -> String {
        kiro_gateway::auth::constants::credential_fingerprint(
            &self.uuid,
            self.profile_arn.as_deref().unwrap_or(""),
            client_id.unwrap_or(""),
        )
    }
}

/// One refresh-token-backed access token. Owned exclusively by the Token Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// ISO-8601 string; callers may encounter either second- or
    /// millisecond-precision upstream values, or a missing/unparseable
    /// value on a corrupt row. `None` means exactly that: absent or
    /// malformed, and is treated as already expired rather than a hard
    /// deserialize error.
    #[serde(default, deserialize_with = "deserialize_lenient_datetime")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub last_refreshed: Option<DateTime<Utc>>,
}

/// Deserializes an `expiresAt` value tolerantly: a missing field, a `null`,
/// or a string that doesn't parse as RFC 3339 all yield `None` rather than
/// failing the whole `Token` deserialize.
fn deserialize_lenient_datetime<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }))
}

impl Token {
    /// True if `expires_at` is missing/unparseable, or `expires_at - now < threshold`.
    pub fn is_expiring_soon(&self, threshold: chrono::Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - Utc::now() < threshold,
            None => true,
        }
    }
}

/// Singleton app-level config stored alongside credentials: shared API key
/// and default provider. Cached in memory, re-read on a cache miss.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub api_key: String,
    #[serde(default = "default_provider_type")]
    pub default_provider: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_for_same_credential() {
        let cred = Credential {
            uuid: "u1".into(),
            provider_type: "claude-kiro-oauth".into(),
            region: "us-east-1".into(),
            profile_arn: Some("arn:aws:x".into()),
            is_healthy: true,
            is_disabled: false,
            scheduled_recovery_time: None,
            usage_count: 0,
            error_count: 0,
            last_used: None,
            last_error_time: None,
            last_health_check_time: None,
            added_at: Utc::now(),
        };
        assert_eq!(cred.fingerprint(None), cred.fingerprint(None));
    }

    #[test]
    fn token_expiring_soon_threshold() {
        let token = Token {
            access_token: "a".into(),
            refresh_token: "r".into(),
            client_id: None,
            client_secret: None,
            expires_at: Some(Utc::now() + chrono::Duration::seconds(120)),
            auth_method: AuthMethod::Social,
            last_refreshed: None,
        };
        assert!(token.is_expiring_soon(chrono::Duration::seconds(300)));
        assert!(!token.is_expiring_soon(chrono::Duration::seconds(60)));
    }

    #[test]
    fn token_missing_expiry_is_treated_as_expiring_soon() {
        let token = Token {
            access_token: "a".into(),
            refresh_token: "r".into(),
            client_id: None,
            client_secret: None,
            expires_at: None,
            auth_method: AuthMethod::Social,
            last_refreshed: None,
        };
        assert!(token.is_expiring_soon(chrono::Duration::seconds(0)));
    }

    #[test]
    fn token_tolerates_malformed_expires_at_on_deserialize() {
        let json = serde_json::json!({
            "accessToken": "a",
            "refreshToken": "r",
            "expiresAt": "not-a-date",
        });
        let token: Token = serde_json::from_value(json).unwrap();
        assert!(token.expires_at.is_none());
        assert!(token.is_expiring_soon(chrono::Duration::seconds(0)));
    }
}
