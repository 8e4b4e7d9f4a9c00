//! Runtime configuration: TOML file + `KIRO_PROXY_*` environment overrides.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Tracks which configuration settings were overridden by an environment
/// variable, for observability (logged once at startup).
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            key_prefix: default_key_prefix(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AuthConfig {
    /// The shared secret compared against `x-api-key`/`Authorization:
    /// Bearer`. Empty means no caller has been provisioned yet; every
    /// request is rejected until this (or the store's `AppConfig`) is set.
    #[serde(default)]
    pub api_key: String,
    /// Whether a 401 from upstream should rotate the responsible
    /// credential's identity instead of just enqueuing a refresh on the
    /// same UUID. Unimplemented: `main` refuses to start with this set,
    /// since the upstream's identity-rotation contract has not been
    /// verified against this crate's pool model.
    #[serde(default)]
    pub rotate_identity_on_401: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: u64,
    #[serde(default = "default_health_cooldown_secs")]
    pub health_cooldown_secs: u64,
    #[serde(default = "default_account_cache_ttl_secs")]
    pub account_cache_ttl_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            max_retries: default_max_retries(),
            refresh_threshold_secs: default_refresh_threshold_secs(),
            health_cooldown_secs: default_health_cooldown_secs(),
            account_cache_ttl_secs: default_account_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
const fn default_port() -> u16 {
    8787
}
fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_key_prefix() -> String {
    "kiro-proxy:".to_string()
}
const fn default_pool_size() -> u32 {
    8
}
const fn default_max_concurrent_requests() -> usize {
    64
}
const fn default_max_retries() -> u32 {
    3
}
const fn default_refresh_threshold_secs() -> u64 {
    300
}
const fn default_health_cooldown_secs() -> u64 {
    6
}
const fn default_account_cache_ttl_secs() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            auth: AuthConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
            env_overrides: EnvOverrides::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file at `path`, falling back to
    /// defaults when it does not exist, then apply `KIRO_PROXY_*`
    /// environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }

        env_str!("server.host", "KIRO_PROXY_SERVER_HOST", self.server.host);
        env_parse!("server.port", "KIRO_PROXY_SERVER_PORT", self.server.port);
        if let Ok(val) = std::env::var("KIRO_PROXY_SERVER_CORS_ORIGINS") {
            self.server.cors_origins = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            ov.record("server.cors_origins", "KIRO_PROXY_SERVER_CORS_ORIGINS");
        }

        env_str!("store.url", "KIRO_PROXY_STORE_URL", self.store.url);
        env_str!(
            "store.key_prefix",
            "KIRO_PROXY_STORE_KEY_PREFIX",
            self.store.key_prefix
        );
        env_parse!(
            "store.pool_size",
            "KIRO_PROXY_STORE_POOL_SIZE",
            self.store.pool_size
        );

        env_str!("auth.api_key", "KIRO_PROXY_AUTH_API_KEY", self.auth.api_key);
        env_bool!(
            "auth.rotate_identity_on_401",
            "KIRO_PROXY_AUTH_ROTATE_IDENTITY_ON_401",
            self.auth.rotate_identity_on_401
        );

        env_parse!(
            "limits.max_concurrent_requests",
            "KIRO_PROXY_MAX_CONCURRENT_REQUESTS",
            self.limits.max_concurrent_requests
        );
        env_parse!(
            "limits.max_retries",
            "KIRO_PROXY_MAX_RETRIES",
            self.limits.max_retries
        );
        env_parse!(
            "limits.refresh_threshold_secs",
            "KIRO_PROXY_REFRESH_THRESHOLD_SECS",
            self.limits.refresh_threshold_secs
        );
        env_parse!(
            "limits.health_cooldown_secs",
            "KIRO_PROXY_HEALTH_COOLDOWN_SECS",
            self.limits.health_cooldown_secs
        );
        env_parse!(
            "limits.account_cache_ttl_secs",
            "KIRO_PROXY_ACCOUNT_CACHE_TTL_SECS",
            self.limits.account_cache_ttl_secs
        );

        env_str!("logging.level", "KIRO_PROXY_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "KIRO_PROXY_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RuntimeConfig::default();
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.limits.max_retries, 3);
        assert_eq!(config.limits.health_cooldown_secs, 6);
        assert_eq!(config.limits.refresh_threshold_secs, 300);
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let config = RuntimeConfig::load(Path::new("/nonexistent/kiro-proxy.toml")).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn listen_addr_combines_host_and_port() {
        let config = RuntimeConfig::default();
        assert_eq!(config.listen_addr(), "127.0.0.1:8787");
    }

    #[test]
    fn env_override_takes_precedence_and_is_recorded() {
        std::env::set_var("KIRO_PROXY_SERVER_PORT", "9999");
        let mut config = RuntimeConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.server.port, 9999);
        assert!(config.env_overrides.is_overridden("server.port"));
        std::env::remove_var("KIRO_PROXY_SERVER_PORT");
    }
}
