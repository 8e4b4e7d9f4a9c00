//! Configuration constants and URL templates for the Kiro API.

use std::time::Duration;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Token refresh threshold - the passive refresh path enqueues a refresh once
/// a token is within this window of expiry (default 5 minutes).
pub const TOKEN_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Safety margin for token expiry checks.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// Maximum number of retry attempts (selector failover and upstream retry).
pub const MAX_RETRIES: u32 = 3;

/// Base delay between retry attempts (exponential backoff: delay * 2^attempt, jittered).
pub const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Timeout for a token refresh call - deliberately shorter than request
/// timeouts so a slow refresh cannot wedge all requests on that credential.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// Read timeout for streaming responses (between chunks).
pub const STREAMING_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Connect timeout for HTTP requests.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for non-streaming requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum tool name length (Kiro API limit).
pub const MAX_TOOL_NAME_LENGTH: usize = 64;

/// Maximum tool description length before truncation.
pub const MAX_TOOL_DESCRIPTION_LENGTH: usize = 9_216;

/// Default max input tokens for context usage calculation / request-size rejection.
pub const DEFAULT_MAX_INPUT_TOKENS: u32 = 200_000;

/// Model cache TTL.
pub const MODEL_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Number of most-recent messages (counted from the end) whose inline images
/// are retained verbatim; earlier images are replaced with a placeholder.
pub const IMAGE_RETENTION_WINDOW: usize = 5;

/// Default thinking budget when the caller doesn't specify one.
pub const DEFAULT_THINKING_BUDGET: u32 = 20_000;

/// Minimum allowed thinking budget.
pub const MIN_THINKING_BUDGET: u32 = 1;

/// Maximum allowed thinking budget.
pub const MAX_THINKING_BUDGET: u32 = 24_576;

/// Total token count implied by a `contextUsagePercentage` of 100.0.
pub const CONTEXT_USAGE_FULL_TOKENS: f64 = 172_500.0;

/// Token distribution ratio (of 28 total parts) applied to `inputTokens`
/// once reconstructed: input=1, cache_creation=2, cache_read=25.
pub const USAGE_DISTRIBUTION_PARTS: u32 = 28;

/// Distribution is skipped (all tokens attributed to `input`) below this total.
pub const USAGE_DISTRIBUTION_MIN_TOTAL: u32 = 100;

/// Kiro Desktop Auth refresh URL template.
/// `{region}` is replaced at runtime.
pub const KIRO_REFRESH_URL_TEMPLATE: &str =
    "https://prod.{region}.auth.desktop.kiro.dev/refreshToken";

/// AWS SSO OIDC token URL template.
pub const AWS_SSO_OIDC_URL_TEMPLATE: &str = "https://oidc.{region}.amazonaws.com/token";

/// Kiro API host template (generateAssistantResponse, ListAvailableModels).
pub const KIRO_API_HOST_TEMPLATE: &str = "https://q.{region}.amazonaws.com";

/// Kiro API origin query param.
pub const API_ORIGIN: &str = "AI_EDITOR";

/// Returns the Kiro Desktop Auth refresh URL for the given region.
pub fn kiro_refresh_url(region: &str) -> String {
    KIRO_REFRESH_URL_TEMPLATE.replace("{region}", region)
}

/// Returns the AWS SSO OIDC token URL for the given region.
pub fn aws_sso_oidc_url(region: &str) -> String {
    AWS_SSO_OIDC_URL_TEMPLATE.replace("{region}", region)
}

/// Returns the Kiro API host for the given region.
pub fn kiro_api_host(region: &str) -> String {
    KIRO_API_HOST_TEMPLATE.replace("{region}", region)
}

/// Returns the generateAssistantResponse URL for the given region.
pub fn generate_assistant_response_url(region: &str, profile_arn: Option<&str>) -> String {
    let host = kiro_api_host(region);
    match profile_arn {
        Some(arn) => format!(
            "{}/generateAssistantResponse?origin={}&profileArn={}",
            host, API_ORIGIN, arn
        ),
        None => format!("{}/generateAssistantResponse?origin={}", host, API_ORIGIN),
    }
}

/// Returns the ListAvailableModels URL for the given region.
pub fn list_models_url(region: &str, profile_arn: Option<&str>) -> String {
    let host = kiro_api_host(region);
    match profile_arn {
        Some(arn) => format!(
            "{}/ListAvailableModels?origin={}&profileArn={}",
            host, API_ORIGIN, arn
        ),
        None => format!("{}/ListAvailableModels?origin={}", host, API_ORIGIN),
    }
}

/// Hidden models - not returned by Kiro ListAvailableModels but still functional.
pub fn hidden_models() -> Vec<(&'static str, &'static str)> {
    vec![("claude-3.7-sonnet", "CLAUDE_3_7_SONNET_20250219_V1_0")]
}

/// Fallback models when ListAvailableModels is unreachable.
pub fn fallback_models() -> Vec<&'static str> {
    vec![
        "auto",
        "claude-sonnet-4",
        "claude-haiku-4.5",
        "claude-sonnet-4.5",
        "claude-opus-4.5",
    ]
}
