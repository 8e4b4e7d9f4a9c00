//! `POST /v1/messages` and `POST /v1/messages/count_tokens`.
//!
//! The failover loop lives here rather than in the Selector or the
//! translator: `kiro_gateway::client` is deliberately credential-agnostic,
//! so retrying against a different credential on a retryable upstream
//! error is this handler's job, driven entirely by the `AppError`
//! predicate methods (`should_switch_credential`/`requires_reauth`/
//! `skip_error_count`) rather than re-deriving policy from status codes.

use std::collections::HashSet;
use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};

use kiro_gateway::client::{self, CallContext};
use kiro_gateway::convert::response::estimate_tokens;
use kiro_gateway::models::request::{Message, MessagesRequest, SystemPrompt};
use kiro_gateway::models::stream::StreamEvent;

use crate::domain::{Credential, Token};
use crate::error::{AppError, Result};
use crate::AppState;

/// Anthropic's context window; a request whose estimated input plus
/// `max_tokens` exceeds this is rejected without contacting upstream.
const MAX_CONTEXT_TOKENS: u32 = 200_000;

/// POST /v1/messages
pub async fn messages(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let request: MessagesRequest = serde_json::from_slice(&body)?;
    check_request_size(&request)?;

    if request.stream {
        Ok(messages_stream(state, request).await?.into_response())
    } else {
        let response = dispatch_non_streaming(&state, request).await?;
        Ok(Json(response).into_response())
    }
}

fn check_request_size(request: &MessagesRequest) -> Result<()> {
    let estimated_input = estimate_request_tokens(request);
    if estimated_input + request.max_tokens > MAX_CONTEXT_TOKENS {
        return Err(AppError::RequestTooLarge(format!(
            "estimated input ({estimated_input}) + max_tokens ({}) exceeds the {MAX_CONTEXT_TOKENS}-token context window",
            request.max_tokens
        )));
    }
    Ok(())
}

fn estimate_request_tokens(request: &MessagesRequest) -> u32 {
    let mut total = 0u32;
    if let Some(system) = &request.system {
        total += estimate_tokens(&system.text());
    }
    for message in &request.messages {
        total += estimate_tokens(&message.content.text());
    }
    if let Some(tools) = &request.tools {
        for tool in tools {
            total += estimate_tokens(&tool.input_schema.to_string());
            if let Some(desc) = &tool.description {
                total += estimate_tokens(desc);
            }
        }
    }
    total
}

async fn dispatch_non_streaming(
    state: &AppState,
    request: MessagesRequest,
) -> Result<kiro_gateway::models::response::MessagesResponse> {
    let mut excluded = HashSet::new();
    let max_retries = state.config.limits.max_retries;

    for attempt in 0..=max_retries {
        let (cred, token) = select_credential(state, &excluded).await?;
        let fingerprint = cred.fingerprint(token.client_id.as_deref());
        let ctx = CallContext {
            access_token: &token.access_token,
            fingerprint: &fingerprint,
            region: &cred.region,
            profile_arn: cred.profile_arn.as_deref(),
        };

        match client::send_messages(&state.http, &state.model_resolver, &ctx, &request).await {
            Ok(response) => {
                state.pool.record_success(&cred.uuid).await?;
                return Ok(response);
            }
            Err(err) => {
                let app_err: AppError = err.into();
                match handle_upstream_error(state, &cred.uuid, app_err, attempt, max_retries).await {
                    RetryDecision::Retry => {
                        excluded.insert(cred.uuid);
                        continue;
                    }
                    RetryDecision::Fail(err) => return Err(err),
                }
            }
        }
    }

    Err(AppError::NoAccountsAvailable)
}

async fn messages_stream(
    state: AppState,
    request: MessagesRequest,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let mut excluded = HashSet::new();
    let max_retries = state.config.limits.max_retries;

    let (uuid, inner) = loop {
        let (cred, token) = select_credential(&state, &excluded).await?;
        let fingerprint = cred.fingerprint(token.client_id.as_deref());
        let ctx = CallContext {
            access_token: &token.access_token,
            fingerprint: &fingerprint,
            region: &cred.region,
            profile_arn: cred.profile_arn.as_deref(),
        };

        match client::send_messages_stream(&state.http, &state.model_resolver, ctx, request.clone()).await {
            Ok(stream) => break (cred.uuid, stream),
            Err(err) => {
                let app_err: AppError = err.into();
                let attempt = excluded.len() as u32;
                match handle_upstream_error(&state, &cred.uuid, app_err, attempt, max_retries).await {
                    RetryDecision::Retry => {
                        excluded.insert(cred.uuid);
                        continue;
                    }
                    RetryDecision::Fail(err) => return Err(err),
                }
            }
        }
    };

    state.pool.record_success(&uuid).await?;

    let sse_stream = inner.map(|item| {
        let event = match item {
            Ok(event) => sse_event_for(&event),
            Err(err) => sse_error_event(&AppError::from(err)),
        };
        Ok(event)
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()))
}

enum RetryDecision {
    Retry,
    Fail(AppError),
}

/// Apply the pool-state side effect dictated by `err` unconditionally, then
/// decide whether the handler's loop should reselect and retry. The
/// credential-state effect (mark unhealthy, enqueue refresh, ...) happens
/// regardless of the retry budget: a 402/401/403 on the final attempt must
/// still quarantine or flag the credential for refresh, or it stays
/// `isHealthy=true` and gets reselected on the next request.
async fn handle_upstream_error(
    state: &AppState,
    uuid: &str,
    err: AppError,
    attempt: u32,
    max_retries: u32,
) -> RetryDecision {
    if !err.should_switch_credential() {
        if matches!(err, AppError::UpstreamFatal(_)) {
            let _ = state.pool.mark_unhealthy(uuid, &err.to_string()).await;
        }
        return RetryDecision::Fail(err);
    }

    match &err {
        AppError::UpstreamAuthFailure => {
            state.pool.mark_need_refresh(uuid).await;
        }
        AppError::UpstreamQuotaExhausted => {
            let recovery = crate::pool::first_of_next_month_utc(chrono::Utc::now());
            let _ = state
                .pool
                .mark_unhealthy_until(uuid, "402 quota exhausted", recovery)
                .await;
        }
        AppError::UpstreamForbidden(message) => {
            if message.contains("temporarily is suspended") {
                let _ = state
                    .pool
                    .mark_unhealthy_until(uuid, message, chrono::DateTime::<chrono::Utc>::MAX_UTC)
                    .await;
            } else {
                state.pool.mark_need_refresh(uuid).await;
            }
        }
        _ => {}
    }

    if attempt >= max_retries {
        return RetryDecision::Fail(err);
    }

    if matches!(err, AppError::UpstreamRetryable(_)) {
        let base = std::time::Duration::from_secs(1) * 2u32.pow(attempt);
        let jitter = rand::rng().random_range(0.5..=1.5);
        let backoff = std::time::Duration::from_secs_f64(base.as_secs_f64() * jitter);
        tokio::time::sleep(backoff).await;
    }

    RetryDecision::Retry
}

async fn select_credential(state: &AppState, excluded: &HashSet<String>) -> Result<(Credential, Token)> {
    let cred = state.selector.select(excluded).await?;
    let token = state
        .tokens
        .get(&cred.uuid)
        .await?
        .ok_or_else(|| AppError::Store(format!("no token on file for credential {}", cred.uuid)))?;

    let threshold = chrono::Duration::seconds(state.config.limits.refresh_threshold_secs as i64);
    if token.is_expiring_soon(threshold) {
        state.pool.mark_need_refresh(&cred.uuid).await;
    }

    Ok((cred, token))
}

fn sse_event_for(event: &StreamEvent) -> Event {
    let name = match event {
        StreamEvent::MessageStart { .. } => "message_start",
        StreamEvent::ContentBlockStart { .. } => "content_block_start",
        StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
        StreamEvent::ContentBlockStop { .. } => "content_block_stop",
        StreamEvent::MessageDelta { .. } => "message_delta",
        StreamEvent::MessageStop => "message_stop",
        StreamEvent::Ping => "ping",
        StreamEvent::Error { .. } => "error",
    };
    Event::default().event(name).json_data(event).unwrap_or_else(|_| Event::default().event("error"))
}

fn sse_error_event(err: &AppError) -> Event {
    #[derive(Serialize)]
    struct ErrorPayload {
        r#type: &'static str,
        error: ErrorBody,
    }
    #[derive(Serialize)]
    struct ErrorBody {
        r#type: &'static str,
        message: String,
    }

    let payload = ErrorPayload {
        r#type: "error",
        error: ErrorBody {
            r#type: "api_error",
            message: err.to_string(),
        },
    };
    Event::default()
        .event("error")
        .json_data(&payload)
        .unwrap_or_else(|_| Event::default().event("error").data(err.to_string()))
}

/// Partial request body accepted by `count_tokens`: no `max_tokens`, no
/// `stream` — the caller only wants an estimate before committing to a
/// real call.
#[derive(Debug, Deserialize)]
pub struct CountTokensRequest {
    #[serde(default)]
    pub system: Option<SystemPrompt>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Option<Vec<kiro_gateway::models::request::Tool>>,
}

#[derive(Debug, Serialize)]
pub struct CountTokensResponse {
    pub input_tokens: u32,
}

/// POST /v1/messages/count_tokens
pub async fn count_tokens(body: Bytes) -> Result<Json<CountTokensResponse>> {
    let request: CountTokensRequest = serde_json::from_slice(&body)?;

    let mut total = 0u32;
    if let Some(system) = &request.system {
        total += estimate_tokens(&system.text());
    }
    for message in &request.messages {
        total += estimate_tokens(&message.content.text());
    }
    if let Some(tools) = &request.tools {
        for tool in tools {
            total += estimate_tokens(&tool.input_schema.to_string());
            if let Some(desc) = &tool.description {
                total += estimate_tokens(desc);
            }
        }
    }

    Ok(Json(CountTokensResponse { input_tokens: total.max(1) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiro_gateway::models::request::{MessageContent, Role};

    #[test]
    fn check_request_size_rejects_oversized_request() {
        let huge_text = "a".repeat(900_000);
        let request = MessagesRequest {
            model: "claude-sonnet-4-5".into(),
            max_tokens: 4096,
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text(huge_text),
            }],
            system: None,
            tools: None,
            tool_choice: None,
            stream: false,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            thinking: None,
        };
        let err = check_request_size(&request).unwrap_err();
        assert!(matches!(err, AppError::RequestTooLarge(_)));
    }

    #[test]
    fn check_request_size_accepts_small_request() {
        let request = MessagesRequest::new("claude-sonnet-4-5", 1024);
        assert!(check_request_size(&request).is_ok());
    }

    #[tokio::test]
    async fn count_tokens_sums_system_and_message_text() {
        let body = serde_json::json!({
            "system": "You are helpful.",
            "messages": [{"role": "user", "content": "Hello there"}]
        });
        let response = count_tokens(Bytes::from(serde_json::to_vec(&body).unwrap()))
            .await
            .unwrap();
        assert!(response.0.input_tokens > 0);
    }
}
