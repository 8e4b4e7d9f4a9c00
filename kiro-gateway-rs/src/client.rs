//! Stateless send/stream entry points against the Kiro API.
//!
//! Unlike the teacher's `KiroClient`, this module does not own a credential
//! or a token lifecycle - the proxy's Credential Pool, Token Store and
//! Selector decide which credential backs a given call and pass its access
//! token and fingerprint in explicitly. That keeps failover (trying a
//! different credential on `should_switch_credential`) a caller-side retry
//! loop rather than something hidden inside this crate.

use std::pin::Pin;

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use tracing::debug;

use crate::convert::model_resolver::ModelResolver;
use crate::convert::request::build_kiro_payload;
use crate::convert::response::ResponseAccumulator;
use crate::error::{Error, Result};
use crate::models::request::MessagesRequest;
use crate::models::response::MessagesResponse;
use crate::models::stream::StreamEvent;
use crate::transport::framing::EventStreamDecoder;
use crate::transport::http::KiroHttpClient;

/// Parameters identifying which credential a call is made with.
///
/// Borrowed, not owned: the caller (the proxy's request handler) holds the
/// actual credential and token records.
pub struct CallContext<'a> {
    pub access_token: &'a str,
    pub fingerprint: &'a str,
    pub region: &'a str,
    pub profile_arn: Option<&'a str>,
}

/// Send a Messages API request and get a complete response.
pub async fn send_messages(
    http: &KiroHttpClient,
    model_resolver: &ModelResolver,
    ctx: &CallContext<'_>,
    request: &MessagesRequest,
) -> Result<MessagesResponse> {
    let model_id = model_resolver.resolve(&request.model);
    let payload = build_kiro_payload(request, &model_id, ctx.profile_arn)?;
    let url = crate::config::generate_assistant_response_url(ctx.region, ctx.profile_arn);

    debug!(model = model_id.as_str(), "Sending Messages request");

    let response = http
        .post_streaming(&url, ctx.access_token, ctx.fingerprint, &payload)
        .await?;

    let mut accumulator = ResponseAccumulator::new(&model_id);
    let mut decoder = EventStreamDecoder::new();
    let mut byte_stream = response.bytes_stream();

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = chunk_result.map_err(|e| Error::Stream(format!("Stream read error: {}", e)))?;
        for payload in decoder.feed(&chunk)? {
            accumulator.process_payload(&payload);
        }
    }

    Ok(accumulator.into_response())
}

/// Send a Messages API request and get a streaming response.
pub async fn send_messages_stream(
    http: &KiroHttpClient,
    model_resolver: &ModelResolver,
    ctx: CallContext<'_>,
    mut request: MessagesRequest,
) -> Result<Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>> {
    request.stream = true;
    let model_id = model_resolver.resolve(&request.model);
    let payload = build_kiro_payload(&request, &model_id, ctx.profile_arn)?;
    let url = crate::config::generate_assistant_response_url(ctx.region, ctx.profile_arn);

    debug!(model = model_id.as_str(), "Sending streaming Messages request");

    let access_token = ctx.access_token.to_string();
    let fingerprint = ctx.fingerprint.to_string();
    let response = http.post_streaming(&url, &access_token, &fingerprint, &payload).await?;
    let model_id_owned = model_id.clone();

    let stream = try_stream! {
        let mut accumulator = ResponseAccumulator::new(&model_id_owned);
        let mut decoder = EventStreamDecoder::new();

        yield accumulator.message_start_event();

        let mut byte_stream = response.bytes_stream();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = chunk_result.map_err(|e| Error::Stream(format!("Stream read error: {}", e)))?;
            for payload in decoder.feed(&chunk)? {
                for se in accumulator.process_payload(&payload) {
                    yield se;
                }
            }
        }

        for event in accumulator.finish_events() {
            yield event;
        }
    };

    Ok(Box::pin(stream))
}

/// List available models.
pub async fn list_models(
    http: &KiroHttpClient,
    ctx: &CallContext<'_>,
) -> Result<Vec<String>> {
    crate::api::models::list_models(http, ctx.access_token, ctx.fingerprint, ctx.region, ctx.profile_arn).await
}

/// Send a raw Kiro API payload (escape hatch, bypasses the Anthropic shape).
pub async fn raw_request(
    http: &KiroHttpClient,
    ctx: &CallContext<'_>,
    payload: &serde_json::Value,
) -> Result<String> {
    crate::api::raw::raw_request(http, ctx.access_token, ctx.fingerprint, ctx.region, ctx.profile_arn, payload).await
}

/// Send a raw Kiro API payload and get a streaming response.
pub async fn raw_request_stream(
    http: &KiroHttpClient,
    ctx: &CallContext<'_>,
    payload: &serde_json::Value,
) -> Result<reqwest::Response> {
    crate::api::raw::raw_request_stream(http, ctx.access_token, ctx.fingerprint, ctx.region, ctx.profile_arn, payload).await
}
