//! HTTP client with retry logic for the Kiro API.
//!
//! This client is deliberately credential-agnostic: it is handed an access
//! token and fingerprint per call rather than owning a token lifecycle. The
//! proxy's Refresh Coordinator and Selector decide which credential to use
//! and how to fail over; this client only knows how to talk to one request
//! with one token.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{BASE_RETRY_DELAY, CONNECT_TIMEOUT, MAX_RETRIES, REQUEST_TIMEOUT};
use crate::error::{Error, Result};
use crate::transport::headers;

/// HTTP client for the Kiro API.
pub struct KiroHttpClient {
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl KiroHttpClient {
    /// Create a new HTTP client.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");

        // No request timeout: streaming responses can run far longer than
        // REQUEST_TIMEOUT; read-side liveness is enforced by the caller via
        // STREAMING_READ_TIMEOUT between chunks instead.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("Failed to build streaming HTTP client");

        Self { client, stream_client }
    }

    /// Create with a custom reqwest client (used for both streaming and
    /// non-streaming requests; mainly an escape hatch for tests).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            stream_client: client.clone(),
            client,
        }
    }

    fn jittered_delay(attempt: u32) -> Duration {
        let base = BASE_RETRY_DELAY * 2u32.pow(attempt.saturating_sub(1));
        let jitter_frac = rand::rng().random_range(-0.5..=0.5);
        let millis = (base.as_millis() as f64) * (1.0 + jitter_frac);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Send a POST request with retry on 429/5xx.
    ///
    /// 401/402/403 are *not* retried here - they are
    /// [`should_switch_credential`](Error::should_switch_credential) errors
    /// the caller handles by failing over to another credential via the
    /// Selector, not by retrying the same token against the same endpoint.
    pub async fn post_with_retry(
        &self,
        url: &str,
        access_token: &str,
        fingerprint: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = Self::jittered_delay(attempt);
                debug!(attempt, delay_ms = delay.as_millis(), "Retrying request");
                tokio::time::sleep(delay).await;
            }

            let hdrs = headers::kiro_api_headers(access_token, fingerprint);

            match self.client.post(url).headers(hdrs).json(body).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if response.status().is_success() {
                        return Ok(response);
                    }

                    match status {
                        429 => {
                            let retry_after = response
                                .headers()
                                .get("retry-after")
                                .and_then(|v| v.to_str().ok())
                                .and_then(|v| v.parse::<u64>().ok())
                                .map(Duration::from_secs);

                            if let Some(delay) = retry_after {
                                info!(delay_secs = delay.as_secs(), "Rate limited, waiting");
                                tokio::time::sleep(delay).await;
                            }

                            last_error = Some(Error::RateLimited { retry_after });
                        }
                        500..=599 => {
                            let body_text = response.text().await.unwrap_or_default();
                            warn!(status, body = body_text.as_str(), "Server error, retrying");
                            last_error = Some(Error::Api {
                                status,
                                message: body_text,
                            });
                        }
                        _ => {
                            let body_text = response.text().await.unwrap_or_default();
                            return Err(Error::Api {
                                status,
                                message: body_text,
                            });
                        }
                    }
                }
                Err(e) => {
                    if e.is_timeout() {
                        warn!("Request timed out (attempt {})", attempt + 1);
                        last_error = Some(Error::Timeout);
                    } else {
                        warn!("Request failed (attempt {}): {}", attempt + 1, e);
                        last_error = Some(Error::Network(e));
                    }
                }
            }
        }

        Err(Error::RetriesExhausted {
            attempts: MAX_RETRIES,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".into()),
        })
    }

    /// Send a streaming POST request. Returns the response for stream processing.
    ///
    /// Uses `Connection: close` to prevent a `CLOSE_WAIT` socket leak. Does
    /// not retry: a 401/402/403 on a stream is a `should_switch_credential`
    /// error the caller turns into a Selector failover against a fresh
    /// credential, not a retry against this one.
    pub async fn post_streaming(
        &self,
        url: &str,
        access_token: &str,
        fingerprint: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let hdrs = headers::kiro_streaming_headers(access_token, fingerprint);

        let response = self
            .stream_client
            .post(url)
            .headers(hdrs)
            .json(body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { Error::Timeout } else { Error::Network(e) })?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(response);
        }

        let body_text = response.text().await.unwrap_or_default();
        Err(Error::Api {
            status,
            message: body_text,
        })
    }

    /// Send a GET request (for ListAvailableModels, etc.).
    pub async fn get(&self, url: &str, access_token: &str, fingerprint: &str) -> Result<reqwest::Response> {
        let hdrs = headers::kiro_api_headers(access_token, fingerprint);

        let response = self
            .client
            .get(url)
            .headers(hdrs)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { Error::Timeout } else { Error::Network(e) })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body_text,
            });
        }

        Ok(response)
    }
}

impl Default for KiroHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KiroHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiroHttpClient").finish()
    }
}
