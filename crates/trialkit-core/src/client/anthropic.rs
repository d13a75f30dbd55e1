//! [`MessagesClient`] backed by the Anthropic Messages HTTP API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::{debug, warn};

use super::ratelimit::RateLimits;
use super::types::{Message, MessageRequest, MessageResponse};
use super::{ApiError, MessagesClient};

const API_VERSION: &str = "2023-06-01";

/// HTTP client for `POST {base_url}/v1/messages`.
///
/// Transient failures (429, 5xx, 529 overloaded, connection errors) are
/// retried with exponential backoff up to `max_retries` times. Nothing above
/// this layer retries.
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl AnthropicClient {
    pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
    pub const DEFAULT_MAX_RETRIES: u32 = 5;

    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_retries: Self::DEFAULT_MAX_RETRIES,
        }
    }

    /// Build a client from `ANTHROPIC_API_KEY` and the given base URL.
    pub fn from_env(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ApiError::MissingApiKey)?;
        Ok(Self::new(key, base_url))
    }

    /// Override the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    /// Send a request and return the response headers alongside the body.
    async fn send(&self, request: &MessageRequest) -> Result<(HeaderMap, MessageResponse)> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(request).await {
                Ok(ok) => return Ok(ok),
                Err(err) if attempt < self.max_retries && is_retryable(&err) => {
                    let delay = backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying messages request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("messages request to model {:?} failed", request.model)
                    });
                }
            }
        }
    }

    async fn send_once(
        &self,
        request: &MessageRequest,
    ) -> Result<(HeaderMap, MessageResponse), ApiError> {
        let resp = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text.chars().take(400).collect(),
            });
        }

        let body: MessageResponse = serde_json::from_str(&text).map_err(|e| {
            ApiError::Decode(format!(
                "{e}; body_prefix={}",
                text.chars().take(200).collect::<String>()
            ))
        })?;
        debug!(
            model = %request.model,
            input_tokens = body.usage.input_tokens,
            output_tokens = body.usage.output_tokens,
            "messages request completed"
        );
        Ok((headers, body))
    }

    /// Make a minimal one-token call and read the organisation's rate limits
    /// from the response headers.
    pub async fn probe_rate_limits(&self, model: &str) -> Result<RateLimits> {
        let request = MessageRequest::new(model, 1, vec![Message::user("hi")]);
        let (headers, _) = self.send(&request).await?;
        Ok(RateLimits::from_headers(&headers))
    }
}

#[async_trait]
impl MessagesClient for AnthropicClient {
    async fn create(&self, request: &MessageRequest) -> Result<MessageResponse> {
        let (_, body) = self.send(request).await?;
        Ok(body)
    }
}

fn is_retryable(err: &ApiError) -> bool {
    match err {
        ApiError::Status { status, .. } => *status == 429 || *status >= 500,
        ApiError::Http(e) => e.is_timeout() || e.is_connect(),
        ApiError::Decode(_) | ApiError::MissingApiKey => false,
    }
}

/// 500ms, 1s, 2s, ... capped at 8s.
fn backoff(attempt: u32) -> Duration {
    let ms = 500u64.saturating_mul(1u64 << attempt.min(4));
    Duration::from_millis(ms.min(8_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff(0), Duration::from_millis(500));
        assert_eq!(backoff(1), Duration::from_millis(1000));
        assert_eq!(backoff(3), Duration::from_millis(4000));
        assert_eq!(backoff(4), Duration::from_millis(8000));
        assert_eq!(backoff(10), Duration::from_millis(8000));
    }

    #[test]
    fn retry_classification() {
        let overloaded = ApiError::Status {
            status: 529,
            body: String::new(),
        };
        let limited = ApiError::Status {
            status: 429,
            body: String::new(),
        };
        let bad_request = ApiError::Status {
            status: 400,
            body: String::new(),
        };
        assert!(is_retryable(&overloaded));
        assert!(is_retryable(&limited));
        assert!(!is_retryable(&bad_request));
        assert!(!is_retryable(&ApiError::Decode("x".into())));
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let client = AnthropicClient::new("k", "http://localhost:9999/");
        assert_eq!(client.endpoint(), "http://localhost:9999/v1/messages");
    }

    #[test]
    fn retry_budget_defaults_and_overrides() {
        let client = AnthropicClient::new("k", AnthropicClient::DEFAULT_BASE_URL);
        assert_eq!(client.max_retries, AnthropicClient::DEFAULT_MAX_RETRIES);
        assert_eq!(client.with_max_retries(1).max_retries, 1);
    }

    #[test]
    fn debug_does_not_leak_key() {
        let client = AnthropicClient::new("sk-secret", AnthropicClient::DEFAULT_BASE_URL);
        let debug = format!("{client:?}");
        assert!(!debug.contains("sk-secret"));
    }
}
