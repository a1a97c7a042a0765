//! reqwest transport for `/chat/completions` streaming requests.
//!
//! One call is one attempt. Retries for rate limits are driven by the agent
//! loop (see [`RetryPolicy`]) so each attempt is paced.

mod retry;

pub use retry::RetryPolicy;

use super::stream::decode_stream;
use super::{
    parse_retry_after_secs, summarize_http_error, wait_for_cancellation, ModelClient,
    StreamContext,
};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Client for OpenAI-compatible chat completion APIs.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    /// Build a client from resolved API configuration.
    pub fn new(config: &ApiConfig) -> Self {
        Self {
            http: build_http_client(Duration::from_secs(config.timeout_secs)),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.trim().to_string(),
        }
    }

    /// Send one streamed request and decode the response.
    pub async fn chat(
        &self,
        request: &ChatRequest,
        ctx: &StreamContext,
    ) -> Result<ChatResponse, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.http.post(&url).json(request);

        // Local servers such as Ollama run without a key.
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        debug!(%url, messages = request.messages.len(), "sending chat request");
        let response = tokio::select! {
            _ = wait_for_cancellation(ctx.cancel.clone()) => return Err(ApiError::Cancelled),
            response = req.send() => response?,
        };

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let retry_after_secs = parse_retry_after_secs(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                code,
                body: summarize_http_error(code, &body),
                retry_after_secs,
            });
        }

        decode_stream(Box::pin(response.bytes_stream()), ctx).await
    }
}

#[async_trait]
impl ModelClient for ApiClient {
    async fn chat(
        &self,
        request: &ChatRequest,
        ctx: &StreamContext,
    ) -> Result<ChatResponse, ApiError> {
        ApiClient::chat(self, request, ctx).await
    }
}

/// Build an HTTP client with timeout applied.
fn build_http_client(timeout: Duration) -> reqwest::Client {
    // Fall back to reqwest defaults if builder creation fails for any reason.
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
