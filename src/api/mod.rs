//! HTTP client for OpenAI-compatible streaming chat APIs.
//!
//! The API layer is split into cohesive modules:
//! - `stream`: SSE frame decoding into a [`ChatResponse`]
//! - `pacer`: process-wide request spacing
//! - `client`: the reqwest transport and the 429 retry policy

use crate::error::ApiError;
use crate::textutil::truncate_with_suffix_by_chars;
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;

mod client;
pub mod pacer;
pub mod stream;

pub use client::{ApiClient, RetryPolicy};
pub use pacer::{Clock, RequestPacer, SystemClock};
pub use stream::{decode_stream, StreamDecoder};

/// Minimal model API interface used by the agent loop.
///
/// This trait lets tests provide deterministic mock responses without network
/// calls while the production path uses [`ApiClient`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Issue one streamed request. Implementations do not retry.
    async fn chat(
        &self,
        request: &ChatRequest,
        ctx: &StreamContext,
    ) -> Result<ChatResponse, ApiError>;
}

/// Incremental output emitted while a response streams in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of assistant text.
    Content(String),
    /// A fragment of reasoning text.
    Reasoning(String),
    /// A tool call slot received its name.
    ToolCallStarted { index: usize, id: String, name: String },
}

/// Callback invoked for each [`StreamEvent`].
pub type StreamCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Per-request streaming hooks: an event callback and a cancellation signal.
#[derive(Clone, Default)]
pub struct StreamContext {
    pub on_event: Option<StreamCallback>,
    pub cancel: Option<watch::Receiver<bool>>,
}

impl StreamContext {
    pub fn new(on_event: Option<StreamCallback>, cancel: Option<watch::Receiver<bool>>) -> Self {
        Self { on_event, cancel }
    }

    /// Forward one event to the callback, if any.
    pub fn emit(&self, event: StreamEvent) {
        if let Some(callback) = &self.on_event {
            callback(event);
        }
    }

    /// True once the cancellation flag has been raised.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Resolve once `cancel` carries `true`. Never resolves when there is no
/// receiver or the sender goes away without cancelling.
pub(crate) async fn wait_for_cancellation(cancel: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Parse a `Retry-After` header given as delta-seconds or an HTTP date.
pub(crate) fn parse_retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds);
    }
    let at = httpdate::parse_http_date(raw).ok()?;
    Some(
        at.duration_since(SystemTime::now())
            .map(|d| d.as_secs())
            .unwrap_or(0),
    )
}

/// Maximum characters of a raw error body kept in summaries.
const ERROR_BODY_PREVIEW_CHARS: usize = 300;

/// Turn a non-2xx response into a short human-readable message.
///
/// Understands `{"error": {"message": ...}}`, `{"error": "..."}` and
/// `{"message": ...}` bodies; anything else is shown as a clipped preview.
pub fn summarize_http_error(status: u16, body: &str) -> String {
    let reason = reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("error");

    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .or_else(|| value.get("error").filter(|e| e.is_string()))
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            truncate_with_suffix_by_chars(body.trim(), ERROR_BODY_PREVIEW_CHARS, "...")
        });

    let hint = match status {
        401 | 403 => " (check the API key)",
        404 => " (check base_url and model)",
        429 => " (rate limited)",
        _ => "",
    };

    if detail.is_empty() {
        format!("HTTP {status} {reason}{hint}")
    } else {
        format!("HTTP {status} {reason}{hint}: {detail}")
    }
}
