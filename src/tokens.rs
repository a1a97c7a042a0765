//! Token tracking and context window management.
//!
//! Exact counts come from the API's `usage` field when available. Everything
//! that must be decided *before* a request (compression, pre-flight checks)
//! goes through a pluggable [`TokenEstimator`].

use crate::types::{Message, Usage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Approximate token counting for conversation payloads.
pub trait TokenEstimator: Send + Sync {
    /// Estimated tokens for one piece of text.
    fn estimate_text(&self, text: &str) -> usize;

    /// Estimated tokens for one message, including framing.
    fn estimate_message(&self, message: &Message) -> usize;

    /// Estimated tokens for a full request payload.
    fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }
}

/// Character-count heuristic (~1 token per `chars_per_token` characters).
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    pub chars_per_token: f64,
    /// Fixed cost per message for role and framing.
    pub per_message_overhead: usize,
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: 4.0,
            per_message_overhead: 4,
        }
    }
}

impl CharRatioEstimator {
    fn chars_to_tokens(&self, chars: usize) -> usize {
        if chars == 0 || self.chars_per_token <= 0.0 {
            return 0;
        }
        (chars as f64 / self.chars_per_token).ceil() as usize
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate_text(&self, text: &str) -> usize {
        self.chars_to_tokens(text.chars().count())
    }

    fn estimate_message(&self, message: &Message) -> usize {
        let mut chars = message.text().chars().count();
        for call in message.tool_calls.iter().flatten() {
            chars += call.id.len();
            chars += call.function.name.len();
            chars += call.function.arguments.chars().count();
        }
        if let Some(id) = &message.tool_call_id {
            chars += id.len();
        }
        for value in message.extra.values() {
            chars += json_value_char_count(value);
        }
        self.per_message_overhead + self.chars_to_tokens(chars)
    }
}

/// Estimate string-equivalent character footprint of arbitrary JSON values.
fn json_value_char_count(value: &Value) -> usize {
    match value {
        Value::Null => 4,
        Value::Bool(_) => 5,
        Value::Number(n) => n.to_string().len(),
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.iter().map(json_value_char_count).sum(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| k.len() + json_value_char_count(v))
            .sum(),
    }
}

// ---------------------------------------------------------------------------
// Tracking
// ---------------------------------------------------------------------------

/// Tracks token usage across a conversation session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTracker {
    /// Model's context window size in tokens.
    pub context_limit: usize,
    /// Number of completed model requests.
    #[serde(default)]
    pub requests: u64,
    /// Running total of prompt tokens sent.
    pub total_prompt_tokens: u64,
    /// Running total of completion tokens received.
    pub total_completion_tokens: u64,
    /// Running total of prompt tokens served from the provider cache.
    #[serde(default)]
    pub total_cached_tokens: u64,
    /// Prompt tokens in the most recent request.
    pub last_prompt_tokens: u64,
    /// Completion tokens in the most recent response.
    pub last_completion_tokens: u64,
}

impl TokenTracker {
    /// Create a fresh tracker for a model with the provided context limit.
    pub fn new(context_limit: usize) -> Self {
        Self {
            context_limit,
            ..Self::default()
        }
    }

    /// Count one completed model request and add its `usage`, if the
    /// provider sent any.
    pub fn record(&mut self, usage: Option<&Usage>) {
        self.requests = self.requests.saturating_add(1);
        let Some(usage) = usage else {
            return;
        };
        self.last_prompt_tokens = usage.prompt_tokens;
        self.last_completion_tokens = usage.completion_tokens;
        self.total_prompt_tokens = self.total_prompt_tokens.saturating_add(usage.prompt_tokens);
        self.total_completion_tokens = self
            .total_completion_tokens
            .saturating_add(usage.completion_tokens);
        self.total_cached_tokens = self
            .total_cached_tokens
            .saturating_add(usage.cached_tokens.unwrap_or(0));
    }

    /// Total tokens consumed across the entire session.
    pub fn session_total(&self) -> u64 {
        self.total_prompt_tokens
            .saturating_add(self.total_completion_tokens)
    }

    /// Share of prompt tokens served from cache, in `0.0..=1.0`.
    pub fn cache_hit_ratio(&self) -> f64 {
        if self.total_prompt_tokens == 0 {
            return 0.0;
        }
        self.total_cached_tokens as f64 / self.total_prompt_tokens as f64
    }
}

// ---------------------------------------------------------------------------
// Context limit defaults
// ---------------------------------------------------------------------------

/// Catalog entry matching strategy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ModelMatchKind {
    Exact,
    Prefix,
    Contains,
}

/// A single context-window match rule from `models.toml`.
#[derive(Debug, Clone, Deserialize)]
struct ModelContextRule {
    #[serde(rename = "match")]
    kind: ModelMatchKind,
    pattern: String,
    context_window: usize,
}

/// Embedded model context catalog loaded from `templates/models.toml`.
#[derive(Debug, Clone, Deserialize)]
struct ModelCatalog {
    #[serde(default = "default_unknown_context_limit")]
    default_context_window: usize,
    /// Ordered rule list (first match wins).
    #[serde(default)]
    rule: Vec<ModelContextRule>,
}

impl ModelCatalog {
    fn lookup(&self, model: &str) -> Option<usize> {
        let normalized = normalize_model_name(model);
        if normalized.is_empty() {
            return None;
        }

        let mut candidates = vec![normalized.clone()];
        if let Some((_, tail)) = normalized.rsplit_once('/') {
            if !tail.is_empty() {
                candidates.push(tail.to_string());
            }
        }

        self.rule.iter().find_map(|rule| {
            let pattern = normalize_model_name(&rule.pattern);
            if pattern.is_empty() {
                return None;
            }
            let matched = match rule.kind {
                ModelMatchKind::Exact => candidates.iter().any(|c| c == &pattern),
                ModelMatchKind::Prefix => candidates.iter().any(|c| c.starts_with(&pattern)),
                ModelMatchKind::Contains => candidates.iter().any(|c| c.contains(&pattern)),
            };
            matched.then_some(rule.context_window)
        })
    }
}

static MODEL_CATALOG: OnceLock<Option<ModelCatalog>> = OnceLock::new();

fn model_catalog() -> Option<&'static ModelCatalog> {
    MODEL_CATALOG
        .get_or_init(|| toml::from_str(include_str!("templates/models.toml")).ok())
        .as_ref()
}

/// Lowercase and drop `:variant` suffixes such as `:free`.
fn normalize_model_name(model: &str) -> String {
    let m = model.trim().to_lowercase();
    match m.split_once(':') {
        Some((base, _)) => base.trim().to_string(),
        None => m,
    }
}

fn default_unknown_context_limit() -> usize {
    8_192
}

/// Fallback heuristics used if `models.toml` fails to parse.
fn legacy_default_context_limit(model: &str) -> usize {
    let m = normalize_model_name(model);
    match () {
        _ if m.contains("gpt-4o") || m.contains("gpt-4-turbo") => 128_000,
        _ if m.contains("claude") => 200_000,
        _ if m.contains("gemini") => 1_048_576,
        _ if m.contains("deepseek") => 64_000,
        _ => default_unknown_context_limit(),
    }
}

/// Best-effort context limit lookup.
///
/// Can always be overridden via `config.api.context_limit`.
pub fn default_context_limit(model: &str) -> usize {
    if let Some(catalog) = model_catalog() {
        return catalog
            .lookup(model)
            .unwrap_or(catalog.default_context_window);
    }
    legacy_default_context_limit(model)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
