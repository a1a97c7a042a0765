//! Detection of the model repeating the same tool call with the same result.

use crate::textutil::prefix_chars;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Identical consecutive signatures needed to trigger.
pub(super) const REPEAT_THRESHOLD: usize = 3;
/// Result prefix length included in a signature.
pub(super) const SIGNATURE_RESULT_CHARS: usize = 200;

/// Argument keys that identify what a call is about, checked in order.
const KEY_ARGUMENTS: &[&str] = &["path", "command", "query", "pattern", "file_path"];

/// What the agent should do after observing one tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum LoopVerdict {
    Continue,
    /// Replace the latest tool result with this directive.
    Redirect(String),
    /// Replace the result and stop calling tools for the rest of the turn.
    ForceStop(String),
}

#[derive(Debug, Default)]
pub(super) struct LoopBreaker {
    last: Option<String>,
    streak: usize,
    escalations: HashMap<String, usize>,
}

impl LoopBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one executed call into the detector.
    pub fn observe(&mut self, tool: &str, arguments: &Value, result: &str) -> LoopVerdict {
        let signature = signature(tool, arguments, result);
        if self.last.as_deref() == Some(signature.as_str()) {
            self.streak += 1;
        } else {
            self.last = Some(signature.clone());
            self.streak = 1;
        }
        if self.streak < REPEAT_THRESHOLD {
            return LoopVerdict::Continue;
        }

        self.streak = 0;
        let escalations = self.escalations.entry(signature).or_insert(0);
        *escalations += 1;
        let key = key_argument(arguments);
        warn!(tool, key = %key, escalation = *escalations, "repeated tool call detected");
        if *escalations >= 2 {
            LoopVerdict::ForceStop(format!(
                "You have repeated `{tool}` on `{key}` with identical results again after being \
                 warned. Tool use is now disabled for this turn. Stop calling tools and give your \
                 final answer based on what you already know."
            ))
        } else {
            LoopVerdict::Redirect(format!(
                "You called `{tool}` on `{key}` {REPEAT_THRESHOLD} times in a row and got the same \
                 result each time. Repeating it will not produce anything new. Use a different \
                 approach: inspect other files, change the arguments, or answer with what you have."
            ))
        }
    }
}

fn key_argument(arguments: &Value) -> String {
    KEY_ARGUMENTS
        .iter()
        .find_map(|key| arguments.get(*key))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| arguments.to_string())
}

fn signature(tool: &str, arguments: &Value, result: &str) -> String {
    format!(
        "{tool}\u{1f}{}\u{1f}{}",
        key_argument(arguments),
        prefix_chars(result, SIGNATURE_RESULT_CHARS)
    )
}
