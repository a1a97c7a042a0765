//! Mid-loop context compression.
//!
//! When the estimated payload approaches the context window, whole
//! assistant+tool-result groups are dropped oldest first. The system prompt,
//! the first user message and the most recent messages are never dropped.
//! Compression works on a new vector; the input slice is left untouched.

use crate::tokens::TokenEstimator;
use crate::types::{Message, Role};
use std::collections::HashSet;
use tracing::info;

/// Most recent messages always kept verbatim.
pub(super) const KEEP_RECENT_MESSAGES: usize = 6;
/// Compression stops once the estimate is at or below this share of the threshold.
pub(super) const TARGET_FRACTION: f64 = 0.65;

/// Tokens reserved for the response and estimation error.
pub(super) fn safety_buffer(context_window: usize) -> usize {
    match context_window {
        0..=16_384 => 2_048,
        16_385..=65_536 => 8_192,
        65_537..=200_000 => 20_000,
        _ => 40_000,
    }
}

/// Estimated payload size above which compression kicks in.
pub(super) fn compression_threshold(context_window: usize) -> usize {
    context_window.saturating_sub(safety_buffer(context_window))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionReport {
    pub before_tokens: usize,
    pub after_tokens: usize,
    pub removed_messages: usize,
}

/// Compress `messages` when their estimate exceeds the threshold.
///
/// Returns `None` when no compression was needed or nothing could be dropped.
pub(super) fn compress_if_needed(
    messages: &[Message],
    context_window: usize,
    estimator: &dyn TokenEstimator,
) -> Option<(Vec<Message>, CompressionReport)> {
    let before = estimator.estimate_messages(messages);
    let threshold = compression_threshold(context_window);
    if before <= threshold {
        return None;
    }
    let target = (threshold as f64 * TARGET_FRACTION) as usize;

    let protected = protected_indices(messages);
    let mut dropped: HashSet<usize> = HashSet::new();
    let mut current = before;
    for group in droppable_groups(messages, &protected) {
        if current <= target {
            break;
        }
        for idx in group {
            current = current.saturating_sub(estimator.estimate_message(&messages[idx]));
            dropped.insert(idx);
        }
    }
    if dropped.is_empty() {
        return None;
    }

    let kept: Vec<Message> = messages
        .iter()
        .enumerate()
        .filter(|(idx, _)| !dropped.contains(idx))
        .map(|(_, message)| message.clone())
        .collect();
    let compressed = drop_unpaired(kept);
    let after = estimator.estimate_messages(&compressed);
    let report = CompressionReport {
        before_tokens: before,
        after_tokens: after,
        removed_messages: messages.len() - compressed.len(),
    };
    info!(
        before = report.before_tokens,
        after = report.after_tokens,
        removed = report.removed_messages,
        "compressed conversation"
    );
    Some((compressed, report))
}

fn protected_indices(messages: &[Message]) -> HashSet<usize> {
    let mut protected: HashSet<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::System)
        .map(|(idx, _)| idx)
        .collect();
    if let Some(first_user) = messages.iter().position(|m| m.role == Role::User) {
        protected.insert(first_user);
    }
    let recent_start = messages.len().saturating_sub(KEEP_RECENT_MESSAGES);
    protected.extend(recent_start..messages.len());
    protected
}

/// Assistant messages plus the tool results directly following them, oldest
/// first, skipping any group that touches a protected index.
fn droppable_groups(messages: &[Message], protected: &HashSet<usize>) -> Vec<Vec<usize>> {
    let mut groups = Vec::new();
    let mut idx = 0;
    while idx < messages.len() {
        if messages[idx].role != Role::Assistant {
            idx += 1;
            continue;
        }
        let start = idx;
        idx += 1;
        while idx < messages.len() && messages[idx].role == Role::Tool {
            idx += 1;
        }
        let group: Vec<usize> = (start..idx).collect();
        if group.iter().all(|i| !protected.contains(i)) {
            groups.push(group);
        }
    }
    groups
}

/// Remove tool results without a surviving call and calls without a surviving result.
fn drop_unpaired(messages: Vec<Message>) -> Vec<Message> {
    let call_ids: HashSet<String> = messages
        .iter()
        .flat_map(|m| m.tool_call_ids().map(str::to_string).collect::<Vec<_>>())
        .collect();
    let result_ids: HashSet<String> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect();

    messages
        .into_iter()
        .filter(|m| {
            m.role != Role::Tool
                || m.tool_call_id
                    .as_deref()
                    .is_some_and(|id| call_ids.contains(id))
        })
        .filter_map(|mut m| {
            if let Some(calls) = m.tool_calls.as_mut() {
                calls.retain(|call| result_ids.contains(&call.id));
                if calls.is_empty() {
                    m.tool_calls = None;
                    if m.content.is_none() {
                        return None;
                    }
                }
            }
            Some(m)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::normalization::is_well_paired;
    use crate::tokens::CharRatioEstimator;
    use crate::types::ToolCall;

    fn group(id: &str, size: usize) -> [Message; 2] {
        [
            Message::assistant("", vec![ToolCall::function(id, "read_file", "{}")]),
            Message::tool_result(id, "y".repeat(size)),
        ]
    }

    fn long_history(groups: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("system prompt"), Message::user("first task")];
        for i in 0..groups {
            messages.extend(group(&format!("call_{i}"), 4_000));
        }
        messages.push(Message::user("latest question"));
        messages
    }

    #[test]
    fn safety_buffer_tiers() {
        assert_eq!(safety_buffer(8_192), 2_048);
        assert_eq!(safety_buffer(32_768), 8_192);
        assert_eq!(safety_buffer(128_000), 20_000);
        assert_eq!(safety_buffer(1_000_000), 40_000);
        assert_eq!(compression_threshold(16_384), 14_336);
    }

    #[test]
    fn below_threshold_is_untouched() {
        let messages = long_history(2);
        assert!(compress_if_needed(&messages, 128_000, &CharRatioEstimator::default()).is_none());
    }

    // Verifies protected messages survive and no orphans remain.
    #[test]
    fn drops_oldest_groups_and_keeps_protected_messages() {
        let estimator = CharRatioEstimator::default();
        let messages = long_history(20);
        let snapshot = messages.clone();
        let (compressed, report) = compress_if_needed(&messages, 16_384, &estimator).unwrap();

        assert_eq!(messages, snapshot, "input must not be mutated");
        assert!(report.after_tokens < report.before_tokens);
        assert!(report.after_tokens <= (compression_threshold(16_384) as f64 * TARGET_FRACTION) as usize);
        assert_eq!(compressed[0].text(), "system prompt");
        assert_eq!(compressed[1].text(), "first task");
        assert_eq!(
            &compressed[compressed.len() - KEEP_RECENT_MESSAGES..],
            &messages[messages.len() - KEEP_RECENT_MESSAGES..]
        );
        assert!(is_well_paired(&compressed));
        // Oldest group goes first.
        assert!(!compressed
            .iter()
            .any(|m| m.tool_call_id.as_deref() == Some("call_0")));
    }

    #[test]
    fn group_straddling_recent_window_is_kept_whole() {
        let mut messages = long_history(20);
        messages.pop();
        messages.push(Message::assistant(
            "",
            vec![
                ToolCall::function("x1", "read_file", "{}"),
                ToolCall::function("x2", "read_file", "{}"),
            ],
        ));
        messages.push(Message::tool_result("x1", "a"));
        messages.push(Message::tool_result("x2", "b"));
        for text in ["u1", "a1", "u2", "a2"] {
            messages.push(if text.starts_with('u') {
                Message::user(text)
            } else {
                Message::assistant(text, Vec::new())
            });
        }
        messages.push(Message::user("u3"));

        let (compressed, _) =
            compress_if_needed(&messages, 16_384, &CharRatioEstimator::default()).unwrap();
        assert!(is_well_paired(&compressed));
        assert!(compressed
            .iter()
            .any(|m| m.tool_call_id.as_deref() == Some("x1")));
    }

    #[test]
    fn unpaired_calls_are_stripped() {
        let messages = vec![
            Message::user("q"),
            Message::assistant(
                "thinking",
                vec![
                    ToolCall::function("kept", "read_file", "{}"),
                    ToolCall::function("lost", "read_file", "{}"),
                ],
            ),
            Message::tool_result("kept", "r"),
            Message::tool_result("orphan", "r"),
        ];
        let out = drop_unpaired(messages);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].tool_call_ids().collect::<Vec<_>>(), vec!["kept"]);
        assert!(is_well_paired(&out));
    }
}
