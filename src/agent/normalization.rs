//! Conversation cleanup before each request.
//!
//! Providers reject arrays with dangling tool calls, orphan tool results, or a
//! trailing assistant turn. Sanitizing drops empty noise; repairing restores
//! the pairing invariants and guarantees the array ends on `user`/`tool`.

use crate::types::{Message, Role};
use std::collections::HashSet;

/// Result text synthesized for a tool call that never got a result.
pub(super) const MISSING_TOOL_RESULT: &str =
    r#"{"error":"no result was recorded for this tool call; it was not executed"}"#;
/// User turn appended when the conversation would otherwise end on the assistant.
pub(super) const CONTINUE_PROMPT: &str = "Please continue.";

/// What [`repair_conversation`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct RepairReport {
    pub synthesized_results: usize,
    pub dropped_orphans: usize,
    pub appended_continue: bool,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        self.synthesized_results > 0 || self.dropped_orphans > 0 || self.appended_continue
    }
}

/// Sanitize all messages in-place and drop entries that carry no useful signal.
pub(super) fn sanitize_conversation_history(messages: &mut Vec<Message>) {
    for message in messages.iter_mut() {
        sanitize_message(message);
    }
    messages.retain(should_keep_message);
}

/// Normalize one message by trimming ids and pruning empty fields.
pub(super) fn sanitize_message(message: &mut Message) {
    if message.content.as_deref().is_some_and(|c| c.trim().is_empty()) {
        message.content = None;
    }

    if let Some(tool_calls) = message.tool_calls.as_mut() {
        tool_calls.retain(|tc| !tc.id.trim().is_empty() && !tc.function.name.trim().is_empty());
        if tool_calls.is_empty() {
            message.tool_calls = None;
        }
    }

    if let Some(tool_call_id) = message.tool_call_id.as_mut() {
        let trimmed = tool_call_id.trim();
        if trimmed.is_empty() {
            message.tool_call_id = None;
        } else if trimmed.len() != tool_call_id.len() {
            *tool_call_id = trimmed.to_string();
        }
    }

    message
        .extra
        .retain(|_, value| !value.is_null() && value.as_str().map_or(true, |s| !s.trim().is_empty()));
}

/// Decide whether a sanitized message should stay in history.
pub(super) fn should_keep_message(message: &Message) -> bool {
    match message.role {
        Role::System | Role::User => message.content.is_some(),
        Role::Assistant => message.content.is_some() || message.has_tool_calls(),
        Role::Tool => message.tool_call_id.is_some(),
    }
}

/// Restore tool-call pairing and make the array end on `user`/`tool`.
///
/// - every tool call gets exactly one result directly after its assistant turn
///   (missing ones are synthesized);
/// - tool results without a matching preceding call are dropped;
/// - a trailing `assistant`/`system` message gets a continue prompt after it.
pub(super) fn repair_conversation(messages: &mut Vec<Message>) -> RepairReport {
    let mut report = RepairReport::default();
    let mut repaired = Vec::with_capacity(messages.len() + 1);
    // Calls of the latest assistant turn still waiting for results, in order.
    let mut pending: Vec<String> = Vec::new();

    fn flush(pending: &mut Vec<String>, out: &mut Vec<Message>, report: &mut RepairReport) {
        for id in pending.drain(..) {
            out.push(Message::tool_result(id, MISSING_TOOL_RESULT));
            report.synthesized_results += 1;
        }
    }

    for message in messages.drain(..) {
        match message.role {
            Role::Tool => {
                let matched = message
                    .tool_call_id
                    .as_deref()
                    .and_then(|id| pending.iter().position(|p| p == id));
                match matched {
                    Some(idx) => {
                        pending.remove(idx);
                        repaired.push(message);
                    }
                    None => report.dropped_orphans += 1,
                }
            }
            Role::Assistant if message.has_tool_calls() => {
                flush(&mut pending, &mut repaired, &mut report);
                let mut seen = HashSet::new();
                pending = message
                    .tool_call_ids()
                    .filter(|id| seen.insert(id.to_string()))
                    .map(str::to_string)
                    .collect();
                repaired.push(message);
            }
            _ => {
                flush(&mut pending, &mut repaired, &mut report);
                repaired.push(message);
            }
        }
    }
    flush(&mut pending, &mut repaired, &mut report);

    if repaired
        .last()
        .is_some_and(|m| matches!(m.role, Role::Assistant | Role::System))
    {
        repaired.push(Message::user(CONTINUE_PROMPT));
        report.appended_continue = true;
    }

    *messages = repaired;
    report
}

/// True when every tool result follows a call with its id and every call has a result.
#[cfg(test)]
pub(super) fn is_well_paired(messages: &[Message]) -> bool {
    let mut open: HashSet<&str> = HashSet::new();
    for message in messages {
        match message.role {
            Role::Tool => match message.tool_call_id.as_deref() {
                Some(id) if open.remove(id) => {}
                _ => return false,
            },
            _ => {
                if !open.is_empty() {
                    return false;
                }
                open.extend(message.tool_call_ids());
            }
        }
    }
    open.is_empty()
}
