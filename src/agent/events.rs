//! Agent event plumbing.
//!
//! The loop reports progress through an optional unbounded channel so the
//! CLI renderer (or a test) can observe a turn without the agent knowing how
//! it is displayed.

use super::Agent;
use crate::api::{StreamCallback, StreamEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Progress events emitted while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    IterationStarted {
        iteration: usize,
    },
    /// Streamed assistant text.
    Content(String),
    /// Streamed reasoning text.
    Reasoning(String),
    /// A tool call slot was announced mid-stream.
    ToolCallStarted {
        name: String,
    },
    /// A tool is about to run (after alias resolution and argument repair).
    ToolCall {
        name: String,
        arguments: String,
    },
    ToolResult {
        name: String,
        output: String,
        failed: bool,
    },
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        session_total: u64,
    },
    RateLimited {
        attempt: u32,
        delay: Duration,
    },
    LoopDetected {
        tool: String,
        forced: bool,
    },
    Compressed {
        removed_messages: usize,
        before_tokens: usize,
        after_tokens: usize,
    },
    Warning(String),
}

impl Agent {
    /// Route live events to `sink`. `None` silences them.
    pub fn set_event_sink(&mut self, sink: Option<mpsc::UnboundedSender<AgentEvent>>) {
        self.events = sink;
    }

    pub(super) fn emit(&self, event: AgentEvent) -> bool {
        self.events.as_ref().is_some_and(|tx| tx.send(event).is_ok())
    }

    pub(super) fn warn_live(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        let _ = self.emit(AgentEvent::Warning(message));
    }

    /// Bridge stream decoder events into the agent event channel.
    pub(super) fn stream_callback(&self) -> Option<StreamCallback> {
        let tx = self.events.clone()?;
        Some(Arc::new(move |event: StreamEvent| {
            let mapped = match event {
                StreamEvent::Content(text) => AgentEvent::Content(text),
                StreamEvent::Reasoning(text) => AgentEvent::Reasoning(text),
                StreamEvent::ToolCallStarted { name, .. } => AgentEvent::ToolCallStarted { name },
            };
            let _ = tx.send(mapped);
        }))
    }
}
