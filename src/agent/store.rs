//! Storage collaborator for conversations and per-session metrics.

use super::AgentSessionSnapshot;
use crate::tokens::TokenTracker;
use serde::{Deserialize, Serialize};
#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::Mutex;

/// Cumulative request and token counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cached_tokens: u64,
}

impl SessionMetrics {
    pub fn from_tracker(tracker: &TokenTracker) -> Self {
        Self {
            requests: tracker.requests,
            prompt_tokens: tracker.total_prompt_tokens,
            completion_tokens: tracker.total_completion_tokens,
            cached_tokens: tracker.total_cached_tokens,
        }
    }
}

/// Where the agent persists conversations.
///
/// Called synchronously at the end of a turn (completed, cancelled or
/// failed). Errors are logged by the agent and never abort the turn.
pub trait ConversationStore: Send + Sync {
    fn save_conversation(&self, session_id: &str, snapshot: &AgentSessionSnapshot) -> Result<(), String>;

    fn load_conversation(&self, session_id: &str) -> Result<Option<AgentSessionSnapshot>, String>;

    fn record_metrics(&self, session_id: &str, metrics: &SessionMetrics) -> Result<(), String>;
}

/// In-memory store for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub conversations: Mutex<HashMap<String, AgentSessionSnapshot>>,
    pub metrics: Mutex<HashMap<String, SessionMetrics>>,
}

#[cfg(test)]
impl ConversationStore for MemoryStore {
    fn save_conversation(&self, session_id: &str, snapshot: &AgentSessionSnapshot) -> Result<(), String> {
        self.conversations
            .lock()
            .map_err(|e| e.to_string())?
            .insert(session_id.to_string(), snapshot.clone());
        Ok(())
    }

    fn load_conversation(&self, session_id: &str) -> Result<Option<AgentSessionSnapshot>, String> {
        Ok(self
            .conversations
            .lock()
            .map_err(|e| e.to_string())?
            .get(session_id)
            .cloned())
    }

    fn record_metrics(&self, session_id: &str, metrics: &SessionMetrics) -> Result<(), String> {
        self.metrics
            .lock()
            .map_err(|e| e.to_string())?
            .insert(session_id.to_string(), *metrics);
        Ok(())
    }
}
