//! Core agentic loop.
//!
//! The [`Agent`] drives the conversation: it sends user messages to the API,
//! executes the tool calls the model makes, feeds results back and loops
//! until the model produces a final text response, the iteration limit is
//! reached and not extended, the user cancels, or the loop breaker forces a
//! final answer.

use crate::api::{
    wait_for_cancellation, ApiClient, ModelClient, RequestPacer, RetryPolicy, StreamContext,
};
use crate::config::{Config, DEFAULT_SYSTEM_PROMPT};
use crate::error::{AgentError, ApiError};
use crate::tokens::{self, CharRatioEstimator, TokenEstimator, TokenTracker};
use crate::tools::{error_json, ToolContext, ToolRegistry};
use crate::types::{ChatRequest, ChatResponse, Message, StreamOptions, ToolCall};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

pub mod approvals;
mod compression;
mod events;
pub mod json_repair;
mod loop_breaker;
mod normalization;
mod store;
mod truncation;

use approvals::{ApprovalBroker, ApprovalDecision, ApprovalKind};
use compression::compress_if_needed;
pub use compression::CompressionReport;
pub use events::AgentEvent;
use json_repair::{parse_tool_arguments, RepairStage};
use loop_breaker::{LoopBreaker, LoopVerdict};
use normalization::{repair_conversation, sanitize_conversation_history, sanitize_message};
#[cfg(test)]
pub(crate) use store::MemoryStore;
pub use store::{ConversationStore, SessionMetrics};
use truncation::truncate_tool_result;

/// Tool-result placeholder inserted when cancellation interrupts tool execution.
const CANCELLED_BY_USER_TOOL_RESULT: &str = "operation cancelled by user";
/// Final response text returned when user cancellation wins the race.
const CANCELLED_BY_USER_PROMPT_RESPONSE: &str = "operation cancelled by user";
/// Result for calls skipped after the loop breaker disabled tools.
const TOOLS_DISABLED_RESULT: &str = "tool use is disabled for the rest of this turn";
/// Compression runs once this many iterations have completed.
const COMPRESSION_MIN_ITERATIONS: usize = 2;

/// Persistable conversation + token state for session save/resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSessionSnapshot {
    /// Conversation history at snapshot time.
    pub messages: Vec<Message>,
    /// Token accounting at snapshot time.
    pub tracker: TokenTracker,
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered without calling tools.
    Completed,
    /// The iteration limit was reached and not extended.
    IterationLimit,
    Cancelled,
    /// The loop breaker disabled tools and the model then answered.
    ForcedStop,
}

/// Consolidated result of one [`Agent::send`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub answer: String,
    pub stop_reason: StopReason,
    /// Model requests made during the turn, retries excluded.
    pub iterations: usize,
}

// ---------------------------------------------------------------------------
// Session reentrancy guard
// ---------------------------------------------------------------------------

static ACTIVE_SESSIONS: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

/// Marks a session as busy for the lifetime of one turn.
struct SessionGuard {
    session_id: String,
}

impl SessionGuard {
    fn acquire(session_id: &str) -> Result<Self, AgentError> {
        let mut active = ACTIVE_SESSIONS
            .get_or_init(|| Mutex::new(HashSet::new()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(session_id.to_string()) {
            return Err(AgentError::SessionBusy(session_id.to_string()));
        }
        Ok(Self {
            session_id: session_id.to_string(),
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(active) = ACTIVE_SESSIONS.get() {
            active
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&self.session_id);
        }
    }
}

/// How a batch of tool calls ended.
enum ToolRun {
    Continue,
    ForceStop,
    Cancelled,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// The core agent that orchestrates the conversation and tool-use loop.
pub struct Agent {
    /// Model client implementation (HTTP client in prod, mocks in tests).
    client: Box<dyn ModelClient>,
    config: Config,
    tools: ToolRegistry,
    /// Full conversation history sent on each request.
    messages: Vec<Message>,
    tracker: TokenTracker,
    estimator: Box<dyn TokenEstimator>,
    pacer: Arc<RequestPacer>,
    retry: RetryPolicy,
    store: Option<Arc<dyn ConversationStore>>,
    approvals: Option<ApprovalBroker>,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
    /// Optional cancellation signal for the in-flight turn.
    cancellation_rx: Option<watch::Receiver<bool>>,
    /// Notified to move a running terminal command to the background.
    detach: Arc<Notify>,
    session_id: String,
    /// Run terminal commands without asking.
    auto_approve: bool,
}

impl Agent {
    /// Create an agent from configuration with tools pre-registered.
    pub fn new(config: Config, tools: ToolRegistry) -> Self {
        let client = Box::new(ApiClient::new(&config.api));
        Self::with_client(config, tools, client)
    }

    /// Create an agent with an explicit model client implementation.
    ///
    /// Uses the process-wide request pacer, configured from
    /// `agent.min_request_interval_ms`.
    pub fn with_client(config: Config, tools: ToolRegistry, client: Box<dyn ModelClient>) -> Self {
        let context_limit = config
            .api
            .context_limit
            .unwrap_or_else(|| tokens::default_context_limit(&config.api.model));
        let pacer = RequestPacer::global();
        pacer.set_min_interval(Duration::from_millis(config.agent.min_request_interval_ms));
        let retry = RetryPolicy::with_retries(config.agent.max_rate_limit_retries);
        let messages = initial_messages(&config);

        Self {
            client,
            config,
            tools,
            messages,
            tracker: TokenTracker::new(context_limit),
            estimator: Box::new(CharRatioEstimator::default()),
            pacer,
            retry,
            store: None,
            approvals: None,
            events: None,
            cancellation_rx: None,
            detach: Arc::new(Notify::new()),
            session_id: crate::session::generate_session_id(),
            auto_approve: false,
        }
    }

    pub fn set_pacer(&mut self, pacer: Arc<RequestPacer>) {
        self.pacer = pacer;
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub fn set_estimator(&mut self, estimator: Box<dyn TokenEstimator>) {
        self.estimator = estimator;
    }

    /// Persist conversations and metrics through `store` at the end of each turn.
    pub fn set_store(&mut self, store: Option<Arc<dyn ConversationStore>>) {
        self.store = store;
    }

    pub fn set_approvals(&mut self, approvals: Option<ApprovalBroker>) {
        self.approvals = approvals;
    }

    pub fn set_auto_approve(&mut self, auto_approve: bool) {
        self.auto_approve = auto_approve;
    }

    /// Register a cancellation signal for subsequent turns.
    pub fn set_cancellation_receiver(&mut self, rx: Option<watch::Receiver<bool>>) {
        self.cancellation_rx = rx;
    }

    /// Handle used to move a running terminal command to the background.
    pub fn detach_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.detach)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn set_session_id(&mut self, session_id: impl Into<String>) {
        self.session_id = session_id.into();
    }

    /// Snapshot in-memory conversation state for persistent sessions.
    pub fn snapshot_session(&self) -> AgentSessionSnapshot {
        AgentSessionSnapshot {
            messages: self.messages.clone(),
            tracker: self.tracker.clone(),
        }
    }

    /// Restore conversation/token state from a previously saved snapshot.
    pub fn restore_session(&mut self, snapshot: AgentSessionSnapshot) {
        let context_limit = self.tracker.context_limit;
        self.messages = if snapshot.messages.is_empty() {
            initial_messages(&self.config)
        } else {
            snapshot.messages
        };
        self.tracker = snapshot.tracker;
        if self.tracker.context_limit == 0 {
            self.tracker.context_limit = context_limit;
        }
    }

    /// Load `session_id` from the store and make it the active session.
    ///
    /// Returns `Ok(false)` when the store has no such conversation.
    pub fn resume_session(&mut self, session_id: &str) -> Result<bool, String> {
        let Some(store) = self.store.clone() else {
            return Err("no conversation store configured".into());
        };
        let Some(snapshot) = store.load_conversation(session_id)? else {
            return Ok(false);
        };
        self.restore_session(snapshot);
        self.session_id = session_id.to_string();
        Ok(true)
    }

    /// Reset conversation state to a fresh session (keeps model/tools/config).
    pub fn reset_session(&mut self) {
        let context_limit = self.tracker.context_limit;
        self.messages = initial_messages(&self.config);
        self.tracker = TokenTracker::new(context_limit);
        self.session_id = crate::session::generate_session_id();
    }

    /// Access the conversation message history.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Access the token tracker.
    pub fn tracker(&self) -> &TokenTracker {
        &self.tracker
    }

    fn cancellation_requested(&self) -> bool {
        self.cancellation_rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Send a user message and run the full agentic loop.
    ///
    /// The conversation is persisted through the store whether the turn
    /// completes, is cancelled, or fails.
    pub async fn send(&mut self, user_input: &str) -> Result<TurnOutcome, AgentError> {
        let _guard = SessionGuard::acquire(&self.session_id)?;

        // Normalize history before appending a new turn so malformed provider
        // responses do not accumulate across requests.
        sanitize_conversation_history(&mut self.messages);
        self.messages.push(Message::user(user_input));
        info!(session = %self.session_id, "turn started");

        let result = self.run_turn().await;
        self.persist();
        match &result {
            Ok(outcome) => info!(
                session = %self.session_id,
                iterations = outcome.iterations,
                stop_reason = ?outcome.stop_reason,
                "turn finished"
            ),
            Err(err) => warn!(session = %self.session_id, error = %err, "turn failed"),
        }
        result
    }

    async fn run_turn(&mut self) -> Result<TurnOutcome, AgentError> {
        let mut iterations = 0;
        let mut limit = self.config.agent.max_iterations;
        let mut breaker = LoopBreaker::new();
        let mut force_final = false;
        let mut last_text = String::new();

        loop {
            if self.cancellation_requested() {
                return Ok(cancelled_outcome(iterations));
            }
            if iterations >= limit {
                if self.request_extension(iterations).await {
                    limit += self.config.agent.iteration_extension;
                    info!(limit, "iteration limit extended");
                } else if self.cancellation_requested() {
                    return Ok(cancelled_outcome(iterations));
                } else {
                    let answer = if last_text.is_empty() {
                        format!("Stopped after {iterations} iterations without a final answer.")
                    } else {
                        last_text
                    };
                    return Ok(TurnOutcome {
                        answer,
                        stop_reason: StopReason::IterationLimit,
                        iterations,
                    });
                }
            }

            iterations += 1;
            let _ = self.emit(AgentEvent::IterationStarted {
                iteration: iterations,
            });
            self.prepare_history();

            let response = match self.request_model(force_final).await {
                Ok(response) => response,
                Err(ApiError::Cancelled) => return Ok(cancelled_outcome(iterations)),
                Err(err) => return Err(err.into()),
            };
            self.record_usage(&response);

            let mut assistant = response.to_assistant_message();
            if force_final && assistant.tool_calls.take().is_some() {
                debug!("discarding tool calls after forced stop");
            }
            sanitize_message(&mut assistant);
            if let Some(text) = &assistant.content {
                last_text = text.clone();
            }

            if !assistant.has_tool_calls() {
                let stop_reason = if force_final {
                    StopReason::ForcedStop
                } else {
                    StopReason::Completed
                };
                let Some(answer) = assistant.content.clone() else {
                    if force_final {
                        return Ok(TurnOutcome {
                            answer: "Stopped: the model kept repeating the same tool call.".into(),
                            stop_reason,
                            iterations,
                        });
                    }
                    return Err(AgentError::EmptyResponse);
                };
                self.messages.push(assistant);
                return Ok(TurnOutcome {
                    answer,
                    stop_reason,
                    iterations,
                });
            }

            let calls = assistant.tool_calls.clone().unwrap_or_default();
            self.messages.push(assistant);
            match self
                .run_tool_calls(&calls, response.hit_length_limit(), &mut breaker)
                .await
            {
                ToolRun::Continue => {}
                ToolRun::ForceStop => force_final = true,
                ToolRun::Cancelled => return Ok(cancelled_outcome(iterations)),
            }

            if iterations >= COMPRESSION_MIN_ITERATIONS {
                self.compress_history();
            }
        }
    }

    /// Sanitize and repair history so the request is well-formed.
    fn prepare_history(&mut self) {
        sanitize_conversation_history(&mut self.messages);
        let report = repair_conversation(&mut self.messages);
        if report.changed() {
            debug!(
                synthesized = report.synthesized_results,
                dropped = report.dropped_orphans,
                appended_continue = report.appended_continue,
                "repaired conversation"
            );
        }
    }

    fn build_request(&self, force_final: bool) -> ChatRequest {
        let tools = (!self.tools.is_empty()).then(|| self.tools.definitions());
        let tool_choice = match (&tools, force_final) {
            (Some(_), true) => Some("none".to_string()),
            (Some(_), false) => Some("auto".to_string()),
            (None, _) => None,
        };
        ChatRequest {
            model: self.config.api.model.clone(),
            messages: self.messages.clone(),
            stream: true,
            stream_options: Some(StreamOptions { include_usage: true }),
            tools,
            tool_choice,
            temperature: self.config.agent.temperature,
            top_p: self.config.agent.top_p,
        }
    }

    /// Issue one iteration's request, retrying rate-limited attempts.
    ///
    /// Every attempt goes through the pacer. Cancellation resolves to
    /// [`ApiError::Cancelled`].
    async fn request_model(&self, force_final: bool) -> Result<ChatResponse, ApiError> {
        let request = self.build_request(force_final);
        let ctx = StreamContext::new(self.stream_callback(), self.cancellation_rx.clone());
        let mut attempt = 0;
        loop {
            self.pacer.acquire().await;
            let result = tokio::select! {
                _ = wait_for_cancellation(self.cancellation_rx.clone()) => Err(ApiError::Cancelled),
                response = self.client.chat(&request, &ctx) => response,
            };
            match result {
                Err(err) if self.retry.should_retry(&err, attempt) => {
                    let delay = self.retry.retry_delay_for(attempt, &err);
                    attempt += 1;
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "rate limited; retrying");
                    let _ = self.emit(AgentEvent::RateLimited { attempt, delay });
                    tokio::select! {
                        _ = wait_for_cancellation(self.cancellation_rx.clone()) => return Err(ApiError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return other,
            }
        }
    }

    fn record_usage(&mut self, response: &ChatResponse) {
        self.tracker.record(response.usage.as_ref());
        let Some(usage) = &response.usage else {
            return;
        };
        let _ = self.emit(AgentEvent::TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            session_total: self.tracker.session_total(),
        });
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext {
            cancel: self.cancellation_rx.clone(),
            detach: Some(Arc::clone(&self.detach)),
            approvals: self.approvals.clone(),
            auto_approve: self.auto_approve,
        }
    }

    /// Execute one assistant turn's calls strictly in order.
    async fn run_tool_calls(
        &mut self,
        calls: &[ToolCall],
        truncated: bool,
        breaker: &mut LoopBreaker,
    ) -> ToolRun {
        let mut run = ToolRun::Continue;
        for (idx, call) in calls.iter().enumerate() {
            if matches!(run, ToolRun::ForceStop) {
                self.messages
                    .push(Message::tool_result(&call.id, error_json(TOOLS_DISABLED_RESULT)));
                continue;
            }
            if self.cancellation_requested() {
                self.push_cancelled_results(&calls[idx..]);
                return ToolRun::Cancelled;
            }

            let repaired = parse_tool_arguments(&call.function.arguments, truncated);
            if repaired.stage != RepairStage::Clean {
                warn!(tool = %call.function.name, stage = ?repaired.stage, "repaired tool arguments");
            }
            let name = self.tools.resolve_name(&call.function.name).to_string();
            let _ = self.emit(AgentEvent::ToolCall {
                name: name.clone(),
                arguments: repaired.value.to_string(),
            });

            let context = self.tool_context();
            let dispatched = tokio::select! {
                _ = wait_for_cancellation(self.cancellation_rx.clone()) => None,
                outcome = self.tools.dispatch(&name, &repaired.value, &context) => Some(outcome),
            };
            let Some(dispatched) = dispatched else {
                self.push_cancelled_results(&calls[idx..]);
                return ToolRun::Cancelled;
            };

            let output =
                truncate_tool_result(&dispatched.tool, &dispatched.output, &self.config.truncation);
            let _ = self.emit(AgentEvent::ToolResult {
                name: dispatched.tool.clone(),
                output: output.clone(),
                failed: dispatched.failed,
            });

            let verdict = breaker.observe(&dispatched.tool, &repaired.value, &output);
            let content = match verdict {
                LoopVerdict::Continue => output,
                LoopVerdict::Redirect(directive) => {
                    let _ = self.emit(AgentEvent::LoopDetected {
                        tool: dispatched.tool.clone(),
                        forced: false,
                    });
                    directive
                }
                LoopVerdict::ForceStop(directive) => {
                    let _ = self.emit(AgentEvent::LoopDetected {
                        tool: dispatched.tool.clone(),
                        forced: true,
                    });
                    run = ToolRun::ForceStop;
                    directive
                }
            };
            self.messages.push(Message::tool_result(&call.id, content));
        }
        run
    }

    /// Give every remaining call a result so tool-call pairing stays valid.
    fn push_cancelled_results(&mut self, calls: &[ToolCall]) {
        for call in calls {
            self.messages
                .push(Message::tool_result(&call.id, CANCELLED_BY_USER_TOOL_RESULT));
        }
    }

    fn compress_history(&mut self) {
        let window = self.tracker.context_limit;
        if window == 0 {
            return;
        }
        if let Some((compressed, report)) =
            compress_if_needed(&self.messages, window, self.estimator.as_ref())
        {
            self.messages = compressed;
            let _ = self.emit(AgentEvent::Compressed {
                removed_messages: report.removed_messages,
                before_tokens: report.before_tokens,
                after_tokens: report.after_tokens,
            });
        }
    }

    /// Ask whether to keep going past the iteration limit.
    async fn request_extension(&self, iterations: usize) -> bool {
        let extra = self.config.agent.iteration_extension;
        let Some(approvals) = &self.approvals else {
            return false;
        };
        if extra == 0 {
            return false;
        }
        let detail = format!("Reached {iterations} iterations. Continue for {extra} more?");
        let decision = tokio::select! {
            _ = wait_for_cancellation(self.cancellation_rx.clone()) => return false,
            decision = approvals.request(ApprovalKind::IterationExtension, detail) => decision,
        };
        match decision {
            Ok(ApprovalDecision::Approve) | Ok(ApprovalDecision::Edited(_)) => true,
            Ok(ApprovalDecision::Deny) => false,
            Err(err) => {
                self.warn_live(format!("iteration extension unavailable: {err}"));
                false
            }
        }
    }

    /// Best-effort save of the conversation and metrics.
    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(err) = store.save_conversation(&self.session_id, &self.snapshot_session()) {
            warn!(session = %self.session_id, error = %err, "failed to save conversation");
        }
        let metrics = SessionMetrics::from_tracker(&self.tracker);
        if let Err(err) = store.record_metrics(&self.session_id, &metrics) {
            warn!(session = %self.session_id, error = %err, "failed to record session metrics");
        }
    }
}

fn cancelled_outcome(iterations: usize) -> TurnOutcome {
    TurnOutcome {
        answer: CANCELLED_BY_USER_PROMPT_RESPONSE.to_string(),
        stop_reason: StopReason::Cancelled,
        iterations,
    }
}

/// Build initial conversation message list from configured system prompt.
fn initial_messages(config: &Config) -> Vec<Message> {
    let prompt = config.agent.system_prompt.trim();
    if prompt.is_empty() {
        vec![Message::system(DEFAULT_SYSTEM_PROMPT)]
    } else {
        vec![Message::system(prompt)]
    }
}
