//! Request/response port for user confirmations.
//!
//! The agent and tools send [`ApprovalRequest`]s over an unbounded channel;
//! the UI answers each through its embedded oneshot. At most one request per
//! [`ApprovalKind`] is outstanding at a time, and [`ApprovalBroker::shutdown`]
//! fails every pending and future request.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::ToolError;

/// What the user is being asked to approve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalKind {
    /// Run a shell command; the user may edit it first.
    TerminalCommand,
    /// Keep going past the iteration limit.
    IterationExtension,
}

/// The user's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Deny,
    /// Approve a replacement command instead of the proposed one.
    Edited(String),
}

/// One pending confirmation. Dropping it unanswered counts as a denial.
#[derive(Debug)]
pub struct ApprovalRequest {
    kind: ApprovalKind,
    detail: String,
    response: oneshot::Sender<ApprovalDecision>,
}

impl ApprovalRequest {
    pub fn kind(&self) -> ApprovalKind {
        self.kind
    }

    /// Command text or a human-readable description of the request.
    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn respond(self, decision: ApprovalDecision) {
        let _ = self.response.send(decision);
    }

    pub fn approve(self) {
        self.respond(ApprovalDecision::Approve);
    }

    pub fn deny(self) {
        self.respond(ApprovalDecision::Deny);
    }
}

/// Sender side of the approval port.
#[derive(Clone, Debug)]
pub struct ApprovalBroker {
    tx: mpsc::UnboundedSender<ApprovalRequest>,
    outstanding: Arc<Mutex<HashSet<ApprovalKind>>>,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Clears the outstanding slot for a kind when the request resolves.
struct OutstandingGuard {
    kind: ApprovalKind,
    outstanding: Arc<Mutex<HashSet<ApprovalKind>>>,
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.outstanding.lock() {
            set.remove(&self.kind);
        }
    }
}

impl ApprovalBroker {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        (
            Self {
                tx,
                outstanding: Arc::new(Mutex::new(HashSet::new())),
                shutdown: Arc::new(shutdown),
            },
            rx,
        )
    }

    /// Ask the user and wait for the answer.
    pub async fn request(
        &self,
        kind: ApprovalKind,
        detail: impl Into<String>,
    ) -> Result<ApprovalDecision, ToolError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        if *shutdown_rx.borrow() {
            return Err(ToolError::ExecutionFailed("approvals have been shut down".into()));
        }

        let _guard = {
            let mut set = self
                .outstanding
                .lock()
                .map_err(|_| ToolError::ExecutionFailed("approval state is unavailable".into()))?;
            if !set.insert(kind) {
                return Err(ToolError::ExecutionFailed(format!(
                    "another {kind:?} approval is already pending"
                )));
            }
            OutstandingGuard {
                kind,
                outstanding: Arc::clone(&self.outstanding),
            }
        };

        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(ApprovalRequest {
                kind,
                detail: detail.into(),
                response: response_tx,
            })
            .map_err(|_| ToolError::ExecutionFailed("approval UI is unavailable".into()))?;

        tokio::select! {
            decision = response_rx => decision.map_err(|_| {
                ToolError::ExecutionFailed("approval request was cancelled before resolution".into())
            }),
            // The flag only ever flips to true.
            _ = shutdown_rx.changed() => {
                Err(ToolError::ExecutionFailed("approvals have been shut down".into()))
            }
        }
    }

    /// Fail all pending and future requests.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}
