//! Terminal command tool.
//!
//! Runs a command via `sh -c` in the workspace root and returns stdout,
//! stderr and the exit code. Commands can require user approval (with an
//! optionally edited command), are checked against a denylist, and can be
//! detached: after a timeout or on the user's signal the tool returns while
//! the process keeps running in the background. Cancelling or dropping a run
//! that has not been detached kills the command.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tracing::{info, warn};

use super::{parse_args, Tool, ToolContext};
use crate::agent::approvals::{ApprovalDecision, ApprovalKind};
use crate::api::wait_for_cancellation;
use crate::config::ToolsConfig;
use crate::error::ToolError;
use crate::types::ToolDefinition;

/// Tool that runs shell commands and returns their output.
pub struct TerminalCommandTool {
    pub root: PathBuf,
    /// Whether to require user confirmation before execution.
    pub confirm: bool,
    /// Case-insensitive substrings that block a command.
    pub denylist: Vec<String>,
    /// Return early and leave the command running after this long.
    pub detach_after: Option<Duration>,
}

impl TerminalCommandTool {
    pub fn from_config(config: &ToolsConfig, root: PathBuf) -> Self {
        Self {
            root,
            confirm: config.shell_confirm,
            denylist: config.shell_denylist.clone(),
            detach_after: (config.detach_after_secs > 0)
                .then(|| Duration::from_secs(config.detach_after_secs)),
        }
    }

    fn check_denylist(&self, command: &str) -> Result<(), ToolError> {
        match matched_denylist_pattern(command, &self.denylist) {
            Some(pattern) => Err(ToolError::ExecutionFailed(format!(
                "command blocked by tools.shell_denylist pattern `{pattern}`"
            ))),
            None => Ok(()),
        }
    }

    async fn run(&self, command: &str, context: &ToolContext) -> Result<String, ToolError> {
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to start command: {e}")))?;
        let pid = child.id();
        // Owns the child: dropping it (on cancel, or when the caller drops this
        // future) kills the process.
        let mut running = Box::pin(child.wait_with_output());

        let detach_timer = async {
            match self.detach_after {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending().await,
            }
        };
        let detach_signal = async {
            match &context.detach {
                Some(notify) => notify.notified().await,
                None => std::future::pending().await,
            }
        };

        let reason = tokio::select! {
            finished = &mut running => {
                let output = finished?;
                return Ok(format!(
                    "exit code: {}\nstdout:\n{}\nstderr:\n{}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr),
                ));
            }
            _ = wait_for_cancellation(context.cancel.clone()) => {
                return Err(ToolError::ExecutionFailed("command cancelled by user".into()));
            }
            _ = detach_timer => "still running after the detach timeout",
            _ = detach_signal => "detached by user",
        };

        let label = command.to_string();
        tokio::spawn(async move {
            match running.await {
                Ok(output) => info!(
                    command = %label,
                    exit_code = output.status.code().unwrap_or(-1),
                    "background command finished"
                ),
                Err(err) => warn!(command = %label, error = %err, "background command failed"),
            }
        });
        Ok(format!(
            "Command {reason}; it continues in the background (pid {}). Output is not captured.",
            pid.map_or_else(|| "unknown".to_string(), |p| p.to_string())
        ))
    }
}

#[derive(Deserialize)]
struct Args {
    command: String,
}

#[async_trait]
impl Tool for TerminalCommandTool {
    fn name(&self) -> &'static str {
        "run_terminal_command"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name(),
            "Run a shell command in the workspace root and return its exit code, stdout and stderr. Long-running commands may be moved to the background.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The shell command to execute" }
                },
                "required": ["command"]
            }),
        )
    }

    fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        if arguments["command"].as_str().is_some_and(|c| c.trim().is_empty()) {
            return Err(ToolError::InvalidArguments("command must not be empty".into()));
        }
        Ok(())
    }

    async fn execute(&self, arguments: &Value, context: &ToolContext) -> Result<String, ToolError> {
        let args: Args = parse_args(arguments)?;
        self.check_denylist(&args.command)?;

        let command = if self.confirm && !context.auto_approve {
            let Some(approvals) = &context.approvals else {
                return Ok("Command execution denied: approval is required but no approval handler is attached.".into());
            };
            match approvals
                .request(ApprovalKind::TerminalCommand, args.command.clone())
                .await?
            {
                ApprovalDecision::Approve => args.command,
                ApprovalDecision::Edited(edited) => {
                    self.check_denylist(&edited)?;
                    edited
                }
                ApprovalDecision::Deny => return Ok("Command execution denied by user.".into()),
            }
        } else {
            args.command
        };

        self.run(&command, context).await
    }
}

fn matched_denylist_pattern(command: &str, denylist: &[String]) -> Option<String> {
    let lowered = command.to_ascii_lowercase();
    denylist
        .iter()
        .map(|pattern| pattern.trim())
        .filter(|pattern| !pattern.is_empty())
        .find(|pattern| lowered.contains(&pattern.to_ascii_lowercase()))
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::approvals::ApprovalBroker;
    use crate::testsupport::TestTempDir;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::{watch, Notify};

    fn tool(dir: &TestTempDir, confirm: bool) -> TerminalCommandTool {
        TerminalCommandTool {
            root: dir.path().to_path_buf(),
            confirm,
            denylist: vec!["rm -rf /".into(), "MKFS".into()],
            detach_after: None,
        }
    }

    #[test]
    fn denylist_matching_is_case_insensitive() {
        let denylist = vec!["mkfs".to_string(), "  ".to_string()];
        assert_eq!(matched_denylist_pattern("sudo MKFS.ext4 /dev/sda", &denylist), Some("mkfs".into()));
        assert_eq!(matched_denylist_pattern("ls", &denylist), None);
    }

    #[tokio::test]
    async fn runs_command_in_workspace_root() {
        let dir = TestTempDir::new("shell-run");
        dir.write_text("marker.txt", "");
        let out = tool(&dir, false)
            .execute(&json!({"command": "ls; echo oops >&2; exit 3"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(out.starts_with("exit code: 3\n"));
        assert!(out.contains("marker.txt"));
        assert!(out.contains("stderr:\noops"));
    }

    #[tokio::test]
    async fn blocked_commands_fail() {
        let dir = TestTempDir::new("shell-deny");
        let err = tool(&dir, false)
            .execute(&json!({"command": "mkfs.ext4 /dev/null"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("shell_denylist"));
    }

    #[tokio::test]
    async fn confirmation_without_handler_denies() {
        let dir = TestTempDir::new("shell-nohandler");
        let out = tool(&dir, true)
            .execute(&json!({"command": "echo hi"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(out.contains("denied"));

        let auto = ToolContext {
            auto_approve: true,
            ..ToolContext::default()
        };
        let out = tool(&dir, true).execute(&json!({"command": "echo hi"}), &auto).await.unwrap();
        assert!(out.contains("stdout:\nhi"));
    }

    // Verifies an edited command replaces the proposed one.
    #[tokio::test]
    async fn approval_can_edit_or_deny_command() {
        let dir = TestTempDir::new("shell-approve");
        let (broker, mut rx) = ApprovalBroker::channel();
        tokio::spawn(async move {
            rx.recv().await.unwrap().respond(ApprovalDecision::Edited("echo edited".into()));
            rx.recv().await.unwrap().deny();
        });
        let ctx = ToolContext {
            approvals: Some(broker),
            ..ToolContext::default()
        };
        let t = tool(&dir, true);
        let out = t.execute(&json!({"command": "echo original"}), &ctx).await.unwrap();
        assert!(out.contains("stdout:\nedited"));

        let denied = t.execute(&json!({"command": "echo original"}), &ctx).await.unwrap();
        assert_eq!(denied, "Command execution denied by user.");
    }

    #[tokio::test]
    async fn detach_signal_returns_early() {
        let dir = TestTempDir::new("shell-detach");
        let notify = Arc::new(Notify::new());
        let ctx = ToolContext {
            detach: Some(notify.clone()),
            ..ToolContext::default()
        };
        let t = tool(&dir, false);
        let signal = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            notify.notify_one();
        });
        let out = t.execute(&json!({"command": "sleep 5"}), &ctx).await.unwrap();
        assert!(out.contains("detached by user"));
        signal.await.unwrap();
    }

    #[tokio::test]
    async fn detach_timeout_returns_early() {
        let dir = TestTempDir::new("shell-timeout");
        let mut t = tool(&dir, false);
        t.detach_after = Some(Duration::from_millis(100));
        let out = t
            .execute(&json!({"command": "sleep 5"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(out.contains("continues in the background"));
    }

    #[tokio::test]
    async fn cancellation_stops_command() {
        let dir = TestTempDir::new("shell-cancel");
        let (tx, rx) = watch::channel(false);
        let ctx = ToolContext {
            cancel: Some(rx),
            ..ToolContext::default()
        };
        let t = tool(&dir, false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        let err = t
            .execute(&json!({"command": "sleep 1 && touch finished"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.child("finished").exists());
    }

    // Verifies dropping an in-flight execution kills the command.
    #[tokio::test]
    async fn dropped_execution_kills_command() {
        let dir = TestTempDir::new("shell-drop");
        let t = tool(&dir, false);
        let args = json!({"command": "sleep 1 && touch finished"});
        let ctx = ToolContext::default();
        let timed_out = tokio::time::timeout(Duration::from_millis(200), t.execute(&args, &ctx)).await;
        assert!(timed_out.is_err());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.child("finished").exists());
    }

    #[tokio::test]
    async fn detached_command_keeps_running() {
        let dir = TestTempDir::new("shell-detached-runs");
        let mut t = tool(&dir, false);
        t.detach_after = Some(Duration::from_millis(100));
        let out = t
            .execute(&json!({"command": "sleep 0.5 && touch finished"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(out.contains("continues in the background"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(dir.child("finished").exists());
    }
}
