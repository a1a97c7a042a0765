//! `get_diagnostics`: run the configured checker and report its findings.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;

use super::{parse_args, Tool, ToolContext};
use crate::error::ToolError;
use crate::types::ToolDefinition;

/// Tool that runs `tools.diagnostics_command` (e.g. `cargo check`).
pub struct DiagnosticsTool {
    pub command: Option<String>,
    pub root: PathBuf,
}

#[derive(Deserialize)]
struct Args {
    path: Option<String>,
}

#[async_trait]
impl Tool for DiagnosticsTool {
    fn name(&self) -> &'static str {
        "get_diagnostics"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name(),
            "Run the project's checker (compiler/linter) and return its diagnostics, optionally only those mentioning a path.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Only report lines mentioning this path" }
                }
            }),
        )
    }

    async fn execute(&self, arguments: &Value, _context: &ToolContext) -> Result<String, ToolError> {
        let args: Args = parse_args(arguments)?;
        let Some(command) = self.command.as_deref().filter(|c| !c.trim().is_empty()) else {
            return Err(ToolError::ExecutionFailed(
                "no diagnostics command configured (set tools.diagnostics_command)".into(),
            ));
        };

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to run `{command}`: {e}")))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let lines: Vec<&str> = match args.path.as_deref() {
            Some(path) => combined.lines().filter(|l| l.contains(path)).collect(),
            None => combined.lines().filter(|l| !l.trim().is_empty()).collect(),
        };

        if lines.is_empty() {
            return Ok(if output.status.success() {
                "No diagnostics.".to_string()
            } else {
                format!(
                    "`{command}` exited with code {} but reported nothing matching.",
                    output.status.code().unwrap_or(-1)
                )
            });
        }
        Ok(lines.join("\n"))
    }
}
