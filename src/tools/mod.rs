//! Pluggable tool system.
//!
//! Tools are async trait objects that the model can invoke during the agentic
//! loop. Each tool provides its own OpenAI function definition and an async
//! execute method. The [`ToolRegistry`] resolves aliases, validates arguments
//! against each tool's schema and turns every failure into an
//! `{"error": ...}` result so the loop never aborts on a bad call.

pub mod diagnostics;
pub mod files;
pub mod search;
pub mod shell;

use crate::agent::approvals::ApprovalBroker;
use crate::config::Config;
use crate::error::ToolError;
use crate::snapshot::SharedSnapshots;
use crate::types::ToolDefinition;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::debug;

/// Names the model commonly uses for tools registered under another name.
pub const TOOL_ALIASES: &[(&str, &str)] = &[
    ("write_file", "create_file"),
    ("str_replace", "edit_file"),
    ("replace_in_file", "edit_file"),
    ("edit", "edit_file"),
    ("cat", "read_file"),
    ("open_file", "read_file"),
    ("view_file", "read_file"),
    ("grep", "grep_search"),
    ("search_files", "grep_search"),
    ("find_files", "file_search"),
    ("ls", "list_directory"),
    ("list_dir", "list_directory"),
    ("list_files", "list_directory"),
    ("run_command", "run_terminal_command"),
    ("run_shell", "run_terminal_command"),
    ("execute_command", "run_terminal_command"),
    ("bash", "run_terminal_command"),
    ("shell", "run_terminal_command"),
    ("remove_file", "delete_file"),
    ("delete", "delete_file"),
    ("diagnostics", "get_diagnostics"),
    ("get_errors", "get_diagnostics"),
];

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// A tool that can be invoked by the AI model.
///
/// Implement this trait to add custom tools. Register instances with
/// [`ToolRegistry`] before creating the agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name matching what the model will call.
    fn name(&self) -> &'static str;

    /// OpenAI-format tool definition for inclusion in API requests.
    fn definition(&self) -> ToolDefinition;

    /// Tool-specific argument rules checked after schema validation.
    fn validate(&self, _arguments: &Value) -> Result<(), ToolError> {
        Ok(())
    }

    /// Execute the tool with already-parsed JSON arguments.
    /// Returns a text result to send back to the model.
    async fn execute(&self, arguments: &Value, context: &ToolContext) -> Result<String, ToolError>;
}

/// Per-call collaborators handed to a running tool.
#[derive(Clone, Default)]
pub struct ToolContext {
    /// Flips to `true` when the user cancels the turn.
    pub cancel: Option<watch::Receiver<bool>>,
    /// Notified when the user asks a running command to continue in the background.
    pub detach: Option<Arc<Notify>>,
    pub approvals: Option<ApprovalBroker>,
    /// Skip interactive approvals entirely.
    pub auto_approve: bool,
}

impl ToolContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Result of one dispatched call. `output` is always model-ready text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Canonical tool name after alias resolution.
    pub tool: String,
    pub output: String,
    pub failed: bool,
}

impl DispatchOutcome {
    fn error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            output: error_json(&message.into()),
            failed: true,
        }
    }
}

/// `{"error": message}` as a JSON string.
pub fn error_json(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// Deserialize tool arguments into a typed struct.
pub(crate) fn parse_args<T: DeserializeOwned>(arguments: &Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments.clone()).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Resolve a model-supplied path against the workspace root.
pub(crate) fn resolve_path(root: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

// ---------------------------------------------------------------------------
// Tool registry
// ---------------------------------------------------------------------------

/// Registry of available tools.
///
/// The agent sends all registered tool definitions to the API, and dispatches
/// tool calls through this registry.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. A later tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(Box::new(tool));
    }

    /// Get tool definitions for the API request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// True if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Canonical name for `name`: registered names win over aliases.
    pub fn resolve_name<'a>(&self, name: &'a str) -> &'a str {
        if self.find(name).is_some() {
            return name;
        }
        TOOL_ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, target)| *target)
            .unwrap_or(name)
    }

    /// Resolve, validate and execute one call. Never fails: every problem is
    /// reported to the model as an `{"error": ...}` result.
    pub async fn dispatch(&self, name: &str, arguments: &Value, context: &ToolContext) -> DispatchOutcome {
        let resolved = self.resolve_name(name);
        if resolved != name {
            debug!(alias = name, tool = resolved, "resolved tool alias");
        }
        let Some(tool) = self.find(resolved) else {
            return DispatchOutcome::error(
                resolved,
                format!(
                    "unknown tool `{name}`; available tools: {}",
                    self.names().join(", ")
                ),
            );
        };

        let definition = tool.definition();
        if let Err(message) = validate_against_schema(arguments, &definition.function.parameters) {
            return DispatchOutcome::error(resolved, format!("invalid arguments for {resolved}: {message}"));
        }
        if let Err(err) = tool.validate(arguments) {
            return DispatchOutcome::error(resolved, err.to_string());
        }

        match tool.execute(arguments, context).await {
            Ok(output) => DispatchOutcome {
                tool: resolved.to_string(),
                output,
                failed: false,
            },
            Err(err) => DispatchOutcome::error(resolved, err.to_string()),
        }
    }

    fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check `required` fields and declared primitive `type`s of top-level properties.
fn validate_against_schema(arguments: &Value, schema: &Value) -> Result<(), String> {
    let Some(args) = arguments.as_object() else {
        return Err("arguments must be a JSON object".into());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|field| args.get(*field).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required field(s): {}", missing.join(", ")));
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (field, value) in args {
        if value.is_null() {
            continue;
        }
        let Some(expected) = properties
            .get(field)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        if !matches_type(value, expected) {
            return Err(format!("field `{field}` must be of type {expected}"));
        }
    }
    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

/// Build the fixed tool set from configuration.
pub fn default_registry(config: &Config, root: PathBuf, snapshots: Option<SharedSnapshots>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(files::ReadFileTool { root: root.clone() });
    registry.register(files::ListDirectoryTool { root: root.clone() });
    registry.register(search::FileSearchTool::new(root.clone()));
    registry.register(search::GrepSearchTool::new(root.clone()));
    registry.register(files::CreateFileTool {
        root: root.clone(),
        snapshots: snapshots.clone(),
    });
    registry.register(files::EditFileTool {
        root: root.clone(),
        snapshots: snapshots.clone(),
    });
    registry.register(files::DeleteFileTool {
        root: root.clone(),
        snapshots,
    });
    if config.tools.shell_enabled {
        registry.register(shell::TerminalCommandTool::from_config(&config.tools, root.clone()));
    }
    registry.register(diagnostics::DiagnosticsTool {
        command: config.tools.diagnostics_command.clone(),
        root,
    });
    registry
}
