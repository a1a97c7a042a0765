//! Configuration data model.
//!
//! Every section is `#[serde(default)]` so a partial `mender.toml` only
//! overrides what it names. Loader and precedence logic live in `config::mod`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::{
    default_shell_denylist, DEFAULT_API_BASE_URL, DEFAULT_API_TIMEOUT_SECS, DEFAULT_MODEL_ID,
};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub agent: AgentConfig,
    pub tools: ToolsConfig,
    pub snapshots: SnapshotsConfig,
    pub truncation: TruncationConfig,
    pub display: DisplayConfig,
}

/// API connection settings used by the HTTP client.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Name of an env var holding the key, consulted when `api_key` is empty.
    pub api_key_env: Option<String>,
    pub model: String,
    /// Override for context window size. Auto-detected from model name if omitted.
    pub context_limit: Option<usize>,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.into(),
            api_key: String::new(),
            api_key_env: None,
            model: DEFAULT_MODEL_ID.into(),
            context_limit: None,
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
        }
    }
}

/// Agent loop behavior.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Empty means the built-in prompt.
    pub system_prompt: String,
    /// Iterations per user turn before asking to extend.
    pub max_iterations: usize,
    /// Iterations granted per approved extension.
    pub iteration_extension: usize,
    /// Minimum spacing between requests, process-wide.
    pub min_request_interval_ms: u64,
    /// Retries for HTTP 429 within one iteration.
    pub max_rate_limit_retries: u32,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_iterations: 25,
            iteration_extension: 10,
            min_request_interval_ms: 500,
            max_rate_limit_retries: 4,
            temperature: None,
            top_p: None,
        }
    }
}

/// Tool availability settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub shell_enabled: bool,
    /// Whether to prompt the user before running shell commands.
    pub shell_confirm: bool,
    /// Command denylist patterns for `run_terminal_command`.
    pub shell_denylist: Vec<String>,
    /// Move a running command to the background after this many seconds; 0 disables.
    pub detach_after_secs: u64,
    /// Command run by `get_diagnostics`, e.g. `cargo check --message-format short`.
    pub diagnostics_command: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell_enabled: true,
            shell_confirm: true,
            shell_denylist: default_shell_denylist(),
            detach_after_secs: 120,
            diagnostics_command: None,
        }
    }
}

/// Snapshot/undo engine settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SnapshotsConfig {
    pub enabled: bool,
    /// Defaults to `<data_local_dir>/mender/snapshots`.
    pub dir: Option<PathBuf>,
    pub max_tracked_files: usize,
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            max_tracked_files: crate::snapshot::DEFAULT_MAX_TRACKED_FILES,
        }
    }
}

/// Character budgets for tool results fed back to the model.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TruncationConfig {
    pub default_chars: usize,
    pub read_file_chars: usize,
    pub search_chars: usize,
    pub terminal_chars: usize,
    pub diagnostics_chars: usize,
    /// Terminal output keeps this many leading lines before char truncation.
    pub terminal_head_lines: usize,
    pub terminal_tail_lines: usize,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            default_chars: 20_000,
            read_file_chars: 40_000,
            search_chars: 12_000,
            terminal_chars: 16_000,
            diagnostics_chars: 12_000,
            terminal_head_lines: 50,
            terminal_tail_lines: 50,
        }
    }
}

impl TruncationConfig {
    /// Character budget for one tool's results.
    pub fn budget_for(&self, tool: &str) -> usize {
        match tool {
            "read_file" => self.read_file_chars,
            "grep_search" | "file_search" | "list_directory" => self.search_chars,
            "run_terminal_command" => self.terminal_chars,
            "get_diagnostics" => self.diagnostics_chars,
            _ => self.default_chars,
        }
    }
}

/// Display / rendering preferences.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub color: bool,
    pub show_tool_calls: bool,
    pub show_reasoning: bool,
    pub show_tokens: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            color: true,
            show_tool_calls: true,
            show_reasoning: false,
            show_tokens: false,
        }
    }
}
