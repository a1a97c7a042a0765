//! Default configuration constants.

/// Default OpenAI-compatible API base URL.
pub(super) const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
/// Default provider model ID.
pub(super) const DEFAULT_MODEL_ID: &str = "gpt-4o";
/// Default timeout for model API requests.
pub(super) const DEFAULT_API_TIMEOUT_SECS: u64 = 120;
/// File name looked up in the working directory and the XDG config dir.
pub(super) const CONFIG_FILE_NAME: &str = "mender.toml";

/// Built-in system prompt used when `agent.system_prompt` is empty.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are mender, a coding agent working inside the user's workspace.

Use the tools to inspect files before changing them. Prefer small, targeted \
edits with edit_file over rewriting whole files. Run commands with \
run_terminal_command and check your work with get_diagnostics when a checker \
is configured. Every file change you make is tracked and can be reverted by \
the user.

When the task is done, reply with a short summary of what you changed and \
anything the user still needs to do.";

pub(super) fn default_shell_denylist() -> Vec<String> {
    [
        "rm -rf /",
        "rm -rf ~",
        "mkfs",
        "shutdown",
        "reboot",
        "dd if=",
        ":(){ :|:& };:",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
