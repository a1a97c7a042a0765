//! Tool result truncation before results are appended to the conversation.

use crate::config::TruncationConfig;
use crate::textutil::{truncate_head_tail, truncate_lines_head_tail};

/// Fit a tool result into its per-tool character budget.
///
/// Terminal output first keeps its leading and trailing lines so the command
/// header and the exit status survive, then the char budget applies.
pub(super) fn truncate_tool_result(tool: &str, output: &str, config: &TruncationConfig) -> String {
    let budget = config.budget_for(tool);
    if tool == "run_terminal_command" {
        let by_lines =
            truncate_lines_head_tail(output, config.terminal_head_lines, config.terminal_tail_lines);
        return truncate_head_tail(&by_lines, budget);
    }
    truncate_head_tail(output, budget)
}
