//! Terminal output renderer for streamed answers, tool traces and status lines.
//!
//! Answers go to stdout; everything else goes to stderr so piping `mender`
//! captures only the model's text.

use crate::agent::AgentEvent;
use crate::config::DisplayConfig;
use crossterm::style::{Color, Stylize};
use std::io::{self, Write};

const INDENT: &str = "  ";
const GLYPH_TOOL_CALL: &str = "▸";
const GLYPH_TOOL_RESULT: &str = "←";
const GLYPH_TOOL_CALL_PLAIN: &str = ">";
const GLYPH_TOOL_RESULT_PLAIN: &str = "<";

/// Handles all terminal output formatting.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    color: bool,
    show_tool_calls: bool,
    show_reasoning: bool,
    show_tokens: bool,
}

impl Renderer {
    pub fn new(display: &DisplayConfig) -> Self {
        Self {
            color: display.color,
            show_tool_calls: display.show_tool_calls,
            show_reasoning: display.show_reasoning,
            show_tokens: display.show_tokens,
        }
    }

    /// Print the user input prompt indicator (to stderr).
    pub fn prompt(&self) {
        if self.color {
            eprint!("{} ", "›".with(Color::Cyan).bold());
        } else {
            eprint!("> ");
        }
        let _ = io::stderr().flush();
    }

    /// Print the model/session header.
    pub fn header(&self, model: &str, session_id: &str) {
        if self.color {
            eprintln!(
                "{} {} {}",
                "mender".with(Color::Cyan).bold(),
                model.with(Color::Magenta),
                format!("(session {session_id})").with(Color::DarkGrey),
            );
        } else {
            eprintln!("mender {model} (session {session_id})");
        }
    }

    /// Stream a fragment of the answer to stdout.
    pub fn content_delta(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }

    /// Terminate the streamed answer.
    pub fn finish_answer(&self) {
        println!();
    }

    pub fn reasoning_delta(&self, text: &str) {
        if !self.show_reasoning {
            return;
        }
        if self.color {
            eprint!("{}", text.with(Color::DarkGrey).italic());
        } else {
            eprint!("{text}");
        }
    }

    /// Print a tool call invocation (to stderr).
    pub fn tool_call(&self, name: &str, args: &str) {
        if !self.show_tool_calls {
            return;
        }
        let preview = truncate_single_line(args, 80);
        if self.color {
            eprintln!(
                "\r{INDENT}{} {}({})",
                GLYPH_TOOL_CALL.with(Color::Yellow),
                name.with(Color::Yellow).bold(),
                preview.with(Color::DarkGrey),
            );
        } else {
            eprintln!("\r{INDENT}{GLYPH_TOOL_CALL_PLAIN} {name}({preview})");
        }
    }

    /// Print a one-line tool result summary (to stderr).
    pub fn tool_result(&self, result: &str, failed: bool) {
        if !self.show_tool_calls {
            return;
        }
        let preview = truncate_single_line(result, 120);
        if self.color {
            let tint = if failed { Color::Red } else { Color::Green };
            eprintln!(
                "\r{INDENT}{} {}",
                GLYPH_TOOL_RESULT.with(tint),
                preview.with(Color::Grey),
            );
        } else {
            eprintln!("\r{INDENT}{GLYPH_TOOL_RESULT_PLAIN} {preview}");
        }
    }

    /// Print token usage for the current request (to stderr).
    pub fn token_usage(&self, prompt: u64, completion: u64, session_total: u64) {
        if !self.show_tokens {
            return;
        }
        if self.color {
            eprintln!(
                "\r{INDENT}{} prompt:{} completion:{} session:{}",
                "tokens".with(Color::DarkGrey),
                prompt.to_string().with(Color::White),
                completion.to_string().with(Color::White),
                session_total.to_string().with(Color::Cyan),
            );
        } else {
            eprintln!("\r{INDENT}tokens prompt:{prompt} completion:{completion} session:{session_total}");
        }
    }

    /// Print a warning (to stderr).
    pub fn warn(&self, msg: &str) {
        if self.color {
            eprintln!("\r{} {msg}", "warning:".with(Color::Yellow).bold());
        } else {
            eprintln!("\rwarning: {msg}");
        }
    }

    /// Print an error (to stderr).
    pub fn error(&self, msg: &str) {
        if self.color {
            eprintln!("\r{} {msg}", "error:".with(Color::Red).bold());
        } else {
            eprintln!("\rerror: {msg}");
        }
    }

    /// Print a small section header.
    pub fn section(&self, title: &str) {
        if self.color {
            eprintln!("{} {}", "•".with(Color::Cyan), title.bold());
        } else {
            eprintln!("{title}:");
        }
    }

    /// Print a key/value line under a section.
    pub fn field(&self, key: &str, value: &str) {
        if self.color {
            eprintln!("{INDENT}{} {value}", format!("{key}:").with(Color::DarkGrey));
        } else {
            eprintln!("{INDENT}{key}: {value}");
        }
    }

    /// Print an approval question without a trailing newline.
    pub fn approval_prompt(&self, question: &str, detail: &str) {
        if self.color {
            eprint!(
                "\r{} {} {} ",
                question.with(Color::Yellow).bold(),
                detail.with(Color::White),
                "[y/N/e]".with(Color::DarkGrey)
            );
        } else {
            eprint!("\r{question} {detail} [y/N/e] ");
        }
        let _ = io::stderr().flush();
    }

    /// Render one agent event.
    pub fn event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::Content(text) => self.content_delta(text),
            AgentEvent::Reasoning(text) => self.reasoning_delta(text),
            AgentEvent::ToolCall { name, arguments } => self.tool_call(name, arguments),
            AgentEvent::ToolResult { output, failed, .. } => self.tool_result(output, *failed),
            AgentEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
                session_total,
            } => self.token_usage(*prompt_tokens, *completion_tokens, *session_total),
            AgentEvent::RateLimited { attempt, delay } => self.warn(&format!(
                "rate limited; retry {attempt} in {:.1}s",
                delay.as_secs_f64()
            )),
            AgentEvent::LoopDetected { tool, forced } => self.warn(&if *forced {
                format!("{tool} keeps repeating; tools disabled for this turn")
            } else {
                format!("{tool} is repeating; redirecting the model")
            }),
            AgentEvent::Compressed {
                removed_messages,
                before_tokens,
                after_tokens,
            } => self.warn(&format!(
                "compressed context: dropped {removed_messages} messages (~{before_tokens} → ~{after_tokens} tokens)"
            )),
            AgentEvent::Warning(message) => self.warn(message),
            AgentEvent::IterationStarted { .. } | AgentEvent::ToolCallStarted { .. } => {}
        }
    }
}

/// Collapse whitespace runs and clip to `max_chars`, appending `...`.
pub fn truncate_single_line(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    crate::textutil::truncate_with_suffix_by_chars(&collapsed, max_chars.saturating_sub(3), "...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_preview_collapses_and_clips() {
        assert_eq!(truncate_single_line("a\n  b\tc", 10), "a b c");
        assert_eq!(truncate_single_line("abcdefghij", 6), "abc...");
    }

    #[test]
    fn renderer_takes_display_flags() {
        let display = DisplayConfig {
            color: false,
            show_tool_calls: false,
            show_reasoning: true,
            show_tokens: true,
        };
        let renderer = Renderer::new(&display);
        assert!(!renderer.color);
        assert!(!renderer.show_tool_calls);
        assert!(renderer.show_reasoning);
    }
}
