//! Shared UTF-8-safe truncation helpers.
//!
//! Tool results, previews and error bodies are all cut by character count.
//! Byte slicing can panic when a cut lands inside a multi-byte character, so
//! every truncation in the crate goes through these helpers.

/// Return a UTF-8-safe prefix holding at most `max_chars` characters.
pub fn prefix_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Return a UTF-8-safe suffix holding at most `max_chars` characters.
pub fn suffix_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}

/// Truncate by characters and append `suffix` when truncation occurs.
pub fn truncate_with_suffix_by_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    format!("{}{suffix}", prefix_chars(text, max_chars))
}

/// Marker placed right after the kept head of a truncated text.
pub fn head_marker(total_chars: usize) -> String {
    format!("\n[... truncated: {total_chars} chars total, head above ...]\n")
}

/// Marker placed right before the kept tail of a truncated text.
pub const TAIL_MARKER: &str = "[... tail below ...]\n";

/// Keep the beginning and end of `text` so the result fits in `max_chars`.
///
/// When truncation happens the output is `head + head_marker + TAIL_MARKER +
/// tail` and never exceeds `max_chars` characters. If the budget is too small
/// to hold both markers, a plain prefix of `max_chars` characters is returned.
pub fn truncate_head_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }

    let marker = head_marker(total);
    let overhead = marker.chars().count() + TAIL_MARKER.chars().count();
    if max_chars < overhead + 2 {
        return prefix_chars(text, max_chars).to_string();
    }

    let available = max_chars - overhead;
    let tail_len = available / 3;
    let head_len = available - tail_len;

    let mut out = String::with_capacity(max_chars * 4);
    out.push_str(prefix_chars(text, head_len));
    out.push_str(&marker);
    out.push_str(TAIL_MARKER);
    out.push_str(suffix_chars(text, tail_len));
    out
}

/// Keep the first `head` and last `tail` lines of `text`.
///
/// Used for terminal output so the command header and the exit status both
/// survive. Returns the text unchanged when it already fits.
pub fn truncate_lines_head_tail(text: &str, head: usize, tail: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= head + tail {
        return text.to_string();
    }
    let omitted = lines.len() - head - tail;
    let mut out = lines[..head].join("\n");
    out.push_str(&format!("\n[... {omitted} lines omitted ...]\n"));
    out.push_str(&lines[lines.len() - tail..].join("\n"));
    out
}
