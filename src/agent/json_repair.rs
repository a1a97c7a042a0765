//! Staged recovery for malformed tool-call arguments.
//!
//! Models emit arguments that are almost JSON: wrapped in markdown fences,
//! with raw newlines inside strings, trailing commas, bare keys or single
//! quotes, or cut off by the output token limit. Each stage is tried on its
//! own, then all of them combined; cut-off input is balanced only when the
//! response actually stopped on `length`. Total failure yields `{}`.

use serde_json::Value;
use tracing::debug;

/// Which stage produced the parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStage {
    Clean,
    StripFences,
    EscapeControlChars,
    StripTrailingCommas,
    QuoteKeys,
    SingleQuotes,
    Combined,
    BalanceTruncated,
    Fallback,
}

/// Parsed arguments plus how they were obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    pub value: Value,
    pub stage: RepairStage,
}

type Stage = (RepairStage, fn(&str) -> String);

const STAGES: &[Stage] = &[
    (RepairStage::StripFences, strip_fences),
    (RepairStage::EscapeControlChars, escape_control_chars),
    (RepairStage::StripTrailingCommas, strip_trailing_commas),
    (RepairStage::QuoteKeys, quote_unquoted_keys),
    (RepairStage::SingleQuotes, convert_single_quotes),
];

/// Parse tool arguments, repairing them if needed.
///
/// `truncated` should be true when the response finished with `length`.
pub fn parse_tool_arguments(raw: &str, truncated: bool) -> RepairOutcome {
    if raw.trim().is_empty() {
        return RepairOutcome {
            value: Value::Object(Default::default()),
            stage: RepairStage::Clean,
        };
    }
    if let Ok(value) = serde_json::from_str(raw) {
        return RepairOutcome {
            value,
            stage: RepairStage::Clean,
        };
    }

    for (stage, transform) in STAGES {
        if let Ok(value) = serde_json::from_str(&transform(raw)) {
            debug!(?stage, "repaired tool arguments");
            return RepairOutcome { value, stage: *stage };
        }
    }

    let combined = STAGES
        .iter()
        .fold(raw.to_string(), |text, (_, transform)| transform(&text));
    if let Ok(value) = serde_json::from_str(&combined) {
        debug!("repaired tool arguments with combined stages");
        return RepairOutcome {
            value,
            stage: RepairStage::Combined,
        };
    }

    if truncated {
        if let Ok(value) = serde_json::from_str(&balance_truncated(&combined)) {
            debug!("repaired truncated tool arguments");
            return RepairOutcome {
                value,
                stage: RepairStage::BalanceTruncated,
            };
        }
    }

    debug!(raw_len = raw.len(), "tool arguments unrecoverable; using {{}}");
    RepairOutcome {
        value: Value::Object(Default::default()),
        stage: RepairStage::Fallback,
    }
}

/// Remove a surrounding ```json ... ``` fence.
fn strip_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
        .to_string()
}

/// Walk `text`, tracking whether each char sits inside a quoted string.
/// `quotes` lists the characters that open strings.
fn map_chars(text: &str, quotes: &[char], mut f: impl FnMut(char, Option<char>, &mut String)) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in text.chars() {
        let inside = quote;
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
        } else if quotes.contains(&c) {
            quote = Some(c);
        }
        f(c, inside, &mut out);
    }
    out
}

/// Escape raw newlines and tabs that appear inside string literals.
fn escape_control_chars(text: &str) -> String {
    map_chars(text, &['"', '\''], |c, inside, out| match (inside, c) {
        (Some(_), '\n') => out.push_str("\\n"),
        (Some(_), '\r') => out.push_str("\\r"),
        (Some(_), '\t') => out.push_str("\\t"),
        _ => out.push(c),
    })
}

/// Drop commas directly before a closing `}` or `]`.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let chars: Vec<char> = text.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            out.push(c);
            continue;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Quote bare object keys: `{name: 1}` becomes `{"name": 1}`.
fn quote_unquoted_keys(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut quote: Option<char> = None;
    let mut escaped = false;
    // True right after `{` or `,` (ignoring whitespace) outside strings.
    let mut expecting_key = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            out.push(c);
            i += 1;
            continue;
        }
        if expecting_key && (c.is_ascii_alphabetic() || c == '_' || c == '$') {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '$' | '-')) {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            let next = chars[i..].iter().find(|n| !n.is_whitespace());
            if next == Some(&':') {
                out.push('"');
                out.push_str(&ident);
                out.push('"');
            } else {
                out.push_str(&ident);
            }
            expecting_key = false;
            continue;
        }
        match c {
            '{' | ',' => expecting_key = true,
            '"' | '\'' => {
                quote = Some(c);
                expecting_key = false;
            }
            c if c.is_whitespace() => {}
            _ => expecting_key = false,
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Turn single-quoted strings into double-quoted ones.
fn convert_single_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in text.chars() {
        match quote {
            Some('\'') => {
                if escaped {
                    escaped = false;
                    if c != '\'' {
                        out.push('\\');
                    }
                    out.push(c);
                } else if c == '\\' {
                    escaped = true;
                } else if c == '\'' {
                    quote = None;
                    out.push('"');
                } else if c == '"' {
                    out.push_str("\\\"");
                } else {
                    out.push(c);
                }
            }
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None => {
                if c == '\'' {
                    quote = Some('\'');
                    out.push('"');
                } else {
                    if c == '"' {
                        quote = Some('"');
                    }
                    out.push(c);
                }
            }
        }
    }
    out
}

/// Close an unterminated string and any open brackets of cut-off JSON.
fn balance_truncated(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = text.trim_end().to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    } else {
        if out.ends_with(',') {
            out.pop();
        }
        if out.ends_with(':') {
            out.push_str(" null");
        }
    }
    while let Some(close) = stack.pop() {
        out.push(close);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_and_empty_arguments_parse_cleanly() {
        let out = parse_tool_arguments(r#"{"path":"a.rs"}"#, false);
        assert_eq!(out.stage, RepairStage::Clean);
        assert_eq!(out.value, json!({"path": "a.rs"}));
        assert_eq!(parse_tool_arguments("  ", false).value, json!({}));
    }

    // Verifies bare keys, single quotes and a trailing comma together recover.
    #[test]
    fn recovers_javascript_style_object() {
        let out = parse_tool_arguments("{name: 'a', value: 1,}", false);
        assert_eq!(out.value, json!({"name": "a", "value": 1}));
        assert_eq!(out.stage, RepairStage::Combined);
    }

    #[test]
    fn individual_stages() {
        let fenced = parse_tool_arguments("```json\n{\"a\": 1}\n```", false);
        assert_eq!(fenced.stage, RepairStage::StripFences);
        assert_eq!(fenced.value, json!({"a": 1}));

        let raw_newline = parse_tool_arguments("{\"content\": \"line1\nline2\tx\"}", false);
        assert_eq!(raw_newline.stage, RepairStage::EscapeControlChars);
        assert_eq!(raw_newline.value, json!({"content": "line1\nline2\tx"}));

        let commas = parse_tool_arguments(r#"{"a": [1, 2,], }"#, false);
        assert_eq!(commas.stage, RepairStage::StripTrailingCommas);
        assert_eq!(commas.value, json!({"a": [1, 2]}));

        let keys = parse_tool_arguments(r#"{path: "src/a.rs", max_results: 3}"#, false);
        assert_eq!(keys.stage, RepairStage::QuoteKeys);
        assert_eq!(keys.value, json!({"path": "src/a.rs", "max_results": 3}));

        let quotes = parse_tool_arguments(r#"{'say': 'it\'s "fine"'}"#, false);
        assert_eq!(quotes.stage, RepairStage::SingleQuotes);
        assert_eq!(quotes.value, json!({"say": "it's \"fine\""}));
    }

    #[test]
    fn commas_and_colons_inside_strings_survive() {
        let out = parse_tool_arguments(r#"{"text": "a, }", b: 1,}"#, false);
        assert_eq!(out.value, json!({"text": "a, }", "b": 1}));
    }

    // Verifies cut-off arguments are balanced only after a length stop.
    #[test]
    fn truncated_arguments_need_length_finish() {
        let cut = r#"{"path": "a.txt", "content": "partial line"#;
        let without = parse_tool_arguments(cut, false);
        assert_eq!(without.stage, RepairStage::Fallback);
        assert_eq!(without.value, json!({}));

        let with = parse_tool_arguments(cut, true);
        assert_eq!(with.stage, RepairStage::BalanceTruncated);
        assert_eq!(with.value, json!({"path": "a.txt", "content": "partial line"}));

        let dangling_key = parse_tool_arguments(r#"{"a": [1, 2"#, true);
        assert_eq!(dangling_key.value, json!({"a": [1, 2]}));
        let dangling_colon = parse_tool_arguments(r#"{"a": 1, "b":"#, true);
        assert_eq!(dangling_colon.value, json!({"a": 1, "b": null}));
    }

    #[test]
    fn garbage_falls_back_to_empty_object() {
        let out = parse_tool_arguments("definitely not json", true);
        assert_eq!(out.stage, RepairStage::Fallback);
        assert_eq!(out.value, json!({}));
    }
}
