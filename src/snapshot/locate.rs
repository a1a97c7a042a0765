//! Content-based positioning of recorded changes.
//!
//! Line numbers drift as later edits shift content, so a change is found
//! again by matching its context and replacement lines. All matching lives
//! behind [`locate`]; strategies are an ordered list and can be swapped with
//! [`locate_with`].

use super::FileChange;

/// One way of finding where a change's `new_lines` start in `lines`.
pub type LocateStrategy = fn(&FileChange, &[String]) -> Option<usize>;

/// Default strategy order, most specific first.
pub const DEFAULT_STRATEGIES: &[LocateStrategy] = &[
    context_then_new_lines,
    context_before_only,
    unique_new_lines,
];

/// Current line index of `change` in `lines`, falling back to the cached line.
pub fn locate(change: &FileChange, lines: &[String]) -> usize {
    locate_with(DEFAULT_STRATEGIES, change, lines)
}

/// Line index found by the default strategies only; `None` when the change
/// can no longer be matched in `lines`.
pub fn find(change: &FileChange, lines: &[String]) -> Option<usize> {
    DEFAULT_STRATEGIES
        .iter()
        .find_map(|strategy| strategy(change, lines))
}

/// [`locate`] with an explicit strategy list.
pub fn locate_with(strategies: &[LocateStrategy], change: &FileChange, lines: &[String]) -> usize {
    strategies
        .iter()
        .find_map(|strategy| strategy(change, lines))
        .unwrap_or_else(|| change.cached_start_line.min(lines.len()))
}

/// `context_before` immediately followed by `new_lines`.
pub fn context_then_new_lines(change: &FileChange, lines: &[String]) -> Option<usize> {
    if change.context_before.is_empty() && change.new_lines.is_empty() {
        return None;
    }
    let needle: Vec<String> = change
        .context_before
        .iter()
        .chain(&change.new_lines)
        .cloned()
        .collect();
    let offset = change.context_before.len();
    nearest(
        find_all(lines, &needle).into_iter().map(|at| at + offset),
        change.cached_start_line,
    )
}

/// `context_before` alone; the change starts right after it.
pub fn context_before_only(change: &FileChange, lines: &[String]) -> Option<usize> {
    if change.context_before.is_empty() {
        return None;
    }
    let offset = change.context_before.len();
    nearest(
        find_all(lines, &change.context_before)
            .into_iter()
            .map(|at| at + offset),
        change.cached_start_line,
    )
}

/// A multi-line `new_lines` block that occurs exactly once.
pub fn unique_new_lines(change: &FileChange, lines: &[String]) -> Option<usize> {
    if change.new_lines.len() < 2 {
        return None;
    }
    match find_all(lines, &change.new_lines).as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

/// Every index where `needle` occurs as a contiguous run in `haystack`.
pub(crate) fn find_all(haystack: &[String], needle: &[String]) -> Vec<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(at, _)| at)
        .collect()
}

/// Candidate closest to `hint`; earlier index wins ties.
pub(crate) fn nearest(candidates: impl IntoIterator<Item = usize>, hint: usize) -> Option<usize> {
    candidates
        .into_iter()
        .min_by_key(|&at| (at.abs_diff(hint), at))
}
