//! Reconstruct file content from a baseline plus a subset of changes.

use super::locate::{find_all, nearest};
use super::FileChange;
use tracing::warn;

/// Apply `changes` (already in ascending timestamp order) on top of `baseline`.
///
/// Each change is placed by finding its `old_lines`; pure insertions are
/// placed after the longest suffix of `context_before` that still matches,
/// then at the cached line. Changes that cannot be placed are skipped.
pub fn replay(baseline: &[String], changes: &[&FileChange]) -> Vec<String> {
    let mut content = baseline.to_vec();
    for change in changes {
        match placement(change, &content) {
            Some(at) => {
                let end = (at + change.old_lines.len()).min(content.len());
                content.splice(at..end, change.new_lines.iter().cloned());
            }
            None => warn!(change = %change.id, "could not place change during replay; skipping"),
        }
    }
    content
}

fn placement(change: &FileChange, content: &[String]) -> Option<usize> {
    if change.old_lines.is_empty() {
        return Some(insertion_point(change, content));
    }

    let candidates = find_all(content, &change.old_lines);
    // Prefer occurrences still preceded by the recorded context.
    let anchored: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&at| preceded_by(content, at, &change.context_before))
        .collect();
    if anchored.is_empty() {
        nearest(candidates, change.cached_start_line)
    } else {
        nearest(anchored, change.cached_start_line)
    }
}

fn insertion_point(change: &FileChange, content: &[String]) -> usize {
    let before = &change.context_before;
    for len in (1..=before.len()).rev() {
        let suffix = &before[before.len() - len..];
        let hits = find_all(content, suffix).into_iter().map(|at| at + len);
        if let Some(at) = nearest(hits, change.cached_start_line) {
            return at;
        }
    }
    change.cached_start_line.min(content.len())
}

fn preceded_by(content: &[String], at: usize, context: &[String]) -> bool {
    context.is_empty() || (at >= context.len() && content[at - context.len()..at] == *context)
}
