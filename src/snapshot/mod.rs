//! Snapshot/undo engine for agent-made file mutations.
//!
//! Every mutation the agent makes is recorded against the file it touched:
//! the first mutation captures a baseline, later ones append [`FileChange`]s.
//! A pending snapshot can be inspected, rolled back one change at a time,
//! rolled back entirely, or confirmed (discarded without touching the file).
//!
//! Snapshots are kept in memory keyed by normalized path and mirrored to one
//! JSON file each through [`SnapshotStore`].

pub mod locate;
pub mod replay;
mod store;

pub use store::SnapshotStore;

use crate::error::SnapshotError;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Lines of context captured on each side of an edited region.
pub const CONTEXT_LINES: usize = 3;
/// Default cap on simultaneously tracked files.
pub const DEFAULT_MAX_TRACKED_FILES: usize = 50;
/// Slack allowed on top of tracked bytes before deleting a created file.
const DELETE_GUARD_SLACK_BYTES: u64 = 4_096;
/// Growth factor over tracked bytes that still counts as agent-authored.
const DELETE_GUARD_FACTOR: u64 = 2;

/// Engine shared between file tools and the CLI.
pub type SharedSnapshots = Arc<Mutex<SnapshotEngine>>;

/// Kind of mutation that produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotTool {
    Edit,
    Overwrite,
    Create,
    Delete,
}

impl SnapshotTool {
    /// `create` and `delete` decide rollback behavior and never change.
    fn is_terminal(self) -> bool {
        matches!(self, Self::Create | Self::Delete)
    }

    /// Kind after another mutation of `incoming` kind.
    fn merge(self, incoming: SnapshotTool) -> SnapshotTool {
        if self.is_terminal() || incoming.is_terminal() {
            self
        } else {
            incoming
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Edit => "edit",
            Self::Overwrite => "overwrite",
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

/// One atomic edit inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub id: String,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
    pub old_lines: Vec<String>,
    pub new_lines: Vec<String>,
    /// Zero-based line where `new_lines` started when recorded.
    pub cached_start_line: usize,
}

/// Baseline plus ordered changes for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub id: String,
    pub file_path: String,
    pub file_name: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub tool: SnapshotTool,
    /// `None` only when the agent created the file; rollback then deletes it.
    pub baseline_content: Option<String>,
    pub changes: Vec<FileChange>,
    pub total_lines_added: usize,
    pub total_lines_removed: usize,
}

impl FileSnapshot {
    pub fn change(&self, change_id: &str) -> Option<&FileChange> {
        self.changes.iter().find(|c| c.id == change_id)
    }

    /// Changes in ascending timestamp order; recording order breaks ties.
    fn ordered_changes(&self) -> Vec<&FileChange> {
        let mut ordered: Vec<&FileChange> = self.changes.iter().collect();
        ordered.sort_by_key(|c| c.timestamp);
        ordered
    }

    /// Bytes the tracked changes wrote into the file.
    fn tracked_bytes(&self) -> u64 {
        self.changes
            .iter()
            .map(|c| c.new_lines.iter().map(|l| l.len() as u64 + 1).sum::<u64>())
            .sum()
    }

    fn recount(&mut self) {
        self.total_lines_added = self.changes.iter().map(|c| c.new_lines.len()).sum();
        self.total_lines_removed = self.changes.iter().map(|c| c.old_lines.len()).sum();
    }
}

/// A mutation reported by a file tool, recorded after it hit the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRegion {
    /// Zero-based line where the edited region starts.
    pub start_line: usize,
    pub old_lines: Vec<String>,
    pub new_lines: Vec<String>,
}

impl ChangeRegion {
    /// Minimal differing region between two versions of a file, found by
    /// trimming the common leading and trailing lines.
    pub fn between(old: &str, new: &str) -> ChangeRegion {
        let old_lines = split_lines(old);
        let new_lines = split_lines(new);
        let prefix = old_lines
            .iter()
            .zip(&new_lines)
            .take_while(|(a, b)| a == b)
            .count();
        let max_suffix = old_lines.len().min(new_lines.len()) - prefix;
        let suffix = old_lines
            .iter()
            .rev()
            .zip(new_lines.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();
        ChangeRegion {
            start_line: prefix,
            old_lines: old_lines[prefix..old_lines.len() - suffix].to_vec(),
            new_lines: new_lines[prefix..new_lines.len() - suffix].to_vec(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.old_lines == self.new_lines
    }
}

/// Tracks pending snapshots in memory and on disk.
#[derive(Debug)]
pub struct SnapshotEngine {
    store: SnapshotStore,
    /// Keyed by normalized absolute file path.
    snapshots: HashMap<String, FileSnapshot>,
    max_tracked_files: usize,
}

impl SnapshotEngine {
    /// Open the snapshot directory and load every pending snapshot.
    pub fn open(dir: impl Into<PathBuf>, max_tracked_files: usize) -> Result<Self, SnapshotError> {
        let store = SnapshotStore::open(dir)?;
        let snapshots = store
            .load_all()?
            .into_iter()
            .map(|s| (s.file_path.clone(), s))
            .collect();
        let mut engine = Self {
            store,
            snapshots,
            max_tracked_files: max_tracked_files.max(1),
        };
        engine.evict_over_limit();
        Ok(engine)
    }

    /// Default per-user location: `<data_local_dir>/mender/snapshots`.
    pub fn default_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("mender")
            .join("snapshots")
    }

    pub fn into_shared(self) -> SharedSnapshots {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Pending snapshots, oldest first.
    pub fn list(&self) -> Vec<&FileSnapshot> {
        let mut all: Vec<&FileSnapshot> = self.snapshots.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn get(&self, snapshot_id: &str) -> Option<&FileSnapshot> {
        self.snapshots.values().find(|s| s.id == snapshot_id)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<&FileSnapshot> {
        self.snapshots.get(&normalize_path(path))
    }

    /// Record a mutation that has already been written to `path`.
    ///
    /// `start_line` is where `old_lines` began before the edit; `new_lines`
    /// occupy the same position afterwards. Returns the new change id, or
    /// `None` when the mutation changed nothing.
    pub fn record_change(
        &mut self,
        path: &Path,
        kind: SnapshotTool,
        old_lines: Vec<String>,
        new_lines: Vec<String>,
        start_line: usize,
    ) -> Result<Option<String>, SnapshotError> {
        if old_lines == new_lines {
            return Ok(None);
        }

        let key = normalize_path(path);
        let current = read_lines_if_exists(Path::new(&key))?;
        let start = start_line.min(current.len());
        let region_end = (start + new_lines.len()).min(current.len());
        let now = now_unix_millis();

        let change = FileChange {
            id: generate_change_id(),
            timestamp: now,
            context_before: current[start.saturating_sub(CONTEXT_LINES)..start].to_vec(),
            context_after: current[region_end..(region_end + CONTEXT_LINES).min(current.len())]
                .to_vec(),
            old_lines,
            new_lines,
            cached_start_line: start,
        };
        let change_id = change.id.clone();

        match self.snapshots.get_mut(&key) {
            Some(existing) => {
                existing.tool = existing.tool.merge(kind);
                existing.updated_at = now;
                existing.changes.push(change);
                existing.recount();
            }
            None => {
                let baseline_content = (kind != SnapshotTool::Create).then(|| {
                    let mut baseline = current[..start].to_vec();
                    baseline.extend(change.old_lines.iter().cloned());
                    baseline.extend(current[region_end..].iter().cloned());
                    join_lines(&baseline)
                });
                let mut snapshot = FileSnapshot {
                    id: snapshot_id_for(&key),
                    file_name: Path::new(&key)
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| key.clone()),
                    file_path: key.clone(),
                    created_at: now,
                    updated_at: now,
                    tool: kind,
                    baseline_content,
                    changes: vec![change],
                    total_lines_added: 0,
                    total_lines_removed: 0,
                };
                snapshot.recount();
                debug!(path = %key, kind = kind.as_str(), "tracking new file snapshot");
                self.snapshots.insert(key.clone(), snapshot);
            }
        }
        if let Some(snapshot) = self.snapshots.get(&key) {
            self.store.save(snapshot)?;
        }
        self.evict_over_limit();
        Ok(Some(change_id))
    }

    /// Current zero-based line of a change in the file on disk.
    pub fn locate_change(&self, snapshot_id: &str, change_id: &str) -> Result<usize, SnapshotError> {
        let (change, lines) = self.change_and_lines(snapshot_id, change_id)?;
        Ok(locate::locate(change, &lines))
    }

    /// Like [`Self::locate_change`] without the cached-line fallback:
    /// `Ok(None)` when the change no longer matches the file on disk.
    pub fn find_change(&self, snapshot_id: &str, change_id: &str) -> Result<Option<usize>, SnapshotError> {
        let (change, lines) = self.change_and_lines(snapshot_id, change_id)?;
        Ok(locate::find(change, &lines))
    }

    fn change_and_lines(
        &self,
        snapshot_id: &str,
        change_id: &str,
    ) -> Result<(&FileChange, Vec<String>), SnapshotError> {
        let snapshot = self
            .get(snapshot_id)
            .ok_or_else(|| SnapshotError::NotFound(snapshot_id.to_string()))?;
        let change = snapshot
            .change(change_id)
            .ok_or_else(|| SnapshotError::NotFound(change_id.to_string()))?;
        let lines = read_lines_if_exists(Path::new(&snapshot.file_path))?;
        Ok((change, lines))
    }

    /// Undo one change while keeping every other change in the snapshot.
    pub fn rollback_change(&mut self, snapshot_id: &str, change_id: &str) -> Result<(), SnapshotError> {
        let key = self.key_for(snapshot_id)?;
        let snapshot = &self.snapshots[&key];
        if snapshot.change(change_id).is_none() {
            return Err(SnapshotError::NotFound(change_id.to_string()));
        }
        if snapshot.changes.len() == 1 {
            return self.rollback_snapshot(snapshot_id);
        }

        let baseline = snapshot
            .baseline_content
            .as_deref()
            .map(split_lines)
            .unwrap_or_default();
        let others: Vec<&FileChange> = snapshot
            .ordered_changes()
            .into_iter()
            .filter(|c| c.id != change_id)
            .collect();
        let content = join_lines(&replay::replay(&baseline, &others));
        write_file(Path::new(&key), &content)?;

        let Some(snapshot) = self.snapshots.get_mut(&key) else {
            return Err(SnapshotError::NotFound(snapshot_id.to_string()));
        };
        snapshot.changes.retain(|c| c.id != change_id);
        snapshot.recount();
        snapshot.updated_at = now_unix_millis();
        info!(path = %key, change = change_id, "rolled back single change");
        self.store.save(snapshot)?;
        Ok(())
    }

    /// Restore the baseline (or delete an agent-created file) and forget the snapshot.
    pub fn rollback_snapshot(&mut self, snapshot_id: &str) -> Result<(), SnapshotError> {
        let key = self.key_for(snapshot_id)?;
        let snapshot = &self.snapshots[&key];
        let path = Path::new(&key);

        match &snapshot.baseline_content {
            Some(baseline) => write_file(path, baseline)?,
            None => {
                if let Ok(meta) = fs::metadata(path) {
                    let tracked_bytes = snapshot.tracked_bytes();
                    let limit = tracked_bytes
                        .saturating_mul(DELETE_GUARD_FACTOR)
                        .saturating_add(DELETE_GUARD_SLACK_BYTES);
                    if meta.len() > limit {
                        return Err(SnapshotError::UnsafeDelete {
                            path: key.clone(),
                            current_bytes: meta.len(),
                            tracked_bytes,
                        });
                    }
                    fs::remove_file(path)?;
                }
            }
        }

        info!(path = %key, "rolled back file snapshot");
        self.forget(&key);
        Ok(())
    }

    /// Accept a snapshot without touching the file. Unknown ids return `false`.
    pub fn confirm(&mut self, snapshot_id: &str) -> bool {
        match self.key_for(snapshot_id) {
            Ok(key) => {
                self.forget(&key);
                true
            }
            Err(_) => false,
        }
    }

    /// Accept every pending snapshot; returns how many were discarded.
    pub fn confirm_all(&mut self) -> usize {
        let keys: Vec<String> = self.snapshots.keys().cloned().collect();
        for key in &keys {
            self.forget(key);
        }
        keys.len()
    }

    fn key_for(&self, snapshot_id: &str) -> Result<String, SnapshotError> {
        self.get(snapshot_id)
            .map(|s| s.file_path.clone())
            .ok_or_else(|| SnapshotError::NotFound(snapshot_id.to_string()))
    }

    fn forget(&mut self, key: &str) {
        if let Some(snapshot) = self.snapshots.remove(key) {
            if let Err(err) = self.store.remove(&snapshot.id) {
                warn!(id = %snapshot.id, error = %err, "failed to remove snapshot file");
            }
        }
    }

    /// Auto-confirm the oldest-created snapshots beyond the tracked-file cap.
    fn evict_over_limit(&mut self) {
        while self.snapshots.len() > self.max_tracked_files {
            let Some(oldest) = self
                .snapshots
                .values()
                .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
                .map(|s| s.file_path.clone())
            else {
                return;
            };
            info!(path = %oldest, "tracked-file limit reached; auto-confirming oldest snapshot");
            self.forget(&oldest);
        }
    }
}

/// Split file content into lines. Empty content has no lines; a trailing
/// newline yields a final empty line so [`join_lines`] restores it exactly.
pub fn split_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    content.split('\n').map(str::to_string).collect()
}

/// Inverse of [`split_lines`].
pub fn join_lines(lines: &[String]) -> String {
    lines.join("\n")
}

/// Absolute, lexically normalized form of `path` (no symlink resolution).
pub fn normalize_path(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_default()
            .join(path)
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().into_owned()
}

fn snapshot_id_for(normalized_path: &str) -> String {
    let digest = Sha256::digest(normalized_path.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

fn generate_change_id() -> String {
    let mut bytes = [0u8; 6];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn read_lines_if_exists(path: &Path) -> Result<Vec<String>, SnapshotError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(split_lines(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::TestTempDir;

    fn lines(text: &str) -> Vec<String> {
        split_lines(text)
    }

    fn engine(dir: &TestTempDir) -> SnapshotEngine {
        SnapshotEngine::open(dir.child("snapshots"), DEFAULT_MAX_TRACKED_FILES).unwrap()
    }

    /// Write `new` to `path` and record the minimal region that changed.
    fn apply(
        engine: &mut SnapshotEngine,
        path: &Path,
        kind: SnapshotTool,
        new: &str,
    ) -> Option<String> {
        let old = fs::read_to_string(path).unwrap_or_default();
        fs::write(path, new).unwrap();
        let region = ChangeRegion::between(&old, new);
        engine
            .record_change(path, kind, region.old_lines, region.new_lines, region.start_line)
            .unwrap()
    }

    #[test]
    fn split_and_join_round_trip() {
        for text in ["", "a", "a\n", "a\nb\nc", "\n\n"] {
            assert_eq!(join_lines(&split_lines(text)), text);
        }
    }

    #[test]
    fn change_region_trims_common_lines() {
        let region = ChangeRegion::between("a\nb\nc", "a\nB\nc");
        assert_eq!(region.start_line, 1);
        assert_eq!(region.old_lines, lines("b"));
        assert_eq!(region.new_lines, lines("B"));

        let append = ChangeRegion::between("a\nb\nc", "a\nb\nc\nd");
        assert_eq!(append.start_line, 3);
        assert!(append.old_lines.is_empty());
        assert_eq!(append.new_lines, lines("d"));

        assert!(ChangeRegion::between("same", "same").is_noop());
    }

    #[test]
    fn normalize_path_removes_dot_segments() {
        let normalized = normalize_path(Path::new("/tmp/x/../y/./z.txt"));
        assert_eq!(normalized, "/tmp/y/z.txt");
    }

    // Verifies the first edit synthesizes the pre-edit baseline and context.
    #[test]
    fn first_change_synthesizes_baseline() {
        let dir = TestTempDir::new("snap-baseline");
        let file = dir.write_text("f.txt", "1\n2\n3\n4\n5\n6\n7\n8");
        let mut engine = engine(&dir);
        apply(&mut engine, &file, SnapshotTool::Edit, "1\n2\n3\n4\nFIVE\n6\n7\n8");

        let snapshot = engine.find_by_path(&file).unwrap();
        assert_eq!(snapshot.baseline_content.as_deref(), Some("1\n2\n3\n4\n5\n6\n7\n8"));
        let change = &snapshot.changes[0];
        assert_eq!(change.context_before, lines("2\n3\n4"));
        assert_eq!(change.context_after, lines("6\n7\n8"));
        assert_eq!(change.cached_start_line, 4);
        assert_eq!(snapshot.total_lines_added, 1);
        assert_eq!(snapshot.total_lines_removed, 1);
    }

    #[test]
    fn noop_changes_are_not_recorded() {
        let dir = TestTempDir::new("snap-noop");
        let file = dir.write_text("f.txt", "same");
        let mut engine = engine(&dir);
        assert!(apply(&mut engine, &file, SnapshotTool::Overwrite, "same").is_none());
        assert!(engine.is_empty());
    }

    // Verifies full rollback restores the baseline byte for byte.
    #[test]
    fn rollback_snapshot_restores_baseline_exactly() {
        let dir = TestTempDir::new("snap-full");
        let file = dir.write_text("f.txt", "X\r\nwith crlf\n\ttab\n");
        let mut engine = engine(&dir);
        apply(&mut engine, &file, SnapshotTool::Edit, "changed\n");
        apply(&mut engine, &file, SnapshotTool::Edit, "changed again\nmore\n");
        let id = engine.find_by_path(&file).unwrap().id.clone();

        engine.rollback_snapshot(&id).unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"X\r\nwith crlf\n\ttab\n");
        assert!(engine.get(&id).is_none());
    }

    // Verifies single-change rollback equals full-file rollback.
    #[test]
    fn rollback_only_change_matches_full_rollback() {
        let dir = TestTempDir::new("snap-single");
        let file = dir.write_text("f.txt", "keep\nold\nkeep");
        let mut engine = engine(&dir);
        let change_id = apply(&mut engine, &file, SnapshotTool::Edit, "keep\nnew\nkeep").unwrap();
        let id = engine.find_by_path(&file).unwrap().id.clone();

        engine.rollback_change(&id, &change_id).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "keep\nold\nkeep");
        assert!(engine.get(&id).is_none());
    }

    // Verifies undoing the first of two changes keeps the second.
    #[test]
    fn rollback_first_of_two_changes_keeps_second() {
        let dir = TestTempDir::new("snap-partial");
        let file = dir.write_text("f.txt", "a\nb\nc");
        let mut engine = engine(&dir);
        let first = apply(&mut engine, &file, SnapshotTool::Edit, "a\nB\nc").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        apply(&mut engine, &file, SnapshotTool::Edit, "a\nB\nc\nd").unwrap();
        let id = engine.find_by_path(&file).unwrap().id.clone();

        engine.rollback_change(&id, &first).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "a\nb\nc\nd");
        let snapshot = engine.get(&id).unwrap();
        assert_eq!(snapshot.changes.len(), 1);
        assert_eq!(snapshot.total_lines_added, 1);
        assert_eq!(snapshot.total_lines_removed, 0);
    }

    // Verifies created files are deleted on rollback.
    #[test]
    fn created_file_rollback_deletes_it() {
        let dir = TestTempDir::new("snap-create");
        let file = dir.child("new.txt");
        let mut engine = engine(&dir);
        apply(&mut engine, &file, SnapshotTool::Create, "hello\nworld\n");
        let snapshot = engine.find_by_path(&file).unwrap();
        assert_eq!(snapshot.baseline_content, None);
        let id = snapshot.id.clone();

        engine.rollback_snapshot(&id).unwrap();
        assert!(!file.exists());
    }

    // Verifies a created file that grew far past tracked writes is not deleted.
    #[test]
    fn delete_guard_refuses_grown_files() {
        let dir = TestTempDir::new("snap-guard");
        let file = dir.child("new.txt");
        let mut engine = engine(&dir);
        apply(&mut engine, &file, SnapshotTool::Create, "tiny");
        fs::write(&file, "u".repeat(20_000)).unwrap();
        let id = engine.find_by_path(&file).unwrap().id.clone();

        let err = engine.rollback_snapshot(&id).unwrap_err();
        assert!(matches!(err, SnapshotError::UnsafeDelete { .. }));
        assert!(file.exists());
        assert!(engine.get(&id).is_some());
    }

    #[test]
    fn tool_kind_never_leaves_create() {
        let dir = TestTempDir::new("snap-kind");
        let created = dir.child("c.txt");
        let edited = dir.write_text("e.txt", "one");
        let mut engine = engine(&dir);

        apply(&mut engine, &created, SnapshotTool::Create, "v1");
        apply(&mut engine, &created, SnapshotTool::Edit, "v2");
        assert_eq!(engine.find_by_path(&created).unwrap().tool, SnapshotTool::Create);

        apply(&mut engine, &edited, SnapshotTool::Edit, "two");
        apply(&mut engine, &edited, SnapshotTool::Overwrite, "three");
        assert_eq!(engine.find_by_path(&edited).unwrap().tool, SnapshotTool::Overwrite);
    }

    // Verifies confirming twice is a no-op that reports false.
    #[test]
    fn confirm_unknown_or_removed_returns_false() {
        let dir = TestTempDir::new("snap-confirm");
        let file = dir.write_text("f.txt", "a");
        let mut engine = engine(&dir);
        apply(&mut engine, &file, SnapshotTool::Edit, "b");
        let id = engine.find_by_path(&file).unwrap().id.clone();

        assert!(engine.confirm(&id));
        assert!(!engine.confirm(&id));
        assert!(!engine.confirm("missing"));
        assert_eq!(fs::read_to_string(&file).unwrap(), "b");
    }

    // Verifies snapshots persist across engine instances.
    #[test]
    fn snapshots_reload_from_disk() {
        let dir = TestTempDir::new("snap-reload");
        let file = dir.write_text("f.txt", "a");
        {
            let mut engine = engine(&dir);
            apply(&mut engine, &file, SnapshotTool::Edit, "b");
        }
        let reloaded = engine(&dir);
        let snapshot = reloaded.find_by_path(&file).unwrap();
        assert_eq!(snapshot.baseline_content.as_deref(), Some("a"));
    }

    // Verifies the oldest snapshot is auto-confirmed beyond the cap.
    #[test]
    fn oldest_snapshot_is_evicted_over_limit() {
        let dir = TestTempDir::new("snap-evict");
        let mut engine = SnapshotEngine::open(dir.child("snapshots"), 2).unwrap();
        let files: Vec<PathBuf> = (0..3)
            .map(|i| dir.write_text(&format!("f{i}.txt"), "x"))
            .collect();
        for file in &files {
            apply(&mut engine, file, SnapshotTool::Edit, "y");
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(engine.len(), 2);
        assert!(engine.find_by_path(&files[0]).is_none());
        assert!(engine.find_by_path(&files[2]).is_some());
    }

    #[test]
    fn locate_change_tracks_drift() {
        let dir = TestTempDir::new("snap-locate");
        let file = dir.write_text("f.txt", "a\nb\nc\nd");
        let mut engine = engine(&dir);
        let change = apply(&mut engine, &file, SnapshotTool::Edit, "a\nb\nc\nD").unwrap();
        apply(&mut engine, &file, SnapshotTool::Edit, "0\n1\na\nb\nc\nD").unwrap();
        let id = engine.find_by_path(&file).unwrap().id.clone();
        assert_eq!(engine.locate_change(&id, &change).unwrap(), 5);
        assert_eq!(engine.find_change(&id, &change).unwrap(), Some(5));

        fs::write(&file, "rewritten\nentirely").unwrap();
        assert_eq!(engine.find_change(&id, &change).unwrap(), None);
        assert!(matches!(
            engine.find_change(&id, "missing"),
            Err(SnapshotError::NotFound(_))
        ));
    }

    #[test]
    fn deleted_file_snapshot_restores_content() {
        let dir = TestTempDir::new("snap-delete");
        let file = dir.write_text("f.txt", "precious\n");
        let mut engine = engine(&dir);
        fs::remove_file(&file).unwrap();
        engine
            .record_change(&file, SnapshotTool::Delete, lines("precious\n"), Vec::new(), 0)
            .unwrap();
        let id = engine.find_by_path(&file).unwrap().id.clone();
        engine.rollback_snapshot(&id).unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "precious\n");
    }
}
