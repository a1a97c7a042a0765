//! File tools.
//!
//! - `read_file`: reads a file, optionally a line window of it.
//! - `list_directory`: lists one directory level.
//! - `create_file`: writes a whole file, creating parents as needed.
//! - `edit_file`: replaces an exact snippet inside a file.
//! - `delete_file`: removes a file.
//!
//! Every mutating tool reports the changed region to the snapshot engine
//! after the write succeeds. Snapshot failures are logged and never fail the
//! edit itself.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

use super::{parse_args, resolve_path, Tool, ToolContext};
use crate::error::ToolError;
use crate::snapshot::{split_lines, ChangeRegion, SharedSnapshots, SnapshotTool};
use crate::types::ToolDefinition;

/// Report a completed mutation to the snapshot engine, best-effort.
fn record_mutation(
    snapshots: &Option<SharedSnapshots>,
    path: &Path,
    kind: SnapshotTool,
    old_content: &str,
    new_content: &str,
) {
    let Some(snapshots) = snapshots else {
        return;
    };
    let region = ChangeRegion::between(old_content, new_content);
    if region.is_noop() {
        return;
    }
    let mut engine = match snapshots.lock() {
        Ok(engine) => engine,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Err(err) = engine.record_change(
        path,
        kind,
        region.old_lines,
        region.new_lines,
        region.start_line,
    ) {
        warn!(path = %path.display(), error = %err, "failed to record snapshot change");
    }
}

async fn read_existing(path: &Path) -> Result<Option<String>, ToolError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ToolError::ExecutionFailed(format!(
            "cannot read {}: {e}",
            path.display()
        ))),
    }
}

// ---------------------------------------------------------------------------
// ReadFile
// ---------------------------------------------------------------------------

/// Tool that reads the contents of a file.
pub struct ReadFileTool {
    pub root: PathBuf,
}

#[derive(Deserialize)]
struct ReadArgs {
    path: String,
    /// 1-based first line to return.
    offset: Option<usize>,
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name(),
            "Read the contents of a file. Use offset/limit to read a window of lines from a large file.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file to read" },
                    "offset": { "type": "integer", "description": "1-based line to start from" },
                    "limit": { "type": "integer", "description": "Maximum number of lines to return" }
                },
                "required": ["path"]
            }),
        )
    }

    async fn execute(&self, arguments: &Value, _context: &ToolContext) -> Result<String, ToolError> {
        let args: ReadArgs = parse_args(arguments)?;
        let path = resolve_path(&self.root, &args.path);
        let content = read_existing(&path)
            .await?
            .ok_or_else(|| ToolError::ExecutionFailed(format!("file not found: {}", args.path)))?;

        if args.offset.is_none() && args.limit.is_none() {
            return Ok(content);
        }
        let lines = split_lines(&content);
        let start = args.offset.unwrap_or(1).max(1) - 1;
        if start >= lines.len() && !lines.is_empty() {
            return Err(ToolError::InvalidArguments(format!(
                "offset {} is past the end of the file ({} lines)",
                start + 1,
                lines.len()
            )));
        }
        let end = args
            .limit
            .map_or(lines.len(), |limit| (start + limit).min(lines.len()));
        Ok(lines[start.min(end)..end].join("\n"))
    }
}

// ---------------------------------------------------------------------------
// ListDirectory
// ---------------------------------------------------------------------------

/// Tool that lists one directory level; directories end with `/`.
pub struct ListDirectoryTool {
    pub root: PathBuf,
}

#[derive(Deserialize)]
struct ListArgs {
    path: Option<String>,
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &'static str {
        "list_directory"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name(),
            "List the entries of a directory (non-recursive). Directories are suffixed with '/'.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory to list (default: workspace root)" }
                }
            }),
        )
    }

    async fn execute(&self, arguments: &Value, _context: &ToolContext) -> Result<String, ToolError> {
        let args: ListArgs = parse_args(arguments)?;
        let dir = resolve_path(&self.root, args.path.as_deref().unwrap_or("."));
        let mut reader = fs::read_dir(&dir).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("cannot list {}: {e}", dir.display()))
        })?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            entries.push(name);
        }
        if entries.is_empty() {
            return Ok("(empty directory)".into());
        }
        entries.sort();
        Ok(entries.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// CreateFile
// ---------------------------------------------------------------------------

/// Tool that writes a whole file, replacing any existing content.
pub struct CreateFileTool {
    pub root: PathBuf,
    pub snapshots: Option<SharedSnapshots>,
}

#[derive(Deserialize)]
struct CreateArgs {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &'static str {
        "create_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name(),
            "Write content to a file. Creates the file (and parent directories) if needed, overwrites it otherwise.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to the file to write" },
                    "content": { "type": "string", "description": "Full file content" }
                },
                "required": ["path", "content"]
            }),
        )
    }

    async fn execute(&self, arguments: &Value, _context: &ToolContext) -> Result<String, ToolError> {
        let args: CreateArgs = parse_args(arguments)?;
        let path = resolve_path(&self.root, &args.path);
        let previous = read_existing(&path).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &args.content).await?;

        let (kind, verb) = match previous {
            Some(_) => (SnapshotTool::Overwrite, "Overwrote"),
            None => (SnapshotTool::Create, "Created"),
        };
        record_mutation(
            &self.snapshots,
            &path,
            kind,
            previous.as_deref().unwrap_or_default(),
            &args.content,
        );
        Ok(format!(
            "{verb} {} ({} lines, {} bytes)",
            args.path,
            split_lines(&args.content).len(),
            args.content.len()
        ))
    }
}

// ---------------------------------------------------------------------------
// EditFile
// ---------------------------------------------------------------------------

/// Tool that replaces an exact snippet of an existing file.
pub struct EditFileTool {
    pub root: PathBuf,
    pub snapshots: Option<SharedSnapshots>,
}

#[derive(Deserialize)]
struct EditArgs {
    path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &'static str {
        "edit_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name(),
            "Replace an exact snippet in a file. old_string must match exactly once unless replace_all is true; include surrounding lines to make it unique.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File to edit" },
                    "old_string": { "type": "string", "description": "Exact text to replace" },
                    "new_string": { "type": "string", "description": "Replacement text" },
                    "replace_all": { "type": "boolean", "description": "Replace every occurrence" }
                },
                "required": ["path", "old_string", "new_string"]
            }),
        )
    }

    fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        if arguments["old_string"].as_str().is_some_and(str::is_empty) {
            return Err(ToolError::InvalidArguments(
                "old_string must not be empty; use create_file to write a new file".into(),
            ));
        }
        if arguments["old_string"] == arguments["new_string"] {
            return Err(ToolError::InvalidArguments(
                "old_string and new_string are identical".into(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, arguments: &Value, _context: &ToolContext) -> Result<String, ToolError> {
        let args: EditArgs = parse_args(arguments)?;
        let path = resolve_path(&self.root, &args.path);
        let original = read_existing(&path)
            .await?
            .ok_or_else(|| ToolError::ExecutionFailed(format!("file not found: {}", args.path)))?;

        let occurrences = original.matches(args.old_string.as_str()).count();
        let updated = match occurrences {
            0 => {
                return Err(ToolError::ExecutionFailed(format!(
                    "old_string not found in {}",
                    args.path
                )))
            }
            1 => original.replacen(&args.old_string, &args.new_string, 1),
            _ if args.replace_all => original.replace(&args.old_string, &args.new_string),
            n => {
                return Err(ToolError::ExecutionFailed(format!(
                    "old_string matches {n} times in {}; add surrounding context or set replace_all",
                    args.path
                )))
            }
        };

        fs::write(&path, &updated).await?;
        record_mutation(&self.snapshots, &path, SnapshotTool::Edit, &original, &updated);
        Ok(format!(
            "Edited {} ({occurrences} replacement{})",
            args.path,
            if occurrences == 1 { "" } else { "s" }
        ))
    }
}

// ---------------------------------------------------------------------------
// DeleteFile
// ---------------------------------------------------------------------------

/// Tool that deletes a file. The snapshot keeps its content for rollback.
pub struct DeleteFileTool {
    pub root: PathBuf,
    pub snapshots: Option<SharedSnapshots>,
}

#[derive(Deserialize)]
struct DeleteArgs {
    path: String,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &'static str {
        "delete_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name(),
            "Delete a file.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File to delete" }
                },
                "required": ["path"]
            }),
        )
    }

    async fn execute(&self, arguments: &Value, _context: &ToolContext) -> Result<String, ToolError> {
        let args: DeleteArgs = parse_args(arguments)?;
        let path = resolve_path(&self.root, &args.path);
        if fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            return Err(ToolError::InvalidArguments(format!(
                "{} is a directory",
                args.path
            )));
        }
        let content = read_existing(&path)
            .await?
            .ok_or_else(|| ToolError::ExecutionFailed(format!("file not found: {}", args.path)))?;
        fs::remove_file(&path).await?;
        record_mutation(&self.snapshots, &path, SnapshotTool::Delete, &content, "");
        Ok(format!("Deleted {}", args.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotEngine;
    use crate::testsupport::TestTempDir;
    use serde_json::json;

    fn snapshots(dir: &TestTempDir) -> SharedSnapshots {
        SnapshotEngine::open(dir.child(".snapshots"), 50)
            .unwrap()
            .into_shared()
    }

    #[tokio::test]
    async fn read_file_returns_content_and_windows() {
        let dir = TestTempDir::new("read");
        dir.write_text("a.txt", "one\ntwo\nthree\nfour");
        let tool = ReadFileTool { root: dir.path().to_path_buf() };
        let ctx = ToolContext::default();

        let all = tool.execute(&json!({"path": "a.txt"}), &ctx).await.unwrap();
        assert_eq!(all, "one\ntwo\nthree\nfour");

        let window = tool
            .execute(&json!({"path": "a.txt", "offset": 2, "limit": 2}), &ctx)
            .await
            .unwrap();
        assert_eq!(window, "two\nthree");

        let err = tool.execute(&json!({"path": "missing.txt"}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("file not found"));
    }

    #[tokio::test]
    async fn list_directory_marks_directories() {
        let dir = TestTempDir::new("list");
        dir.write_text("b.txt", "");
        dir.write_text("sub/c.txt", "");
        let tool = ListDirectoryTool { root: dir.path().to_path_buf() };
        let out = tool.execute(&json!({}), &ToolContext::default()).await.unwrap();
        assert_eq!(out, "b.txt\nsub/");
    }

    // Verifies create_file records a create snapshot with no baseline.
    #[tokio::test]
    async fn create_file_records_create_snapshot() {
        let dir = TestTempDir::new("create");
        let snaps = snapshots(&dir);
        let tool = CreateFileTool {
            root: dir.path().to_path_buf(),
            snapshots: Some(snaps.clone()),
        };
        let out = tool
            .execute(&json!({"path": "new/x.rs", "content": "fn x() {}\n"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(out.starts_with("Created new/x.rs"));
        assert_eq!(dir.read_text("new/x.rs"), "fn x() {}\n");

        let engine = snaps.lock().unwrap();
        let snapshot = engine.find_by_path(&dir.child("new/x.rs")).unwrap();
        assert_eq!(snapshot.tool, SnapshotTool::Create);
        assert_eq!(snapshot.baseline_content, None);
    }

    #[tokio::test]
    async fn edit_file_requires_unique_match() {
        let dir = TestTempDir::new("edit");
        dir.write_text("a.txt", "x = 1\ny = 1\n");
        let tool = EditFileTool { root: dir.path().to_path_buf(), snapshots: None };
        let ctx = ToolContext::default();

        let err = tool
            .execute(&json!({"path": "a.txt", "old_string": "1", "new_string": "2"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("matches 2 times"));

        tool.execute(
            &json!({"path": "a.txt", "old_string": "1", "new_string": "2", "replace_all": true}),
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(dir.read_text("a.txt"), "x = 2\ny = 2\n");

        let missing = tool
            .execute(&json!({"path": "a.txt", "old_string": "zzz", "new_string": "q"}), &ctx)
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("not found"));
    }

    #[test]
    fn edit_file_rejects_empty_or_identical_strings() {
        let tool = EditFileTool { root: PathBuf::from("."), snapshots: None };
        assert!(tool
            .validate(&json!({"path": "a", "old_string": "", "new_string": "x"}))
            .is_err());
        assert!(tool
            .validate(&json!({"path": "a", "old_string": "x", "new_string": "x"}))
            .is_err());
        assert!(tool
            .validate(&json!({"path": "a", "old_string": "x", "new_string": "y"}))
            .is_ok());
    }

    // Verifies an edit can be undone through the snapshot it recorded.
    #[tokio::test]
    async fn edit_then_rollback_restores_original() {
        let dir = TestTempDir::new("edit-undo");
        dir.write_text("a.txt", "alpha\nbeta\ngamma\n");
        let snaps = snapshots(&dir);
        let tool = EditFileTool {
            root: dir.path().to_path_buf(),
            snapshots: Some(snaps.clone()),
        };
        tool.execute(
            &json!({"path": "a.txt", "old_string": "beta", "new_string": "BETA\nDELTA"}),
            &ToolContext::default(),
        )
        .await
        .unwrap();

        let mut engine = snaps.lock().unwrap();
        let snapshot = engine.find_by_path(&dir.child("a.txt")).unwrap();
        assert_eq!(snapshot.total_lines_added, 2);
        assert_eq!(snapshot.total_lines_removed, 1);
        let id = snapshot.id.clone();
        engine.rollback_snapshot(&id).unwrap();
        drop(engine);
        assert_eq!(dir.read_text("a.txt"), "alpha\nbeta\ngamma\n");
    }

    #[tokio::test]
    async fn delete_file_keeps_content_for_rollback() {
        let dir = TestTempDir::new("delete");
        dir.write_text("gone.txt", "keep me\n");
        let snaps = snapshots(&dir);
        let tool = DeleteFileTool {
            root: dir.path().to_path_buf(),
            snapshots: Some(snaps.clone()),
        };
        tool.execute(&json!({"path": "gone.txt"}), &ToolContext::default())
            .await
            .unwrap();
        assert!(!dir.child("gone.txt").exists());

        let mut engine = snaps.lock().unwrap();
        let id = engine.find_by_path(&dir.child("gone.txt")).unwrap().id.clone();
        engine.rollback_snapshot(&id).unwrap();
        drop(engine);
        assert_eq!(dir.read_text("gone.txt"), "keep me\n");
    }
}
