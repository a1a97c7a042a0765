//! Workspace search tools.
//!
//! - `file_search`: find files by glob pattern (`*`, `?`, `**`, `{a,b}`).
//! - `grep_search`: find lines containing a literal string.
//!
//! Both walk the workspace on a blocking thread with `ignore`, so
//! `.gitignore` rules apply whether or not the workspace is a git repo.

use async_trait::async_trait;
use globset::{GlobBuilder, GlobMatcher};
use ignore::WalkBuilder;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use super::{parse_args, resolve_path, Tool, ToolContext};
use crate::error::ToolError;
use crate::types::ToolDefinition;

const DEFAULT_MAX_RESULTS: usize = 200;
/// Files larger than this are not grepped.
const MAX_GREP_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// Every non-ignored regular file under `dir`, sorted by path.
fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = WalkBuilder::new(dir)
        .hidden(false)
        .git_ignore(true)
        .require_git(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .map(|entry| entry.into_path())
        .collect();
    out.sort();
    out
}

/// Compile a glob where `*` and `?` stop at `/` and `**` crosses directories.
pub fn compile_glob(pattern: &str) -> Result<GlobMatcher, ToolError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| ToolError::InvalidArguments(format!("invalid glob pattern '{pattern}': {e}")))
}

fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn summarize(mut lines: Vec<String>, max: usize, empty: String) -> String {
    if lines.is_empty() {
        return empty;
    }
    let total = lines.len();
    lines.truncate(max);
    let mut out = lines.join("\n");
    if total > max {
        out.push_str(&format!("\n... ({} more not shown)", total - max));
    }
    out
}

// ---------------------------------------------------------------------------
// FileSearch
// ---------------------------------------------------------------------------

/// Tool that finds files by name or path glob.
pub struct FileSearchTool {
    root: PathBuf,
    max_results: usize,
}

impl FileSearchTool {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Deserialize)]
struct FileSearchArgs {
    pattern: String,
    path: Option<String>,
}

#[async_trait]
impl Tool for FileSearchTool {
    fn name(&self) -> &'static str {
        "file_search"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name(),
            "Find files by glob pattern (e.g. '*.rs', 'Cargo.*', 'src/**/*.ts'). Patterns without '/' match file names.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Glob pattern" },
                    "path": { "type": "string", "description": "Directory to search (default: workspace root)" }
                },
                "required": ["pattern"]
            }),
        )
    }

    async fn execute(&self, arguments: &Value, _context: &ToolContext) -> Result<String, ToolError> {
        let args: FileSearchArgs = parse_args(arguments)?;
        let dir = resolve_path(&self.root, args.path.as_deref().unwrap_or("."));
        let root = self.root.clone();
        let matcher = compile_glob(&args.pattern)?;
        let whole_path = args.pattern.contains('/');
        let matches = tokio::task::spawn_blocking(move || {
            walk_files(&dir)
                .into_iter()
                .map(|p| relative_display(&root, &p))
                .filter(|rel| {
                    if whole_path {
                        matcher.is_match(rel)
                    } else {
                        matcher.is_match(rel.rsplit('/').next().unwrap_or(rel))
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("file search task failed: {e}")))?;

        Ok(summarize(
            matches,
            self.max_results,
            format!("No files found matching pattern: '{}'", args.pattern),
        ))
    }
}

// ---------------------------------------------------------------------------
// GrepSearch
// ---------------------------------------------------------------------------

/// Tool that finds lines containing a literal string.
pub struct GrepSearchTool {
    root: PathBuf,
    max_results: usize,
}

impl GrepSearchTool {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Deserialize)]
struct GrepArgs {
    query: String,
    path: Option<String>,
    include: Option<String>,
    #[serde(default)]
    case_sensitive: bool,
}

#[async_trait]
impl Tool for GrepSearchTool {
    fn name(&self) -> &'static str {
        "grep_search"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.name(),
            "Search file contents for a literal string. Returns matches as path:line: text.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Text to search for" },
                    "path": { "type": "string", "description": "Directory or file to search (default: workspace root)" },
                    "include": { "type": "string", "description": "Only search files whose name matches this glob" },
                    "case_sensitive": { "type": "boolean", "description": "Match case exactly (default false)" }
                },
                "required": ["query"]
            }),
        )
    }

    fn validate(&self, arguments: &Value) -> Result<(), ToolError> {
        if arguments["query"].as_str().is_some_and(|q| q.is_empty()) {
            return Err(ToolError::InvalidArguments("query must not be empty".into()));
        }
        Ok(())
    }

    async fn execute(&self, arguments: &Value, _context: &ToolContext) -> Result<String, ToolError> {
        let args: GrepArgs = parse_args(arguments)?;
        let target = resolve_path(&self.root, args.path.as_deref().unwrap_or("."));
        let root = self.root.clone();
        let query = args.query.clone();
        let limit = self.max_results + 1;
        let include = args.include.as_deref().map(compile_glob).transpose()?;
        let matches = tokio::task::spawn_blocking(move || {
            let files = if target.is_file() {
                vec![target]
            } else {
                walk_files(&target)
            };
            let needle = if args.case_sensitive {
                query.clone()
            } else {
                query.to_lowercase()
            };
            let mut hits = Vec::new();
            for file in files {
                let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                if include.as_ref().is_some_and(|glob| !glob.is_match(name)) {
                    continue;
                }
                if fs::metadata(&file).map_or(true, |m| m.len() > MAX_GREP_FILE_BYTES) {
                    continue;
                }
                // Binary and non-UTF-8 files fail here and are skipped.
                let Ok(content) = fs::read_to_string(&file) else {
                    continue;
                };
                for (idx, line) in content.lines().enumerate() {
                    let found = if args.case_sensitive {
                        line.contains(&needle)
                    } else {
                        line.to_lowercase().contains(&needle)
                    };
                    if found {
                        hits.push(format!("{}:{}: {}", relative_display(&root, &file), idx + 1, line.trim_end()));
                        if hits.len() >= limit {
                            return hits;
                        }
                    }
                }
            }
            hits
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("grep task failed: {e}")))?;

        Ok(summarize(
            matches,
            self.max_results,
            format!("No matches for '{}'", args.query),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::TestTempDir;
    use serde_json::json;

    fn fixture() -> TestTempDir {
        let dir = TestTempDir::new("search");
        dir.write_text(".gitignore", "target/\n*.log\n");
        dir.write_text("src/main.rs", "fn main() {\n    println!(\"Hello\");\n}\n");
        dir.write_text("src/util/mod.rs", "pub fn hello() {}\n");
        dir.write_text("README.md", "hello world\n");
        dir.write_text("target/debug/junk.rs", "hello\n");
        dir.write_text("build.log", "hello from the log\n");
        dir.write_text(".git/HEAD", "hello: refs/heads/main\n");
        dir
    }

    #[test]
    fn glob_matching_rules() {
        let matches = |pattern: &str, text: &str| compile_glob(pattern).unwrap().is_match(text);
        assert!(matches("*.rs", "main.rs"));
        assert!(!matches("*.rs", "src/main.rs"));
        assert!(matches("src/**/*.rs", "src/util/mod.rs"));
        assert!(matches("src/**/*.rs", "src/main.rs"));
        assert!(matches("Cargo.???l", "Cargo.toml"));
        assert!(matches("*.{md,txt}", "README.txt"));
        assert!(!matches("*.md", "README.txt"));
    }

    // Verifies stacked `**` segments stay cheap on long non-matching paths.
    #[test]
    fn repeated_double_star_is_not_exponential() {
        let pattern = "**/".repeat(12) + "needle";
        let path = "a/".repeat(40) + "haystack";
        let started = std::time::Instant::now();
        assert!(!compile_glob(&pattern).unwrap().is_match(&path));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[tokio::test]
    async fn invalid_glob_is_an_argument_error() {
        let dir = fixture();
        let tool = FileSearchTool::new(dir.path().to_path_buf());
        let err = tool
            .execute(&json!({"pattern": "src/[unclosed"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn file_search_respects_gitignore() {
        let dir = fixture();
        let tool = FileSearchTool::new(dir.path().to_path_buf());
        let out = tool.execute(&json!({"pattern": "*.rs"}), &ToolContext::default()).await.unwrap();
        assert_eq!(out, "src/main.rs\nsrc/util/mod.rs");

        let none = tool.execute(&json!({"pattern": "*.xyz"}), &ToolContext::default()).await.unwrap();
        assert!(none.contains("No files found"));
    }

    #[tokio::test]
    async fn grep_search_is_case_insensitive_by_default() {
        let dir = fixture();
        let tool = GrepSearchTool::new(dir.path().to_path_buf());
        let out = tool.execute(&json!({"query": "hello"}), &ToolContext::default()).await.unwrap();
        assert_eq!(
            out,
            "README.md:1: hello world\nsrc/main.rs:2:     println!(\"Hello\");\nsrc/util/mod.rs:1: pub fn hello() {}"
        );

        let exact = tool
            .execute(&json!({"query": "Hello", "case_sensitive": true, "include": "*.rs"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(exact, "src/main.rs:2:     println!(\"Hello\");");
    }

    #[test]
    fn summarize_reports_overflow() {
        let lines = (0..5).map(|i| i.to_string()).collect();
        assert_eq!(summarize(lines, 2, String::new()), "0\n1\n... (3 more not shown)");
    }
}
