//! Persistent conversation sessions stored under `.mender/` by default.
//!
//! Each session is one JSON file holding the message history and token
//! tracker state, plus a small sidecar with cumulative request metrics. The
//! store backs the agent's [`ConversationStore`] collaborator and the CLI's
//! `--session` flag.

use crate::agent::{AgentSessionSnapshot, ConversationStore, SessionMetrics};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Subdirectory under the root that contains per-session files.
const SESSIONS_DIR: &str = "sessions";
const SESSION_FILE_EXT: &str = "json";
const METRICS_FILE_EXT: &str = "metrics";
/// On-disk schema version for [`PersistedSession`].
const SESSION_FILE_VERSION: u32 = 1;
const DEFAULT_SESSION_ROOT: &str = ".mender";

/// Listing metadata for one stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    /// Last save timestamp in Unix epoch milliseconds.
    pub updated_at_millis: u64,
    pub message_count: usize,
}

/// Filesystem-backed storage for agent sessions.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    version: u32,
    #[serde(alias = "name")]
    id: String,
    updated_at_millis: u64,
    state: AgentSessionSnapshot,
}

impl SessionStore {
    /// Open/create `.mender/sessions` in the working directory.
    pub fn open_default() -> Result<Self, String> {
        Self::open(DEFAULT_SESSION_ROOT)
    }

    /// Open/create a session store rooted under the given directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, String> {
        let sessions_dir = root.as_ref().join(SESSIONS_DIR);
        fs::create_dir_all(&sessions_dir).map_err(|e| {
            format!(
                "failed to create session directory {}: {e}",
                sessions_dir.display()
            )
        })?;
        Ok(Self { sessions_dir })
    }

    /// Save snapshot state under a stable session ID.
    pub fn save(&self, session_id: &str, state: &AgentSessionSnapshot) -> Result<(), String> {
        validate_session_id(session_id)?;
        let payload = PersistedSession {
            version: SESSION_FILE_VERSION,
            id: session_id.to_string(),
            updated_at_millis: now_unix_millis(),
            state: state.clone(),
        };
        let json = serde_json::to_vec_pretty(&payload)
            .map_err(|e| format!("failed to serialize session {session_id}: {e}"))?;
        write_atomic(&self.path_for(session_id, SESSION_FILE_EXT), &json)
    }

    /// Load a saved session. `Ok(None)` when no such session exists.
    pub fn load(&self, session_id: &str) -> Result<Option<AgentSessionSnapshot>, String> {
        validate_session_id(session_id)?;
        let path = self.path_for(session_id, SESSION_FILE_EXT);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| format!("failed to read session {}: {e}", path.display()))?;
        let payload: PersistedSession = serde_json::from_str(&raw)
            .map_err(|e| format!("failed to parse session {}: {e}", path.display()))?;
        if payload.version != SESSION_FILE_VERSION {
            return Err(format!(
                "unsupported session file version {} for {}",
                payload.version,
                path.display()
            ));
        }
        Ok(Some(payload.state))
    }

    /// Cumulative metrics for a session, zero when none were recorded.
    pub fn metrics(&self, session_id: &str) -> Result<SessionMetrics, String> {
        validate_session_id(session_id)?;
        let path = self.path_for(session_id, METRICS_FILE_EXT);
        match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| format!("failed to parse metrics {}: {e}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionMetrics::default()),
            Err(e) => Err(format!("failed to read metrics {}: {e}", path.display())),
        }
    }

    /// All sessions, most recently updated first.
    ///
    /// Unreadable or malformed files are skipped.
    pub fn list(&self) -> Result<Vec<SessionSummary>, String> {
        let mut sessions = Vec::new();
        for entry in
            fs::read_dir(&self.sessions_dir).map_err(|e| format!("failed to list sessions: {e}"))?
        {
            let entry = entry.map_err(|e| format!("failed to read session entry: {e}"))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SESSION_FILE_EXT) {
                continue;
            }
            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(payload) = serde_json::from_str::<PersistedSession>(&raw) else {
                continue;
            };
            sessions.push(SessionSummary {
                id: payload.id,
                updated_at_millis: payload.updated_at_millis,
                message_count: payload.state.messages.len(),
            });
        }

        sessions.sort_by(|a, b| {
            b.updated_at_millis
                .cmp(&a.updated_at_millis)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(sessions)
    }

    /// Resolve `"last"` to the most recently used session.
    pub fn resolve_last(&self) -> Result<Option<String>, String> {
        Ok(self.list()?.into_iter().next().map(|s| s.id))
    }

    /// Turn a `--session` argument into a concrete id. `last` picks the
    /// most recent session, or a fresh id when there is none.
    pub fn resolve(&self, requested: &str) -> Result<String, String> {
        if requested == "last" {
            return Ok(self.resolve_last()?.unwrap_or_else(generate_session_id));
        }
        validate_session_id(requested)?;
        Ok(requested.to_string())
    }

    fn path_for(&self, session_id: &str, ext: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.{ext}"))
    }
}

impl ConversationStore for SessionStore {
    fn save_conversation(&self, session_id: &str, snapshot: &AgentSessionSnapshot) -> Result<(), String> {
        self.save(session_id, snapshot)
    }

    fn load_conversation(&self, session_id: &str) -> Result<Option<AgentSessionSnapshot>, String> {
        self.load(session_id)
    }

    fn record_metrics(&self, session_id: &str, metrics: &SessionMetrics) -> Result<(), String> {
        validate_session_id(session_id)?;
        let json = serde_json::to_vec_pretty(metrics)
            .map_err(|e| format!("failed to serialize metrics for {session_id}: {e}"))?;
        write_atomic(&self.path_for(session_id, METRICS_FILE_EXT), &json)
    }
}

/// Write to a sibling temp file, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, bytes)
        .map_err(|e| format!("failed to write temporary file {}: {e}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| format!("failed to move {} into place: {e}", path.display()))
}

/// Validate user-provided session IDs before touching the filesystem.
fn validate_session_id(session_id: &str) -> Result<(), String> {
    let trimmed = session_id.trim();
    if trimmed.is_empty() {
        return Err("session id cannot be empty".to_string());
    }
    if trimmed == "." || trimmed == ".." {
        return Err("session id cannot be '.' or '..'".to_string());
    }
    if trimmed
        .chars()
        .any(|ch| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.'))
    {
        return Err(
            "session id can only contain ASCII letters, numbers, '.', '-', '_'".to_string(),
        );
    }
    Ok(())
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate an opaque hex session id (`xxxx-xxxx-xxxx-xxxx`).
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    let hex = format!("{:016x}", u64::from_be_bytes(bytes));
    format!(
        "{}-{}-{}-{}",
        &hex[0..4],
        &hex[4..8],
        &hex[8..12],
        &hex[12..16]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::TestTempDir;
    use crate::tokens::TokenTracker;
    use crate::types::Message;
    use std::time::Duration;

    fn test_snapshot() -> AgentSessionSnapshot {
        let mut tracker = TokenTracker::new(8192);
        tracker.total_prompt_tokens = 12;
        tracker.last_completion_tokens = 34;
        AgentSessionSnapshot {
            messages: vec![Message::user("hello")],
            tracker,
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TestTempDir::new("session-roundtrip");
        let store = SessionStore::open(dir.path()).unwrap();
        store.save("demo", &test_snapshot()).unwrap();
        let loaded = store.load("demo").unwrap().unwrap();
        assert_eq!(loaded, test_snapshot());
        assert!(store.load("absent").unwrap().is_none());
        assert!(!dir.child("sessions/demo.json.tmp").exists());
    }

    // Verifies listing prefers recent sessions and ignores metrics sidecars.
    #[test]
    fn list_orders_by_last_update() {
        let dir = TestTempDir::new("session-list");
        let store = SessionStore::open(dir.path()).unwrap();
        store.save("a", &test_snapshot()).unwrap();
        std::thread::sleep(Duration::from_millis(15));
        store.save("b", &test_snapshot()).unwrap();
        store.record_metrics("b", &SessionMetrics::default()).unwrap();
        dir.write_text("sessions/garbage.json", "{not json");

        let sessions = store.list().unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "b");
        assert_eq!(sessions[0].message_count, 1);
        assert_eq!(store.resolve_last().unwrap().as_deref(), Some("b"));
        assert_eq!(store.resolve("last").unwrap(), "b");
        assert_eq!(store.resolve("named").unwrap(), "named");
    }

    #[test]
    fn metrics_are_stored_alongside_the_session() {
        let dir = TestTempDir::new("session-metrics");
        let store = SessionStore::open(dir.path()).unwrap();
        assert_eq!(store.metrics("m").unwrap(), SessionMetrics::default());
        let metrics = SessionMetrics {
            requests: 3,
            prompt_tokens: 100,
            completion_tokens: 20,
            cached_tokens: 40,
        };
        store.record_metrics("m", &metrics).unwrap();
        assert_eq!(store.metrics("m").unwrap(), metrics);
    }

    #[test]
    fn invalid_session_id_is_rejected() {
        let dir = TestTempDir::new("session-invalid");
        let store = SessionStore::open(dir.path()).unwrap();
        let err = store.save("bad/name", &test_snapshot()).unwrap_err();
        assert!(err.contains("session id"));
        assert!(store.resolve("..").is_err());
    }

    #[test]
    fn generate_session_id_is_hex_groups() {
        let id = generate_session_id();
        let parts = id.split('-').collect::<Vec<_>>();
        assert_eq!(parts.len(), 4);
        assert!(parts.iter().all(|part| part.len() == 4));
        assert!(parts
            .iter()
            .all(|part| part.chars().all(|ch| ch.is_ascii_hexdigit())));
        assert_ne!(id, generate_session_id());
    }
}
