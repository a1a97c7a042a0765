//! On-disk persistence for pending snapshots: one pretty JSON file per
//! [`FileSnapshot`], named `<id>.json`.

use super::FileSnapshot;
use crate::error::SnapshotError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const SNAPSHOT_FILE_EXT: &str = "json";

/// Directory of snapshot files.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open/create a snapshot directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one snapshot through a sibling temp file and rename.
    pub fn save(&self, snapshot: &FileSnapshot) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let path = self.path_for(&snapshot.id);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Remove a snapshot file. Missing files are not an error.
    pub fn remove(&self, id: &str) -> Result<(), SnapshotError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load every readable snapshot. Unparseable files are skipped.
    pub fn load_all(&self) -> Result<Vec<FileSnapshot>, SnapshotError> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_FILE_EXT) {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(SnapshotError::from)
                .and_then(|raw| serde_json::from_str::<FileSnapshot>(&raw).map_err(Into::into));
            match parsed {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable snapshot"),
            }
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(snapshots)
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{SNAPSHOT_FILE_EXT}"))
    }
}
