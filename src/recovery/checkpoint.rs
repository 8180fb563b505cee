//! File snapshots for rollback.
//!
//! Each checkpoint is persisted as `<dir>/<id>.json` and listed in
//! `<dir>/index.json`. History is capped; the oldest checkpoint and its
//! record are evicted first.
//!
//! Rollback is not atomic across files: every file is restored on its own
//! and per-file failures are reported in [`RollbackReport`]. Only paths
//! inside the store's workspace root are snapshotted or restored.

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::collab::confine;
use crate::domain::{Checkpoint, CheckpointSummary};

/// Default number of live checkpoints.
pub const DEFAULT_HISTORY_CAP: usize = 10;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint {0} not found")]
    NotFound(String),
    #[error("checkpoint storage error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint record is corrupt: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Per-file result of a rollback.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    pub checkpoint_id: String,
    pub restored: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub reason: Option<String>,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct State {
    /// Live ids, oldest first
    order: VecDeque<String>,
    records: HashMap<String, Checkpoint>,
}

pub struct CheckpointStore {
    dir: PathBuf,
    /// Canonical workspace root
    root: PathBuf,
    cap: usize,
    state: Mutex<State>,
}

impl CheckpointStore {
    /// Open (or create) a store in `dir` for the workspace at `root`,
    /// reloading the persisted index.
    pub fn open(
        dir: impl Into<PathBuf>,
        root: &Path,
        cap: usize,
    ) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        let root = root.canonicalize().map_err(|source| CheckpointError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        std::fs::create_dir_all(&dir).map_err(|source| CheckpointError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut order = VecDeque::new();
        let index_path = dir.join(INDEX_FILE);
        if index_path.exists() {
            match read_json::<Vec<CheckpointSummary>>(&index_path) {
                Ok(entries) => {
                    for entry in entries {
                        if dir.join(record_name(&entry.id)).exists() {
                            order.push_back(entry.id);
                        } else {
                            warn!("Dropping checkpoint {} with no record on disk", entry.id);
                        }
                    }
                }
                Err(e) => warn!("Ignoring unreadable checkpoint index: {}", e),
            }
        }
        debug!("Opened checkpoint store at {:?} ({} live)", dir, order.len());

        let store = Self {
            dir,
            root,
            cap: cap.max(1),
            state: Mutex::new(State {
                order,
                records: HashMap::new(),
            }),
        };
        {
            let mut state = store.lock();
            store.evict_overflow(&mut state);
        }
        Ok(store)
    }

    /// Snapshot `paths` byte for byte. Unreadable, missing or out-of-workspace
    /// files are skipped.
    pub fn create_checkpoint(
        &self,
        paths: &[PathBuf],
        description: &str,
    ) -> Result<Checkpoint, CheckpointError> {
        let mut files = BTreeMap::new();
        for path in paths {
            let confined = match confine(&self.root, path) {
                Ok(confined) => confined,
                Err(e) => {
                    warn!("Not snapshotting {:?}: {:#}", path, e);
                    continue;
                }
            };
            match std::fs::read(&confined) {
                Ok(bytes) => {
                    files.insert(confined.to_string_lossy().to_string(), bytes);
                }
                Err(e) => debug!("Skipping {:?} in checkpoint: {}", path, e),
            }
        }

        let mut state = self.lock();
        let id = loop {
            let candidate = short_id();
            if !state.order.contains(&candidate) {
                break candidate;
            }
        };

        let checkpoint = Checkpoint {
            id: id.clone(),
            files,
            created_at: Utc::now(),
            description: description.to_string(),
        };

        write_json(&self.dir.join(record_name(&id)), &checkpoint)?;
        state.order.push_back(id.clone());
        state.records.insert(id.clone(), checkpoint.clone());
        self.evict_overflow(&mut state);
        self.save_index(&state)?;

        info!(
            "Created checkpoint {} with {} file(s): {}",
            id,
            checkpoint.files.len(),
            description
        );
        Ok(checkpoint)
    }

    pub fn get(&self, id: &str) -> Result<Checkpoint, CheckpointError> {
        let mut state = self.lock();
        self.load(&mut state, id)
    }

    /// Live checkpoints, oldest first.
    pub fn list_checkpoints(&self) -> Vec<CheckpointSummary> {
        let mut state = self.lock();
        let ids: Vec<String> = state.order.iter().cloned().collect();
        ids.iter()
            .filter_map(|id| self.load(&mut state, id).ok())
            .map(|cp| CheckpointSummary::from(&cp))
            .collect()
    }

    /// Overwrite every snapshotted file with its saved content.
    pub fn rollback_to_checkpoint(&self, id: &str) -> Result<RollbackReport, CheckpointError> {
        let checkpoint = self.get(id)?;
        let mut report = RollbackReport {
            checkpoint_id: id.to_string(),
            restored: Vec::new(),
            failed: Vec::new(),
            reason: None,
        };

        for (path, content) in &checkpoint.files {
            match self.restore_file(path, content) {
                Ok(()) => report.restored.push(path.clone()),
                Err(e) => {
                    warn!("Failed to restore {} from checkpoint {}: {}", path, id, e);
                    report.failed.push((path.clone(), e));
                }
            }
        }

        info!(
            "Rolled back to checkpoint {}: {} restored, {} failed",
            id,
            report.restored.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Rollback triggered by an unrecoverable error.
    pub fn auto_rollback_on_error(
        &self,
        id: &str,
        error_message: &str,
    ) -> Result<RollbackReport, CheckpointError> {
        warn!("Automatic rollback to {} after error: {}", id, error_message);
        let mut report = self.rollback_to_checkpoint(id)?;
        report.reason = Some(error_message.to_string());
        Ok(report)
    }

    fn restore_file(&self, path: &str, content: &[u8]) -> Result<(), String> {
        let target = confine(&self.root, Path::new(path)).map_err(|e| format!("{:#}", e))?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&target, content).map_err(|e| e.to_string())
    }

    fn load(&self, state: &mut State, id: &str) -> Result<Checkpoint, CheckpointError> {
        if !state.order.iter().any(|live| live == id) {
            return Err(CheckpointError::NotFound(id.to_string()));
        }
        if let Some(cp) = state.records.get(id) {
            return Ok(cp.clone());
        }
        let path = self.dir.join(record_name(id));
        if !path.exists() {
            return Err(CheckpointError::NotFound(id.to_string()));
        }
        let cp: Checkpoint = read_json(&path)?;
        state.records.insert(id.to_string(), cp.clone());
        Ok(cp)
    }

    fn evict_overflow(&self, state: &mut State) {
        while state.order.len() > self.cap {
            if let Some(oldest) = state.order.pop_front() {
                state.records.remove(&oldest);
                let path = self.dir.join(record_name(&oldest));
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("Failed to delete evicted checkpoint {:?}: {}", path, e);
                }
                debug!("Evicted checkpoint {}", oldest);
            }
        }
    }

    fn save_index(&self, state: &State) -> Result<(), CheckpointError> {
        // Records not loaded by this process are summarised from disk.
        let entries: Vec<CheckpointSummary> = state
            .order
            .iter()
            .filter_map(|id| match state.records.get(id) {
                Some(cp) => Some(CheckpointSummary::from(cp)),
                None => read_json::<Checkpoint>(&self.dir.join(record_name(id)))
                    .ok()
                    .map(|cp| CheckpointSummary::from(&cp)),
            })
            .collect();
        write_json(&self.dir.join(INDEX_FILE), &entries)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn record_name(id: &str) -> String {
    format!("{}.json", id)
}

fn short_id() -> String {
    format!("cp_{:08x}", rand::thread_rng().gen::<u32>())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CheckpointError> {
    let content = std::fs::read_to_string(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CheckpointError> {
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> CheckpointStore {
        CheckpointStore::open(tmp.path().join("checkpoints"), tmp.path(), DEFAULT_HISTORY_CAP)
            .unwrap()
    }

    #[test]
    fn test_round_trip_restores_content() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let a = root.join("a.html");
        let b = root.join("b.css");
        let missing = root.join("missing.js");
        std::fs::write(&a, "<h1>one</h1>\n").unwrap();
        std::fs::write(&b, "body { margin: 0; }").unwrap();

        let store = store(&tmp);
        let cp = store
            .create_checkpoint(&[a.clone(), b.clone(), missing.clone()], "before edit")
            .unwrap();
        assert_eq!(cp.files.len(), 2);

        std::fs::write(&a, "changed").unwrap();
        std::fs::remove_file(&b).unwrap();

        let report = store.rollback_to_checkpoint(&cp.id).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.restored.len(), 2);
        assert_eq!(std::fs::read_to_string(&a).unwrap(), "<h1>one</h1>\n");
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "body { margin: 0; }");
        assert!(!missing.exists());
    }

    #[test]
    fn test_binary_files_round_trip() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let logo = root.join("logo.png");
        let png = [0x89u8, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0xff, 0x00];
        std::fs::write(&logo, png).unwrap();

        let id = store(&tmp)
            .create_checkpoint(&[logo.clone()], "assets")
            .unwrap()
            .id;
        std::fs::write(&logo, b"clobbered").unwrap();

        // Reopen so the content comes back through the JSON record.
        let report = store(&tmp).rollback_to_checkpoint(&id).unwrap();
        assert_eq!(report.restored.len(), 1);
        assert_eq!(std::fs::read(&logo).unwrap(), png);
    }

    #[test]
    fn test_other_workspace_cannot_restore() {
        let data = TempDir::new().unwrap();
        let ws_a = TempDir::new().unwrap();
        let ws_b = TempDir::new().unwrap();
        let dir = data.path().join("checkpoints");
        let kept = ws_a.path().canonicalize().unwrap().join("keep.html");
        std::fs::write(&kept, "<p>old</p>").unwrap();

        let store_a = CheckpointStore::open(&dir, ws_a.path(), DEFAULT_HISTORY_CAP).unwrap();
        let id = store_a.create_checkpoint(&[kept.clone()], "a").unwrap().id;
        std::fs::write(&kept, "<p>user edit in A</p>").unwrap();

        let store_b = CheckpointStore::open(&dir, ws_b.path(), DEFAULT_HISTORY_CAP).unwrap();
        let report = store_b.rollback_to_checkpoint(&id).unwrap();
        assert!(report.restored.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_complete());
        assert_eq!(std::fs::read_to_string(&kept).unwrap(), "<p>user edit in A</p>");

        let outside = store_b.create_checkpoint(&[kept.clone()], "b").unwrap();
        assert!(outside.files.is_empty());
    }

    #[test]
    fn test_history_evicts_oldest() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().canonicalize().unwrap().join("f.txt");
        std::fs::write(&file, "x").unwrap();
        let store = store(&tmp);

        let ids: Vec<String> = (0..11)
            .map(|i| {
                store
                    .create_checkpoint(&[file.clone()], &format!("cp {}", i))
                    .unwrap()
                    .id
            })
            .collect();

        let listed: Vec<String> = store.list_checkpoints().into_iter().map(|c| c.id).collect();
        assert_eq!(listed.len(), 10);
        assert!(!listed.contains(&ids[0]));
        assert_eq!(listed, ids[1..].to_vec());
        assert!(matches!(
            store.rollback_to_checkpoint(&ids[0]),
            Err(CheckpointError::NotFound(_))
        ));
        assert!(!tmp
            .path()
            .join("checkpoints")
            .join(record_name(&ids[0]))
            .exists());
    }

    #[test]
    fn test_index_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().canonicalize().unwrap().join("f.txt");
        std::fs::write(&file, "original").unwrap();

        let id = store(&tmp)
            .create_checkpoint(&[file.clone()], "persisted")
            .unwrap()
            .id;
        std::fs::write(&file, "modified").unwrap();

        let reopened = store(&tmp);
        let listed = reopened.list_checkpoints();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].description, "persisted");

        let report = reopened.auto_rollback_on_error(&id, "write failed").unwrap();
        assert_eq!(report.reason.as_deref(), Some("write failed"));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "original");
    }

    #[test]
    fn test_unknown_checkpoint() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            store(&tmp).get("cp_nope"),
            Err(CheckpointError::NotFound(_))
        ));
    }
}
