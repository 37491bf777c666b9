//! Run state storage: in-memory table plus durable JSON snapshots.
//!
//! Each run is persisted wholesale to `<battles_dir>/<run_id>.json` after
//! every state change; the file is the source of truth once the owning
//! runner task has finished. Mutation goes through [`RunStore::update`],
//! which holds the table lock across mutate-then-persist so external
//! readers never observe a half-applied step.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::domain::{Result, RunState, SkirmishError};

/// Keyed table of run state with one snapshot file per run.
pub struct RunStore {
    battles_dir: PathBuf,
    states: Mutex<HashMap<String, RunState>>,
    active: Mutex<HashSet<String>>,
}

impl RunStore {
    /// Open a store rooted at `battles_dir`, creating the directory.
    pub fn new(battles_dir: impl Into<PathBuf>) -> Result<Self> {
        let battles_dir = battles_dir.into();
        std::fs::create_dir_all(&battles_dir)?;
        Ok(Self {
            battles_dir,
            states: Mutex::new(HashMap::new()),
            active: Mutex::new(HashSet::new()),
        })
    }

    /// Directory holding the snapshot files.
    pub fn battles_dir(&self) -> &Path {
        &self.battles_dir
    }

    /// Insert a fresh run and persist its initial snapshot.
    ///
    /// Rejects a run_id that already has an active runner task or an
    /// in-memory entry; only one runner may ever own a run_id.
    pub fn create(&self, state: RunState) -> Result<()> {
        let run_id = state.run_id.clone();
        {
            let mut states = self.states.lock().unwrap();
            if states.contains_key(&run_id) || self.is_active(&run_id) {
                return Err(SkirmishError::Validation(format!(
                    "run_id {run_id} already exists"
                )));
            }
            states.insert(run_id.clone(), state);
        }
        self.save(&run_id);
        Ok(())
    }

    /// Mutate a run's in-memory state and persist, as one atomic step.
    pub fn update<F>(&self, run_id: &str, mutate: F) -> Result<RunState>
    where
        F: FnOnce(&mut RunState),
    {
        use std::collections::hash_map::Entry;

        let mut states = self.states.lock().unwrap();
        let state = match states.entry(run_id.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                // Fall back to the disk snapshot (e.g. stop request after
                // a process restart) and adopt it into the table.
                let loaded = self
                    .load_snapshot(run_id)?
                    .ok_or_else(|| SkirmishError::RunNotFound(run_id.to_string()))?;
                entry.insert(loaded)
            }
        };
        mutate(state);
        let snapshot = state.clone();
        self.write_snapshot(&snapshot);
        Ok(snapshot)
    }

    /// Persist the current in-memory state of `run_id`. Best-effort: a
    /// missing entry or a write failure is logged, not propagated.
    pub fn save(&self, run_id: &str) {
        let states = self.states.lock().unwrap();
        match states.get(run_id) {
            Some(state) => self.write_snapshot(state),
            None => warn!(event = "store.save_missing_state", run_id = %run_id),
        }
    }

    /// Best-known state: live in-memory entry, else the disk snapshot.
    pub fn state(&self, run_id: &str) -> Result<RunState> {
        if let Some(state) = self.states.lock().unwrap().get(run_id) {
            return Ok(state.clone());
        }
        self.load_snapshot(run_id)?
            .ok_or_else(|| SkirmishError::RunNotFound(run_id.to_string()))
    }

    /// Read the persisted snapshot only. `Ok(None)` when the file is
    /// absent, meaning an unknown run to readers.
    pub fn load_snapshot(&self, run_id: &str) -> Result<Option<RunState>> {
        let path = self.snapshot_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Run ids with a persisted snapshot, in directory order.
    pub fn list_runs(&self) -> Result<Vec<String>> {
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&self.battles_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    runs.push(stem.to_string());
                }
            }
        }
        runs.sort();
        Ok(runs)
    }

    /// Drop a run from the in-memory table (snapshot stays on disk).
    pub fn evict(&self, run_id: &str) {
        self.states.lock().unwrap().remove(run_id);
    }

    /// Claim the single active-runner slot for `run_id`.
    pub fn mark_active(&self, run_id: &str) -> Result<()> {
        let mut active = self.active.lock().unwrap();
        if !active.insert(run_id.to_string()) {
            return Err(SkirmishError::Validation(format!(
                "run_id {run_id} already has an active runner"
            )));
        }
        Ok(())
    }

    /// Release the active-runner slot.
    pub fn mark_inactive(&self, run_id: &str) {
        self.active.lock().unwrap().remove(run_id);
    }

    /// Whether a runner task currently owns this run.
    pub fn is_active(&self, run_id: &str) -> bool {
        self.active.lock().unwrap().contains(run_id)
    }

    fn snapshot_path(&self, run_id: &str) -> PathBuf {
        self.battles_dir.join(format!("{run_id}.json"))
    }

    fn write_snapshot(&self, state: &RunState) {
        let path = self.snapshot_path(&state.run_id);
        match serde_json::to_vec_pretty(state) {
            Ok(json) => {
                if let Err(err) = std::fs::write(&path, json) {
                    warn!(event = "store.save_failed", run_id = %state.run_id, error = %err);
                } else {
                    debug!(event = "store.saved", run_id = %state.run_id, path = %path.display());
                }
            }
            Err(err) => {
                warn!(event = "store.serialize_failed", run_id = %state.run_id, error = %err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunStatus;

    fn store() -> (tempfile::TempDir, RunStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = RunStore::new(dir.path().join("battles")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_persists_and_rejects_duplicates() {
        let (_dir, store) = store();
        store.create(RunState::new("r1")).unwrap();
        assert!(store.battles_dir().join("r1.json").exists());
        assert!(matches!(
            store.create(RunState::new("r1")),
            Err(SkirmishError::Validation(_))
        ));
    }

    #[test]
    fn test_state_falls_back_to_snapshot() {
        let (_dir, store) = store();
        store.create(RunState::new("r1")).unwrap();
        store.evict("r1");
        let state = store.state("r1").unwrap();
        assert_eq!(state.run_id, "r1");
        assert_eq!(state.status, RunStatus::Queued);
    }

    #[test]
    fn test_unknown_run_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(
            store.state("ghost"),
            Err(SkirmishError::RunNotFound(_))
        ));
        assert!(store.load_snapshot("ghost").unwrap().is_none());
    }

    #[test]
    fn test_update_mutates_and_persists() {
        let (_dir, store) = store();
        store.create(RunState::new("r1")).unwrap();
        store
            .update("r1", |state| {
                state.status = RunStatus::Running;
                state.stop_requested = true;
            })
            .unwrap();

        store.evict("r1");
        let reloaded = store.state("r1").unwrap();
        assert_eq!(reloaded.status, RunStatus::Running);
        assert!(reloaded.stop_requested);
    }

    #[test]
    fn test_update_adopts_disk_snapshot() {
        let (_dir, store) = store();
        store.create(RunState::new("r1")).unwrap();
        store.evict("r1");
        let updated = store.update("r1", |state| state.stop_requested = true).unwrap();
        assert!(updated.stop_requested);
    }

    #[test]
    fn test_list_runs() {
        let (_dir, store) = store();
        store.create(RunState::new("b")).unwrap();
        store.create(RunState::new("a")).unwrap();
        assert_eq!(store.list_runs().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_active_slot_is_exclusive() {
        let (_dir, store) = store();
        store.mark_active("r1").unwrap();
        assert!(store.is_active("r1"));
        assert!(store.mark_active("r1").is_err());
        store.mark_inactive("r1");
        assert!(!store.is_active("r1"));
        store.mark_active("r1").unwrap();
    }
}
