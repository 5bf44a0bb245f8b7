//! Durable storage for run records.
//!
//! # Layout
//!
//! One pretty-printed JSON file per run under the runs directory
//! (`.flock/runs/` by default):
//! ```text
//! .flock/runs/20261015T093012455000000Z-4f1c2a9e.json
//! ```
//!
//! Every save goes through `io::atomic_write`, so a reader only ever sees
//! the previous complete record or the new complete record.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{FlockError, Result};
use crate::{io, paths};

use super::run::RunRecord;

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

/// Persistence seam used by the orchestrator.
pub trait RunStore {
    /// Durably replace the stored copy of `run`.
    fn save(&self, run: &RunRecord) -> Result<()>;

    /// Read back a run by id.
    fn load(&self, run_id: &str) -> Result<RunRecord>;
}

impl<S: RunStore + ?Sized> RunStore for &S {
    fn save(&self, run: &RunRecord) -> Result<()> {
        (**self).save(run)
    }

    fn load(&self, run_id: &str) -> Result<RunRecord> {
        (**self).load(run_id)
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// File-backed `RunStore`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at `<root>/.flock/runs`.
    pub fn for_root(root: &Path) -> Self {
        Self::new(paths::runs_dir(root))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run ids on disk, most recent first.
    ///
    /// The directory is read once when this is called; the returned iterator
    /// walks that snapshot. Call again to pick up newer runs.
    pub fn list_runs(&self) -> Result<RunIds> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RunIds::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(paths::RUN_FILE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if paths::is_run_id(stem) {
                    ids.push(stem.to_string());
                }
            }
        }
        // Ids lead with a UTC timestamp, so lexical order is creation order.
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(RunIds {
            inner: ids.into_iter(),
        })
    }

    /// Load each listed run on demand, most recent first.
    pub fn list_records(&self) -> Result<impl Iterator<Item = Result<RunRecord>> + '_> {
        Ok(self.list_runs()?.map(move |id| self.load(&id)))
    }

    /// Delete runs created more than `max_age` ago. Returns the number removed.
    ///
    /// Files that no longer parse are left alone for an operator to look at.
    pub fn prune(&self, max_age: Duration) -> Result<u32> {
        // An age older than any representable time cannot match a run.
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let mut removed = 0u32;
        for id in self.list_runs()? {
            match self.load(&id) {
                Ok(run) if run.created_at < cutoff => {
                    std::fs::remove_file(paths::run_file(&self.dir, &id))?;
                    debug!(run_id = %id, "pruned checkpoint");
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(run_id = %id, error = %e, "skipping unreadable checkpoint"),
            }
        }
        Ok(removed)
    }
}

impl RunStore for CheckpointStore {
    fn save(&self, run: &RunRecord) -> Result<()> {
        let data = serde_json::to_vec_pretty(run)?;
        io::atomic_write(&paths::run_file(&self.dir, &run.id), &data).map_err(|e| match e {
            FlockError::Io(e) => FlockError::Persistence(e),
            other => other,
        })
    }

    fn load(&self, run_id: &str) -> Result<RunRecord> {
        if !paths::is_run_id(run_id) {
            return Err(FlockError::RunNotFound(run_id.to_string()));
        }
        let path = paths::run_file(&self.dir, run_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FlockError::RunNotFound(run_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let parse_err = |message: String| FlockError::CheckpointParse {
            run_id: run_id.to_string(),
            message,
        };
        let run: RunRecord = serde_json::from_str(&content).map_err(|e| parse_err(e.to_string()))?;
        if run.id != run_id {
            return Err(parse_err(format!("file holds run '{}'", run.id)));
        }
        run.check_invariants().map_err(parse_err)?;
        Ok(run)
    }
}

// ---------------------------------------------------------------------------
// RunIds
// ---------------------------------------------------------------------------

/// Iterator over persisted run ids, newest first.
#[derive(Debug, Default)]
pub struct RunIds {
    inner: std::vec::IntoIter<String>,
}

impl Iterator for RunIds {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for RunIds {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::run::{Outcome, Target};
    use chrono::Duration as CDur;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, CheckpointStore) {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("runs"));
        (dir, store)
    }

    fn sample_run() -> RunRecord {
        RunRecord::new(
            "create-repository",
            vec![
                Target::new("repo-a", json!({"private": true})),
                Target::bare("repo-b"),
            ],
        )
    }

    #[test]
    fn save_then_load_returns_same_record() {
        let (_dir, store) = open_tmp();
        let mut run = sample_run();
        run.record(
            "repo-a",
            Outcome::Succeeded {
                result: json!({"html_url": "https://github.com/o/repo-a"}),
            },
        );
        run.record("repo-b", Outcome::Failed { reason: "name already exists".into() });
        store.save(&run).unwrap();

        let loaded = store.load(&run.id).unwrap();
        assert_eq!(loaded, run);
    }

    #[test]
    fn file_layout_has_tagged_outcomes() {
        let (_dir, store) = open_tmp();
        let run = sample_run();
        store.save(&run).unwrap();

        let raw = std::fs::read_to_string(paths::run_file(store.dir(), &run.id)).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["id"], run.id.as_str());
        assert_eq!(v["targets"][0]["id"], "repo-a");
        assert_eq!(v["outcomes"]["repo-b"]["status"], "pending");
        assert!(v["created_at"].is_string());
    }

    #[test]
    fn load_missing_is_not_found() {
        let (_dir, store) = open_tmp();
        let err = store.load("20261015T000000000000000Z-deadbeef").unwrap_err();
        assert!(matches!(err, FlockError::RunNotFound(_)), "{err:?}");
    }

    #[test]
    fn load_rejects_path_like_ids() {
        let (_dir, store) = open_tmp();
        let err = store.load("../config").unwrap_err();
        assert!(matches!(err, FlockError::RunNotFound(_)), "{err:?}");
    }

    #[test]
    fn load_garbage_is_parse_error() {
        let (_dir, store) = open_tmp();
        let id = "20261015T000000000000000Z-deadbeef";
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(paths::run_file(store.dir(), id), "{ not json").unwrap();
        let err = store.load(id).unwrap_err();
        assert!(matches!(err, FlockError::CheckpointParse { .. }), "{err:?}");
    }

    #[test]
    fn load_rejects_outcome_for_unknown_target() {
        let (_dir, store) = open_tmp();
        let mut run = sample_run();
        run.outcomes.insert("stray".into(), Outcome::Pending);
        store.save(&run).unwrap();
        let err = store.load(&run.id).unwrap_err();
        assert!(matches!(err, FlockError::CheckpointParse { .. }), "{err:?}");
    }

    #[test]
    fn save_into_unwritable_location_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        // A regular file where the runs directory should be.
        let blocker = dir.path().join("runs");
        std::fs::write(&blocker, b"").unwrap();
        let store = CheckpointStore::new(&blocker);
        let err = store.save(&sample_run()).unwrap_err();
        assert!(matches!(err, FlockError::Persistence(_)), "{err:?}");
    }

    #[test]
    fn list_runs_is_newest_first_and_restartable() {
        let (_dir, store) = open_tmp();
        let mut older = sample_run();
        older.id = "20261014T080000000000000Z-00000001".into();
        let mut newer = sample_run();
        newer.id = "20261015T080000000000000Z-00000002".into();
        store.save(&older).unwrap();
        store.save(&newer).unwrap();
        std::fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        let first: Vec<String> = store.list_runs().unwrap().collect();
        assert_eq!(first, [newer.id.clone(), older.id.clone()]);
        let second: Vec<String> = store.list_runs().unwrap().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn list_runs_on_missing_dir_is_empty() {
        let (_dir, store) = open_tmp();
        assert_eq!(store.list_runs().unwrap().count(), 0);
    }

    #[test]
    fn prune_removes_only_old_runs() {
        let (_dir, store) = open_tmp();
        let mut stale = sample_run();
        stale.id = "20200101T000000000000000Z-0000000a".into();
        stale.created_at = Utc::now() - CDur::days(30);
        let fresh = sample_run();
        store.save(&stale).unwrap();
        store.save(&fresh).unwrap();

        let removed = store.prune(Duration::from_secs(7 * 24 * 3600)).unwrap();
        assert_eq!(removed, 1);
        let left: Vec<String> = store.list_runs().unwrap().collect();
        assert_eq!(left, [fresh.id]);
    }

    #[test]
    fn prune_with_huge_age_keeps_everything() {
        let (_dir, store) = open_tmp();
        let run = sample_run();
        store.save(&run).unwrap();

        let removed = store
            .prune(Duration::from_secs(u64::from(u32::MAX) * 24 * 3600))
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.prune(Duration::MAX).unwrap(), 0);
        assert_eq!(store.list_runs().unwrap().count(), 1);
    }

    #[test]
    fn prune_on_empty_store_returns_zero() {
        let (_dir, store) = open_tmp();
        assert_eq!(store.prune(Duration::from_secs(60)).unwrap(), 0);
    }
}
