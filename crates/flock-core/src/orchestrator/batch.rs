//! The bulk orchestrator: one invoker call per target, one checkpoint per call.
//!
//! A pass walks the run's targets in submission order, skipping those that
//! already `Succeeded`. After every call the updated `RunRecord` is saved
//! before the next target starts and before the observer hears about it,
//! so whatever is on disk is always a consistent prefix of the pass.

use tracing::{debug, info, warn};

use crate::error::{FlockError, Result};

use super::cancel::CancelToken;
use super::checkpoint::RunStore;
use super::invoker::ActionInvoker;
use super::run::{check_unique, Outcome, RunRecord, Target};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Snapshot delivered to the observer after each target transition.
///
/// `succeeded` counts every succeeded target in the run, `failed` the
/// failures recorded during this pass, and `remaining` the targets this pass
/// has yet to attempt. The three always add up to the run's target count.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub target_id: String,
    pub outcome: Outcome,
    pub succeeded: usize,
    pub failed: usize,
    pub remaining: usize,
}

pub trait ProgressObserver {
    fn on_progress(&mut self, progress: &Progress);
}

impl<F: FnMut(&Progress)> ProgressObserver for F {
    fn on_progress(&mut self, progress: &Progress) {
        self(progress)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<'o, S> {
    store: S,
    observer: Option<Box<dyn ProgressObserver + 'o>>,
    cancel: CancelToken,
}

impl<'o, S: RunStore> Orchestrator<'o, S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            observer: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: impl ProgressObserver + 'o) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Create and persist a new all-`Pending` run.
    ///
    /// Duplicate or blank target ids are rejected before anything is written.
    pub fn start_run<I>(&self, targets: Vec<Target>, invoker: &I) -> Result<RunRecord>
    where
        I: ActionInvoker + ?Sized,
    {
        if invoker.action().trim().is_empty() {
            return Err(FlockError::Configuration(
                "invoker has no action name".to_string(),
            ));
        }
        check_unique(&targets).map_err(FlockError::Configuration)?;

        let run = RunRecord::new(invoker.action(), targets);
        self.store.save(&run)?;
        info!(
            run_id = %run.id,
            action = %run.action,
            targets = run.targets.len(),
            "started run"
        );
        Ok(run)
    }

    /// Process every target not yet `Succeeded`, in order.
    pub fn execute<I>(&mut self, run: RunRecord, invoker: &I) -> Result<RunRecord>
    where
        I: ActionInvoker + ?Sized,
    {
        check_action(&run, invoker)?;
        self.drive(run, invoker)
    }

    /// Continue a persisted run. `Failed` targets are attempted again.
    pub fn resume<I>(&mut self, run: RunRecord, invoker: &I) -> Result<RunRecord>
    where
        I: ActionInvoker + ?Sized,
    {
        check_action(&run, invoker)?;
        let counts = run.counts();
        info!(
            run_id = %run.id,
            succeeded = counts.succeeded,
            failed = counts.failed,
            pending = counts.pending,
            "resuming run"
        );
        self.drive(run, invoker)
    }

    /// Load `run_id` from the store and resume it.
    pub fn resume_id<I>(&mut self, run_id: &str, invoker: &I) -> Result<RunRecord>
    where
        I: ActionInvoker + ?Sized,
    {
        let run = self.store.load(run_id)?;
        self.resume(run, invoker)
    }

    /// `start_run` followed by `execute`.
    pub fn run_batch<I>(&mut self, targets: Vec<Target>, invoker: &I) -> Result<RunRecord>
    where
        I: ActionInvoker + ?Sized,
    {
        let run = self.start_run(targets, invoker)?;
        self.execute(run, invoker)
    }

    fn drive<I>(&mut self, mut run: RunRecord, invoker: &I) -> Result<RunRecord>
    where
        I: ActionInvoker + ?Sized,
    {
        let queued: Vec<usize> = run
            .targets
            .iter()
            .enumerate()
            .filter(|(_, t)| !run.outcome(&t.id).is_some_and(Outcome::is_succeeded))
            .map(|(i, _)| i)
            .collect();

        if queued.is_empty() {
            debug!(run_id = %run.id, "nothing to do");
            return Ok(run);
        }

        let mut succeeded = run.counts().succeeded;
        let mut failed = 0;
        let mut remaining = queued.len();

        for idx in queued {
            if self.cancel.is_cancelled() {
                info!(run_id = %run.id, remaining, "run cancelled");
                break;
            }

            let target_id = run.targets[idx].id.clone();
            debug!(run_id = %run.id, target_id = %target_id, "invoking");
            let outcome = match invoker.invoke(&run.targets[idx]) {
                Ok(result) => {
                    succeeded += 1;
                    Outcome::Succeeded { result }
                }
                Err(e) => {
                    warn!(run_id = %run.id, target_id = %target_id, error = %e, "target failed");
                    failed += 1;
                    Outcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            remaining -= 1;

            run.record(&target_id, outcome.clone());
            self.store.save(&run)?;

            if let Some(observer) = self.observer.as_mut() {
                observer.on_progress(&Progress {
                    target_id,
                    outcome,
                    succeeded,
                    failed,
                    remaining,
                });
            }
        }

        let counts = run.counts();
        info!(
            run_id = %run.id,
            succeeded = counts.succeeded,
            failed = counts.failed,
            pending = counts.pending,
            "pass finished"
        );
        Ok(run)
    }
}

fn check_action<I: ActionInvoker + ?Sized>(run: &RunRecord, invoker: &I) -> Result<()> {
    if run.action != invoker.action() {
        return Err(FlockError::Configuration(format!(
            "run {} was started for '{}', not '{}'",
            run.id,
            run.action,
            invoker.action()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::checkpoint::CheckpointStore;
    use crate::orchestrator::invoker::{from_fn, InvocationError, InvokeResult};
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Wraps a real store, counting saves and keeping what was on disk after each.
    struct TrackingStore {
        inner: CheckpointStore,
        snapshots: RefCell<Vec<RunRecord>>,
    }

    impl TrackingStore {
        fn new(dir: &TempDir) -> Self {
            Self {
                inner: CheckpointStore::new(dir.path().join("runs")),
                snapshots: RefCell::new(Vec::new()),
            }
        }

        fn writes(&self) -> usize {
            self.snapshots.borrow().len()
        }
    }

    impl RunStore for TrackingStore {
        fn save(&self, run: &RunRecord) -> Result<()> {
            self.inner.save(run)?;
            // Reload from disk: this is what a crash right now would leave behind.
            let on_disk = self.inner.load(&run.id)?;
            self.snapshots.borrow_mut().push(on_disk);
            Ok(())
        }

        fn load(&self, run_id: &str) -> Result<RunRecord> {
            self.inner.load(run_id)
        }
    }

    /// Fails every save after the first `ok_saves`.
    struct FlakyStore {
        ok_saves: usize,
        saves: Cell<usize>,
    }

    impl RunStore for FlakyStore {
        fn save(&self, _run: &RunRecord) -> Result<()> {
            self.saves.set(self.saves.get() + 1);
            if self.saves.get() > self.ok_saves {
                return Err(FlockError::Persistence(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            Ok(())
        }

        fn load(&self, run_id: &str) -> Result<RunRecord> {
            Err(FlockError::RunNotFound(run_id.to_string()))
        }
    }

    fn targets(ids: &[&str]) -> Vec<Target> {
        ids.iter().map(|id| Target::bare(*id)).collect()
    }

    fn failing_for<'a>(
        bad: &'a RefCell<HashSet<String>>,
        calls: &'a RefCell<Vec<String>>,
    ) -> impl Fn(&Target) -> InvokeResult + 'a {
        move |t: &Target| {
            calls.borrow_mut().push(t.id.clone());
            if bad.borrow().contains(&t.id) {
                Err(InvocationError::rejected(format!("{} is broken", t.id)))
            } else {
                Ok(json!({"name": t.id}))
            }
        }
    }

    #[test]
    fn mixed_batch_records_every_outcome_and_continues_past_failure() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(&dir);
        let bad = RefCell::new(HashSet::from(["repo-b".to_string()]));
        let calls = RefCell::new(Vec::new());
        let invoker = from_fn("create-repository", failing_for(&bad, &calls));

        let mut orch = Orchestrator::new(&store);
        let run = orch
            .run_batch(targets(&["repo-a", "repo-b", "repo-c"]), &invoker)
            .unwrap();

        assert_eq!(*calls.borrow(), ["repo-a", "repo-b", "repo-c"]);
        assert!(run.outcome("repo-a").unwrap().is_succeeded());
        assert_eq!(
            run.outcome("repo-b"),
            Some(&Outcome::Failed {
                reason: "repo-b is broken".into()
            })
        );
        assert!(run.outcome("repo-c").unwrap().is_succeeded());
        assert!(run.is_complete());
        // initial write + one per transition
        assert_eq!(store.writes(), 4);
        assert_eq!(store.load(&run.id).unwrap(), run);
    }

    #[test]
    fn empty_batch_writes_once_and_invokes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(&dir);
        let calls = Cell::new(0);
        let invoker = from_fn("noop", |_t: &Target| {
            calls.set(calls.get() + 1);
            Ok(json!(null))
        });

        let mut orch = Orchestrator::new(&store);
        let run = orch.run_batch(Vec::new(), &invoker).unwrap();

        assert!(run.outcomes.is_empty());
        assert!(run.is_complete());
        assert_eq!(store.writes(), 1);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn duplicate_ids_are_rejected_before_any_write() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(&dir);
        let invoker = from_fn("noop", |_t: &Target| Ok(json!(null)));

        let orch = Orchestrator::new(&store);
        let err = orch.start_run(targets(&["x", "x"]), &invoker).unwrap_err();

        assert!(matches!(err, FlockError::Configuration(ref m) if m.contains("'x'")), "{err:?}");
        assert_eq!(store.writes(), 0);
        assert_eq!(store.inner.list_runs().unwrap().count(), 0);
    }

    #[test]
    fn unnamed_invoker_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(&dir);
        let invoker = from_fn("", |_t: &Target| Ok(json!(null)));
        let orch = Orchestrator::new(&store);
        let err = orch.start_run(targets(&["a"]), &invoker).unwrap_err();
        assert!(matches!(err, FlockError::Configuration(_)));
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn resume_of_fully_succeeded_run_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(&dir);
        let calls = Cell::new(0);
        let invoker = from_fn("noop", |_t: &Target| {
            calls.set(calls.get() + 1);
            Ok(json!({}))
        });

        let mut orch = Orchestrator::new(&store);
        let done = orch.run_batch(targets(&["a", "b"]), &invoker).unwrap();
        let writes_before = store.writes();
        calls.set(0);

        let resumed = orch.resume(done.clone(), &invoker).unwrap();
        assert_eq!(resumed, done);
        assert_eq!(calls.get(), 0);
        assert_eq!(store.writes(), writes_before);
    }

    #[test]
    fn resume_retries_failed_target_only() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(&dir);
        let bad = RefCell::new(HashSet::from(["b".to_string()]));
        let calls = RefCell::new(Vec::new());
        let invoker = from_fn("create-repository", failing_for(&bad, &calls));

        let mut orch = Orchestrator::new(&store);
        let first = orch.run_batch(targets(&["a", "b", "c"]), &invoker).unwrap();
        assert!(first.outcome("b").unwrap().is_failed());

        bad.borrow_mut().clear();
        calls.borrow_mut().clear();
        let second = orch.resume_id(&first.id, &invoker).unwrap();

        assert_eq!(*calls.borrow(), ["b"]);
        assert!(second.outcome("b").unwrap().is_succeeded());
        assert_eq!(second.outcome("a"), first.outcome("a"));
        assert_eq!(second.outcome("c"), first.outcome("c"));
    }

    #[test]
    fn resume_with_other_action_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(&dir);
        let create = from_fn("create-repository", |_t: &Target| Ok(json!(null)));
        let keys = from_fn("generate-auth-key", |_t: &Target| Ok(json!(null)));

        let mut orch = Orchestrator::new(&store);
        let run = orch.start_run(targets(&["a"]), &create).unwrap();
        let err = orch.resume(run, &keys).unwrap_err();
        assert!(matches!(err, FlockError::Configuration(_)), "{err:?}");
    }

    #[test]
    fn every_checkpoint_reflects_all_attempted_targets() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(&dir);
        let bad = RefCell::new(HashSet::from(["t2".to_string(), "t4".to_string()]));
        let calls = RefCell::new(Vec::new());
        let invoker = from_fn("create-repository", failing_for(&bad, &calls));
        let ids = ["t1", "t2", "t3", "t4", "t5"];

        let mut orch = Orchestrator::new(&store);
        orch.run_batch(targets(&ids), &invoker).unwrap();

        let snapshots = store.snapshots.borrow();
        assert_eq!(snapshots.len(), ids.len() + 1);
        for (attempted, snap) in snapshots.iter().enumerate() {
            for (i, id) in ids.iter().enumerate() {
                let outcome = snap.outcome(id).unwrap();
                if i < attempted {
                    assert!(!outcome.is_pending(), "{id} pending after write {attempted}");
                } else {
                    assert!(outcome.is_pending(), "{id} resolved early at write {attempted}");
                }
            }
        }
    }

    #[test]
    fn cancellation_lets_in_flight_call_finish_then_stops() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(&dir);
        let token = CancelToken::new();
        let calls = Cell::new(0);
        let trip = token.clone();
        // Cancel arrives while the second call is in flight.
        let invoker = from_fn("create-repository", |_t: &Target| {
            calls.set(calls.get() + 1);
            if calls.get() == 2 {
                trip.cancel();
            }
            Ok(json!({}))
        });

        let mut orch = Orchestrator::new(&store).with_cancel(token);
        let run = orch
            .run_batch(targets(&["a", "b", "c", "d"]), &invoker)
            .unwrap();

        assert_eq!(calls.get(), 2);
        assert!(run.outcome("b").unwrap().is_succeeded());
        assert!(run.outcome("c").unwrap().is_pending());
        assert!(run.outcome("d").unwrap().is_pending());
        assert_eq!(store.load(&run.id).unwrap(), run);
        assert!(orch.cancel_token().is_cancelled());
    }

    #[test]
    fn observer_sees_transitions_in_order_with_counts() {
        let dir = TempDir::new().unwrap();
        let store = TrackingStore::new(&dir);
        let bad = RefCell::new(HashSet::from(["b".to_string()]));
        let calls = RefCell::new(Vec::new());
        let invoker = from_fn("create-repository", failing_for(&bad, &calls));
        let seen = RefCell::new(Vec::new());

        let mut orch =
            Orchestrator::new(&store).with_observer(|p: &Progress| seen.borrow_mut().push(p.clone()));
        orch.run_batch(targets(&["a", "b", "c"]), &invoker).unwrap();
        drop(orch);

        let seen = seen.into_inner();
        let summary: Vec<(&str, usize, usize, usize)> = seen
            .iter()
            .map(|p| (p.target_id.as_str(), p.succeeded, p.failed, p.remaining))
            .collect();
        assert_eq!(summary, [("a", 1, 0, 2), ("b", 1, 1, 1), ("c", 2, 1, 0)]);
        assert!(seen[1].outcome.is_failed());
    }

    #[test]
    fn persistence_failure_stops_the_run() {
        let store = FlakyStore {
            ok_saves: 2,
            saves: Cell::new(0),
        };
        let calls = Cell::new(0);
        let invoker = from_fn("noop", |_t: &Target| {
            calls.set(calls.get() + 1);
            Ok(json!(null))
        });

        let mut orch = Orchestrator::new(&store);
        let err = orch
            .run_batch(targets(&["a", "b", "c"]), &invoker)
            .unwrap_err();

        assert!(matches!(err, FlockError::Persistence(_)), "{err:?}");
        // "a" checkpointed, "b" invoked but its checkpoint failed, "c" never tried.
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn runs_on_a_worker_thread_with_channel_progress() {
        let dir = TempDir::new().unwrap();
        let runs = dir.path().join("runs");
        let (tx, rx) = std::sync::mpsc::channel::<Progress>();

        let handle = std::thread::spawn(move || {
            let store = CheckpointStore::new(runs);
            let invoker = from_fn("noop", |t: &Target| Ok(json!({"id": t.id})));
            let mut orch = Orchestrator::new(store).with_observer(move |p: &Progress| {
                let _ = tx.send(p.clone());
            });
            orch.run_batch(targets(&["one", "two"]), &invoker)
        });

        let run = handle.join().unwrap().unwrap();
        let ids: Vec<String> = rx.iter().map(|p| p.target_id).collect();
        assert_eq!(ids, ["one", "two"]);
        assert!(run.is_fully_succeeded());
    }
}
