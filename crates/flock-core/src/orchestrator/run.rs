//! Run data model for the bulk orchestrator.
//!
//! A `RunRecord` is the checkpoint of one batch: the ordered targets it was
//! started with and the outcome recorded for each of them so far. It is the
//! only state that survives a crash, so everything needed to resume lives
//! here and nowhere else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Last creation stamp handed out in this process, in nanoseconds.
static LAST_STAMP: AtomicI64 = AtomicI64::new(i64::MIN);

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// One unit of work in a batch: a name plus whatever the invoker needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    /// Opaque to the orchestrator; interpreted by the invoker only.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Target {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// A target whose invoker needs nothing beyond the id.
    pub fn bare(id: impl Into<String>) -> Self {
        Self::new(id, serde_json::Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Recorded state of one target.
///
/// Transitions: `Pending → Succeeded | Failed`, and `Failed → Succeeded | Failed`
/// on resume. `Succeeded` is final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Succeeded {
        #[serde(default)]
        result: serde_json::Value,
    },
    Failed {
        reason: String,
    },
}

impl Outcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Outcome::Succeeded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Pending => "pending",
            Outcome::Succeeded { .. } => "succeeded",
            Outcome::Failed { .. } => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// RunCounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
}

// ---------------------------------------------------------------------------
// RunRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// `YYYYMMDDTHHMMSS<nanos>Z-xxxxxxxx`; sorts in creation order.
    pub id: String,
    /// Name of the invoker the run was started with, e.g. `create-repository`.
    pub action: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub targets: Vec<Target>,
    pub outcomes: BTreeMap<String, Outcome>,
}

impl RunRecord {
    /// Build a record with every target `Pending`.
    ///
    /// Callers are expected to have run `check_unique` on `targets` first.
    pub(crate) fn new(action: impl Into<String>, targets: Vec<Target>) -> Self {
        let now = next_stamp(Utc::now());
        let outcomes = targets
            .iter()
            .map(|t| (t.id.clone(), Outcome::Pending))
            .collect();
        Self {
            id: Self::new_id(now),
            action: action.into(),
            created_at: now,
            updated_at: now,
            targets,
            outcomes,
        }
    }

    pub fn new_id(now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", now.format("%Y%m%dT%H%M%S%9fZ"), &suffix[..8])
    }

    pub fn outcome(&self, target_id: &str) -> Option<&Outcome> {
        self.outcomes.get(target_id)
    }

    /// Replace the outcome for a known target and bump `updated_at`.
    pub(crate) fn record(&mut self, target_id: &str, outcome: Outcome) {
        debug_assert!(
            self.outcomes.contains_key(target_id),
            "recording outcome for unknown target {target_id}"
        );
        if let Some(slot) = self.outcomes.get_mut(target_id) {
            *slot = outcome;
            self.updated_at = Utc::now();
        }
    }

    /// Targets paired with their outcome, in submission order.
    pub fn entries(&self) -> impl Iterator<Item = (&Target, &Outcome)> + '_ {
        self.targets
            .iter()
            .filter_map(|t| self.outcomes.get(&t.id).map(|o| (t, o)))
    }

    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for outcome in self.outcomes.values() {
            match outcome {
                Outcome::Pending => counts.pending += 1,
                Outcome::Succeeded { .. } => counts.succeeded += 1,
                Outcome::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }

    /// True once no target is left `Pending`.
    pub fn is_complete(&self) -> bool {
        !self.outcomes.values().any(Outcome::is_pending)
    }

    /// True once every target has `Succeeded`.
    pub fn is_fully_succeeded(&self) -> bool {
        self.outcomes.values().all(Outcome::is_succeeded)
    }

    /// Verify the targets/outcomes pairing of a record read from disk.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        check_unique(&self.targets)?;
        if self.outcomes.len() != self.targets.len() {
            return Err(format!(
                "{} targets but {} outcomes",
                self.targets.len(),
                self.outcomes.len()
            ));
        }
        if let Some(t) = self
            .targets
            .iter()
            .find(|t| !self.outcomes.contains_key(&t.id))
        {
            return Err(format!("target '{}' has no outcome", t.id));
        }
        Ok(())
    }
}

/// `now`, nudged forward so no two runs created by this process share a stamp.
fn next_stamp(now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(wanted) = now.timestamp_nanos_opt() else {
        return now;
    };
    let prev = LAST_STAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(wanted.max(last.saturating_add(1)))
        })
        .unwrap_or_else(|last| last);
    DateTime::from_timestamp_nanos(wanted.max(prev.saturating_add(1)))
}

/// Reject empty or repeated target ids.
pub fn check_unique(targets: &[Target]) -> std::result::Result<(), String> {
    let mut seen = HashSet::with_capacity(targets.len());
    for t in targets {
        if t.id.trim().is_empty() {
            return Err("target id cannot be empty".to_string());
        }
        if !seen.insert(t.id.as_str()) {
            return Err(format!("duplicate target id '{}'", t.id));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
