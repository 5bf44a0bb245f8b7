use crate::output::{print_json, print_run, print_summary, print_table};
use crate::runner::{self, Job};
use anyhow::Context;
use clap::Subcommand;
use flock_core::config::{CheckpointConfig, Config};
use flock_core::orchestrator::{CheckpointStore, RunStore};
use std::path::Path;

#[derive(Subcommand)]
pub enum RunsSubcommand {
    /// List checkpointed runs, most recent first
    List,

    /// Show every target of a run and its outcome
    Show { run_id: String },

    /// Continue a run, retrying failed and pending targets
    Resume { run_id: String },

    /// Delete checkpoints older than the retention window
    Prune {
        /// Age in days (default: checkpoints.retention_days)
        #[arg(long)]
        days: Option<u32>,
    },
}

pub fn run(root: &Path, subcmd: RunsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        RunsSubcommand::List => list(root, json),
        RunsSubcommand::Show { run_id } => show(root, &run_id, json),
        RunsSubcommand::Resume { run_id } => resume(root, &run_id, json),
        RunsSubcommand::Prune { days } => prune(root, days, json),
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let store = CheckpointStore::for_root(root);
    let mut records = Vec::new();
    for record in store.list_records()? {
        match record {
            Ok(run) => records.push(run),
            Err(e) => tracing::warn!("{e}"),
        }
    }

    if json {
        let rows: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "action": r.action,
                    "created_at": r.created_at,
                    "updated_at": r.updated_at,
                    "counts": r.counts(),
                })
            })
            .collect();
        return print_json(&rows);
    }

    if records.is_empty() {
        println!("No runs.");
        return Ok(());
    }

    let rows = records
        .iter()
        .map(|r| {
            let c = r.counts();
            vec![
                r.id.clone(),
                r.action.clone(),
                c.succeeded.to_string(),
                c.failed.to_string(),
                c.pending.to_string(),
                r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    print_table(
        &["RUN", "ACTION", "OK", "FAILED", "PENDING", "UPDATED"],
        rows,
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, run_id: &str, json: bool) -> anyhow::Result<()> {
    let run = CheckpointStore::for_root(root).load(run_id)?;
    if json {
        print_json(&run)?;
    } else {
        print_run(&run);
        println!();
        print_summary(&run);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// resume
// ---------------------------------------------------------------------------

fn resume(root: &Path, run_id: &str, json: bool) -> anyhow::Result<()> {
    let run = CheckpointStore::for_root(root).load(run_id)?;
    if run.is_fully_succeeded() {
        if !json {
            println!("Run {} already succeeded on every target.", run.id);
        }
        return runner::finish(&run, json);
    }

    let config = super::config::load_checked(root)?;
    let run = runner::run(root, config, Job::Resume(run), json)?;
    runner::finish(&run, json)
}

// ---------------------------------------------------------------------------
// prune
// ---------------------------------------------------------------------------

fn prune(root: &Path, days: Option<u32>, json: bool) -> anyhow::Result<()> {
    let retention = match days {
        Some(retention_days) => CheckpointConfig { retention_days },
        None => {
            Config::load(root)
                .context("failed to load config")?
                .checkpoints
        }
    };
    let days = retention.retention_days;
    let max_age = retention.retention();
    let removed = CheckpointStore::for_root(root).prune(max_age)?;

    if json {
        print_json(&serde_json::json!({ "removed": removed, "days": days }))?;
    } else {
        println!("Removed {removed} run(s) older than {days} day(s).");
    }
    Ok(())
}
