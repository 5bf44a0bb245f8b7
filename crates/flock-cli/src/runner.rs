//! Drives an orchestrator pass on a blocking worker while the foreground
//! task prints progress and turns Ctrl-C into a cancellation request.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use flock_core::config::Config;
use flock_core::orchestrator::{
    ActionInvoker, CancelToken, CheckpointStore, Orchestrator, Progress, Retrying, RunRecord,
    Target,
};
use flock_core::remote::contents::{self, UploadFile};
use flock_core::remote::github::{self, CreateRepository, DispatchWorkflow, GitHubClient};
use flock_core::remote::secrets::{self, UploadSecret};
use flock_core::remote::tailscale::{self, GenerateAuthKey, TailscaleClient};
use tokio::sync::mpsc;

use crate::output::{outcome_detail, print_json, print_run, print_summary};

pub type BoxedInvoker = Box<dyn ActionInvoker + Send>;

pub enum Job {
    Start {
        action: &'static str,
        targets: Vec<Target>,
    },
    Resume(RunRecord),
}

impl Job {
    fn action(&self) -> &str {
        match self {
            Job::Start { action, .. } => *action,
            Job::Resume(run) => run.action.as_str(),
        }
    }
}

/// Build the retrying invoker for a known action name.
///
/// Must be called off the async runtime: the HTTP clients are blocking.
pub fn invoker_for(action: &str, config: &Config) -> anyhow::Result<BoxedInvoker> {
    let inner: BoxedInvoker = match action {
        github::CREATE_REPOSITORY => Box::new(CreateRepository::new(Arc::new(
            GitHubClient::from_config(config)?,
        ))),
        github::DISPATCH_WORKFLOW => Box::new(DispatchWorkflow::new(Arc::new(
            GitHubClient::from_config(config)?,
        ))),
        secrets::UPLOAD_SECRET => Box::new(UploadSecret::new(Arc::new(
            GitHubClient::from_config(config)?,
        ))),
        contents::UPLOAD_FILE => Box::new(UploadFile::new(Arc::new(
            GitHubClient::from_config(config)?,
        ))),
        tailscale::GENERATE_AUTH_KEY => Box::new(GenerateAuthKey::new(Arc::new(
            TailscaleClient::from_config(config)?,
        ))),
        other => return Err(anyhow!("unknown action '{other}'")),
    };
    Ok(Box::new(Retrying::new(
        inner,
        config.retry.max_attempts,
        config.retry.base_delay(),
    )))
}

/// Run `job` to the end of its pass (or until Ctrl-C) and return the record.
pub fn run(root: &Path, config: Config, job: Job, json: bool) -> anyhow::Result<RunRecord> {
    let store = CheckpointStore::for_root(root);
    let cancel = CancelToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Progress>();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let worker_cancel = cancel.clone();
        let mut worker = tokio::task::spawn_blocking(move || -> anyhow::Result<RunRecord> {
            let invoker = invoker_for(job.action(), &config)?;
            let mut orchestrator = Orchestrator::new(store)
                .with_cancel(worker_cancel)
                .with_observer(move |p: &Progress| {
                    let _ = tx.send(p.clone());
                });
            let run = match job {
                Job::Start { targets, .. } => orchestrator.run_batch(targets, &invoker)?,
                Job::Resume(run) => orchestrator.resume(run, &invoker)?,
            };
            Ok(run)
        });

        let mut interrupts = Interrupts::default();
        let run = loop {
            tokio::select! {
                Some(p) = rx.recv() => report(&p, json),
                res = &mut worker => break res.context("batch worker panicked")??,
                _ = tokio::signal::ctrl_c() => match interrupts.record() {
                    Interrupt::Cancel => {
                        eprintln!(
                            "interrupt received, stopping after the current target (Ctrl-C again to quit now)"
                        );
                        cancel.cancel();
                    }
                    Interrupt::Abort => {
                        eprintln!("second interrupt, exiting; finished targets are checkpointed");
                        std::process::exit(EXIT_INTERRUPTED);
                    }
                },
            }
        };
        while let Ok(p) = rx.try_recv() {
            report(&p, json);
        }
        Ok::<_, anyhow::Error>(run)
    })
}

/// Exit status for a run abandoned by a second Ctrl-C (128 + SIGINT).
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// Let the in-flight target finish, then stop.
    Cancel,
    /// Leave immediately. The checkpoint already holds every finished target.
    Abort,
}

#[derive(Debug, Default)]
struct Interrupts {
    seen: u32,
}

impl Interrupts {
    fn record(&mut self) -> Interrupt {
        self.seen = self.seen.saturating_add(1);
        if self.seen == 1 {
            Interrupt::Cancel
        } else {
            Interrupt::Abort
        }
    }
}

fn report(p: &Progress, json: bool) {
    if json {
        return;
    }
    let total = p.succeeded + p.failed + p.remaining;
    let done = total - p.remaining;
    let detail = outcome_detail(&p.outcome);
    if detail.is_empty() {
        eprintln!("[{done}/{total}] {} {}", p.target_id, p.outcome.label());
    } else {
        eprintln!("[{done}/{total}] {} {}: {detail}", p.target_id, p.outcome.label());
    }
}

/// Print the final record and fail if anything is left to do.
pub fn finish(run: &RunRecord, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(run)?;
    } else {
        print_run(run);
        println!();
        print_summary(run);
    }

    if !run.is_fully_succeeded() {
        let counts = run.counts();
        anyhow::bail!(
            "{} of {} targets did not succeed; retry with `flock runs resume {}`",
            counts.failed + counts.pending,
            run.targets.len(),
            run.id
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_interrupt_aborts() {
        let mut interrupts = Interrupts::default();
        assert_eq!(interrupts.record(), Interrupt::Cancel);
        assert_eq!(interrupts.record(), Interrupt::Abort);
        assert_eq!(interrupts.record(), Interrupt::Abort);
    }

    #[test]
    fn every_batch_action_has_an_invoker() {
        let mut config = Config::default();
        config.github.owner = "octo".into();
        config.github.token_env = "FLOCK_RUNNER_TEST_TOKEN_9d2f".into();
        config.tailscale.api_key_env = "FLOCK_RUNNER_TEST_TOKEN_9d2f".into();
        std::env::set_var("FLOCK_RUNNER_TEST_TOKEN_9d2f", "ghp_0123456789abcdefghij");

        for action in [
            github::CREATE_REPOSITORY,
            github::DISPATCH_WORKFLOW,
            secrets::UPLOAD_SECRET,
            contents::UPLOAD_FILE,
            tailscale::GENERATE_AUTH_KEY,
        ] {
            let invoker = invoker_for(action, &config).unwrap();
            assert_eq!(invoker.action(), action);
        }
        assert!(!invoker_for(github::CREATE_REPOSITORY, &config).unwrap().idempotent());
        assert!(invoker_for(secrets::UPLOAD_SECRET, &config).unwrap().idempotent());
        assert!(invoker_for("delete-everything", &config).is_err());
    }
}
