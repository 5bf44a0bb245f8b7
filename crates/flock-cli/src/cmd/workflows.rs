use crate::runner::{self, Job};
use anyhow::anyhow;
use clap::Subcommand;
use flock_core::orchestrator::{check_unique, Target};
use flock_core::remote::github::{WorkflowDispatch, DISPATCH_WORKFLOW};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Subcommand)]
pub enum WorkflowsSubcommand {
    /// Trigger a workflow_dispatch event in each repository
    Dispatch {
        /// Workflow file name (e.g. ci.yml) or numeric id
        workflow: String,

        /// Repositories (names under github.owner)
        repos: Vec<String>,

        /// Branch or tag to run the workflow on
        #[arg(long = "ref", default_value = "main")]
        git_ref: String,

        /// Workflow input as KEY=VALUE (repeatable)
        #[arg(long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Also target every repository a create run succeeded on
        #[arg(long, value_name = "RUN_ID")]
        from_run: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: WorkflowsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        WorkflowsSubcommand::Dispatch {
            workflow,
            repos,
            git_ref,
            inputs,
            from_run,
        } => dispatch(root, workflow, repos, git_ref, &inputs, from_run, json),
    }
}

fn dispatch(
    root: &Path,
    workflow: String,
    repos: Vec<String>,
    git_ref: String,
    inputs: &[String],
    from_run: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let config = super::config::load_checked(root)?;

    let repos = super::select::target_repos(root, repos, from_run.as_deref())?;

    let payload = serde_json::to_value(WorkflowDispatch {
        workflow,
        git_ref,
        inputs: parse_inputs(inputs)?,
    })?;
    let targets: Vec<Target> = repos
        .into_iter()
        .map(|repo| Target::new(repo, payload.clone()))
        .collect();
    check_unique(&targets).map_err(|e| anyhow!(e))?;

    let run = runner::run(
        root,
        config,
        Job::Start {
            action: DISPATCH_WORKFLOW,
            targets,
        },
        json,
    )?;
    runner::finish(&run, json)
}

fn parse_inputs(raw: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|kv| {
            let (k, v) = kv
                .split_once('=')
                .ok_or_else(|| anyhow!("workflow input '{kv}' must be KEY=VALUE"))?;
            if k.is_empty() {
                anyhow::bail!("workflow input '{kv}' has an empty key");
            }
            Ok((k.to_string(), v.to_string()))
        })
        .collect()
}
