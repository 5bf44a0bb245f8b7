//! Choosing the repositories a batch command runs against.

use anyhow::Context;
use flock_core::orchestrator::{CheckpointStore, RunStore};
use flock_core::paths::validate_repo_name;
use flock_core::remote::github::CREATE_REPOSITORY;
use std::collections::HashSet;
use std::path::Path;

/// Explicit repositories followed by those a create run succeeded on.
///
/// A repository named both ways is kept once, at its first position.
pub fn target_repos(
    root: &Path,
    repos: Vec<String>,
    from_run: Option<&str>,
) -> anyhow::Result<Vec<String>> {
    for repo in &repos {
        validate_repo_name(repo)?;
    }
    let mut all = repos;
    if let Some(run_id) = from_run {
        all.extend(created_repos(root, run_id)?);
    }
    let all = dedupe(all);
    if all.is_empty() {
        anyhow::bail!("no repositories given");
    }
    Ok(all)
}

/// Names of the repositories a `create-repository` run succeeded on.
pub fn created_repos(root: &Path, run_id: &str) -> anyhow::Result<Vec<String>> {
    let run = CheckpointStore::for_root(root)
        .load(run_id)
        .with_context(|| format!("failed to load run {run_id}"))?;
    if run.action != CREATE_REPOSITORY {
        anyhow::bail!(
            "run {run_id} is a '{}' run, expected '{CREATE_REPOSITORY}'",
            run.action
        );
    }
    Ok(run
        .entries()
        .filter(|(_, o)| o.is_succeeded())
        .map(|(t, _)| t.id.clone())
        .collect())
}

fn dedupe(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|n| seen.insert(n.clone()))
        .collect()
}
