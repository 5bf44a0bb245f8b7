use crate::runner::{self, Job};
use anyhow::{anyhow, Context};
use clap::{ArgGroup, Subcommand};
use flock_core::orchestrator::{check_unique, CheckpointStore, RunStore, Target};
use flock_core::paths::validate_secret_name;
use flock_core::remote::secrets::{SecretUpload, UPLOAD_SECRET};
use flock_core::remote::tailscale::generated_keys;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum SecretsSubcommand {
    /// Create or update a GitHub Actions secret in each repository
    #[command(group(
        ArgGroup::new("source")
            .required(true)
            .args(["value", "from_file", "from_key_run"])
    ))]
    Set {
        /// Secret name, e.g. TS_AUTHKEY
        name: String,

        /// Repositories (names under github.owner)
        repos: Vec<String>,

        /// Same value for every repository
        #[arg(long)]
        value: Option<String>,

        /// Read the value from a file (trailing newline dropped)
        #[arg(long, value_name = "PATH")]
        from_file: Option<PathBuf>,

        /// With --from-file: one value per line, paired with repositories in order
        #[arg(long, requires = "from_file")]
        lines: bool,

        /// Give each repository its own key from a generate-auth-key run, in order
        #[arg(long, value_name = "RUN_ID")]
        from_key_run: Option<String>,

        /// Also target every repository a create run succeeded on
        #[arg(long, value_name = "RUN_ID")]
        from_run: Option<String>,
    },
}

/// Where the secret value comes from.
enum Source {
    Value(String),
    File { path: PathBuf, lines: bool },
    KeyRun(String),
}

pub fn run(root: &Path, subcmd: SecretsSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        SecretsSubcommand::Set {
            name,
            repos,
            value,
            from_file,
            lines,
            from_key_run,
            from_run,
        } => {
            let source = match (value, from_file, from_key_run) {
                (Some(v), _, _) => Source::Value(v),
                (_, Some(path), _) => Source::File { path, lines },
                (_, _, Some(run_id)) => Source::KeyRun(run_id),
                (None, None, None) => anyhow::bail!("a secret value source is required"),
            };
            set(root, &name, repos, source, from_run.as_deref(), json)
        }
    }
}

fn set(
    root: &Path,
    name: &str,
    repos: Vec<String>,
    source: Source,
    from_run: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    validate_secret_name(name)?;
    let config = super::config::load_checked(root)?;
    let repos = super::select::target_repos(root, repos, from_run)?;
    let values = resolve_values(root, source, repos.len())?;

    let targets = repos
        .into_iter()
        .zip(values)
        .map(|(repo, value)| {
            let payload = serde_json::to_value(SecretUpload {
                name: name.to_string(),
                value,
            })?;
            Ok(Target::new(repo, payload))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    check_unique(&targets).map_err(|e| anyhow!(e))?;

    let run = runner::run(
        root,
        config,
        Job::Start {
            action: UPLOAD_SECRET,
            targets,
        },
        json,
    )?;
    runner::finish(&run, json)
}

/// One value per repository, in repository order.
fn resolve_values(root: &Path, source: Source, count: usize) -> anyhow::Result<Vec<String>> {
    let values = match source {
        Source::Value(value) => vec![value; count],
        Source::File { path, lines: false } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let value = content.trim_end_matches(|c: char| c == '\r' || c == '\n').to_string();
            vec![value; count]
        }
        Source::File { path, lines: true } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let values: Vec<String> = content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            take_exactly(values, count, &format!("{} has", path.display()), "line")?
        }
        Source::KeyRun(run_id) => {
            let run = CheckpointStore::for_root(root)
                .load(&run_id)
                .with_context(|| format!("failed to load run {run_id}"))?;
            let keys = generated_keys(&run)?;
            take_exactly(keys, count, &format!("run {run_id} has"), "generated key")?
        }
    };
    if values.iter().any(String::is_empty) {
        anyhow::bail!("secret value is empty");
    }
    Ok(values)
}

fn take_exactly(
    mut values: Vec<String>,
    count: usize,
    what: &str,
    unit: &str,
) -> anyhow::Result<Vec<String>> {
    if values.len() < count {
        anyhow::bail!(
            "{what} {} {unit}(s) but {count} repositories were selected",
            values.len()
        );
    }
    values.truncate(count);
    Ok(values)
}
