use crate::runner::{self, Job};
use anyhow::{anyhow, Context};
use clap::Subcommand;
use flock_core::orchestrator::{check_unique, Target};
use flock_core::remote::contents::{collect_files, FileUpload, UPLOAD_FILE};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum FilesSubcommand {
    /// Commit a local file or folder into each repository
    Upload {
        /// Local file or directory
        src: PathBuf,

        /// Destination path in the repository; end with / to upload into a folder
        dest: String,

        /// Repositories (names under github.owner)
        repos: Vec<String>,

        /// Branch to commit to (default: the repository's default branch)
        #[arg(long)]
        branch: Option<String>,

        /// Commit message (default: "Add <path> via flock")
        #[arg(long)]
        message: Option<String>,

        /// Also target every repository a create run succeeded on
        #[arg(long, value_name = "RUN_ID")]
        from_run: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: FilesSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        FilesSubcommand::Upload {
            src,
            dest,
            repos,
            branch,
            message,
            from_run,
        } => {
            let commit = Commit {
                branch,
                message: message.unwrap_or_default(),
            };
            upload(root, &src, &dest, repos, commit, from_run.as_deref(), json)
        }
    }
}

struct Commit {
    branch: Option<String>,
    message: String,
}

fn upload(
    root: &Path,
    src: &Path,
    dest: &str,
    repos: Vec<String>,
    commit: Commit,
    from_run: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let config = super::config::load_checked(root)?;
    let repos = super::select::target_repos(root, repos, from_run)?;
    let targets = plan(src, dest, &repos, &commit)?;
    check_unique(&targets).map_err(|e| anyhow!(e))?;

    let run = runner::run(
        root,
        config,
        Job::Start {
            action: UPLOAD_FILE,
            targets,
        },
        json,
    )?;
    runner::finish(&run, json)
}

/// One target per (repository, file), repository-major.
fn plan(src: &Path, dest: &str, repos: &[String], commit: &Commit) -> anyhow::Result<Vec<Target>> {
    // Resume may run from another directory.
    let src = std::fs::canonicalize(src)
        .with_context(|| format!("cannot read {}", src.display()))?;
    let files = collect_files(&src, dest)?;
    if files.is_empty() {
        anyhow::bail!("{} contains no files to upload", src.display());
    }

    let mut targets = Vec::with_capacity(repos.len() * files.len());
    for repo in repos {
        for (source, path) in &files {
            let upload = FileUpload {
                repo: repo.clone(),
                path: path.clone(),
                source: source.clone(),
                message: commit.message.clone(),
                branch: commit.branch.clone(),
            };
            targets.push(upload.into_target()?);
        }
    }
    Ok(targets)
}
