use crate::runner::{self, Job};
use anyhow::anyhow;
use clap::Subcommand;
use flock_core::naming::NamingStrategy;
use flock_core::orchestrator::{check_unique, Target};
use flock_core::paths::validate_repo_name;
use flock_core::remote::github::{RepoSettings, CREATE_REPOSITORY};
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum ReposSubcommand {
    /// Create a batch of repositories
    Create {
        /// Number of repositories to create (default: repos.count)
        #[arg(long)]
        count: Option<usize>,

        /// Explicit comma-separated names; bypasses the naming strategy
        #[arg(long, value_delimiter = ',', conflicts_with_all = ["count", "prefix", "from_file"])]
        names: Vec<String>,

        /// Name repositories `<prefix>-NN`
        #[arg(long, conflicts_with = "from_file")]
        prefix: Option<String>,

        /// Read names from a file, one per line
        #[arg(long)]
        from_file: Option<PathBuf>,

        /// Print the names without creating anything
        #[arg(long)]
        dry_run: bool,
    },
}

pub fn run(root: &Path, subcmd: ReposSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ReposSubcommand::Create {
            count,
            names,
            prefix,
            from_file,
            dry_run,
        } => create(root, count, names, prefix, from_file, dry_run, json),
    }
}

fn create(
    root: &Path,
    count: Option<usize>,
    names: Vec<String>,
    prefix: Option<String>,
    from_file: Option<PathBuf>,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let config = super::config::load_checked(root)?;

    let names = if !names.is_empty() {
        for name in &names {
            validate_repo_name(name)?;
        }
        names
    } else {
        let strategy = match (prefix, from_file) {
            (Some(prefix), _) => NamingStrategy::Custom { prefix },
            (None, Some(path)) => NamingStrategy::ImportFile { path },
            (None, None) => config.repos.naming.clone(),
        };
        strategy.generate(count.unwrap_or(config.repos.count), root)?
    };

    let payload = serde_json::to_value(RepoSettings::from_config(&config))?;
    let targets: Vec<Target> = names
        .into_iter()
        .map(|name| Target::new(name, payload.clone()))
        .collect();
    check_unique(&targets).map_err(|e| anyhow!(e))?;

    if dry_run {
        if json {
            let ids: Vec<&str> = targets.iter().map(|t| t.id.as_str()).collect();
            crate::output::print_json(&ids)?;
        } else {
            for t in &targets {
                println!("{}/{}", config.github.owner, t.id);
            }
        }
        return Ok(());
    }

    let run = runner::run(
        root,
        config,
        Job::Start {
            action: CREATE_REPOSITORY,
            targets,
        },
        json,
    )?;
    runner::finish(&run, json)
}
