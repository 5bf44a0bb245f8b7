mod cmd;
mod output;
mod root;
mod runner;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, files::FilesSubcommand, keys::KeysSubcommand,
    repos::ReposSubcommand, runs::RunsSubcommand, secrets::SecretsSubcommand,
    workflows::WorkflowsSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "flock",
    about = "Bulk GitHub and Tailscale operations with resumable, checkpointed runs",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .flock/)
    #[arg(long, global = true, env = "FLOCK_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize flock in the current directory
    Init,

    /// Show and validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Create GitHub repositories in bulk
    Repos {
        #[command(subcommand)]
        subcommand: ReposSubcommand,
    },

    /// Dispatch GitHub Actions workflows across repositories
    Workflows {
        #[command(subcommand)]
        subcommand: WorkflowsSubcommand,
    },

    /// Set GitHub Actions secrets across repositories
    Secrets {
        #[command(subcommand)]
        subcommand: SecretsSubcommand,
    },

    /// Commit files into repositories in bulk
    Files {
        #[command(subcommand)]
        subcommand: FilesSubcommand,
    },

    /// Generate Tailscale auth keys in bulk
    Keys {
        #[command(subcommand)]
        subcommand: KeysSubcommand,
    },

    /// Inspect, resume and prune checkpointed runs
    Runs {
        #[command(subcommand)]
        subcommand: RunsSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Repos { .. }
        | Commands::Workflows { .. }
        | Commands::Secrets { .. }
        | Commands::Files { .. }
        | Commands::Keys { .. } => tracing::Level::INFO,
        Commands::Runs {
            subcommand: RunsSubcommand::Resume { .. },
        } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Repos { subcommand } => cmd::repos::run(&root, subcommand, cli.json),
        Commands::Workflows { subcommand } => cmd::workflows::run(&root, subcommand, cli.json),
        Commands::Secrets { subcommand } => cmd::secrets::run(&root, subcommand, cli.json),
        Commands::Files { subcommand } => cmd::files::run(&root, subcommand, cli.json),
        Commands::Keys { subcommand } => cmd::keys::run(&root, subcommand, cli.json),
        Commands::Runs { subcommand } => cmd::runs::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
