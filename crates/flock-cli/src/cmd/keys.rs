use crate::runner::{self, Job};
use clap::Subcommand;
use flock_core::naming::{MAX_BATCH, MIN_BATCH};
use flock_core::orchestrator::Target;
use flock_core::remote::tailscale::{KeyRequest, GENERATE_AUTH_KEY};
use std::path::Path;

#[derive(Subcommand)]
pub enum KeysSubcommand {
    /// Generate a batch of auth keys
    Generate {
        /// Number of keys to generate
        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Key description prefix; keys are described `<prefix>-NN`
        #[arg(long, default_value = "flock-key")]
        prefix: String,

        /// Days until the keys expire (default: tailscale.expiry_days)
        #[arg(long)]
        expiry_days: Option<u32>,

        /// ACL tag to apply, e.g. tag:ci (repeatable; replaces tailscale.tags)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Devices authenticated with the key are removed when they go offline
        #[arg(long)]
        ephemeral: bool,

        /// Keys can only be used once
        #[arg(long)]
        single_use: bool,
    },
}

pub fn run(root: &Path, subcmd: KeysSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        KeysSubcommand::Generate {
            count,
            prefix,
            expiry_days,
            tags,
            ephemeral,
            single_use,
        } => {
            let options = KeyOptions {
                expiry_days,
                tags,
                ephemeral,
                single_use,
            };
            generate(root, count, &prefix, options, json)
        }
    }
}

struct KeyOptions {
    expiry_days: Option<u32>,
    tags: Vec<String>,
    ephemeral: bool,
    single_use: bool,
}

fn generate(
    root: &Path,
    count: usize,
    prefix: &str,
    options: KeyOptions,
    json: bool,
) -> anyhow::Result<()> {
    if !(MIN_BATCH..=MAX_BATCH).contains(&count) {
        anyhow::bail!("--count must be between {MIN_BATCH} and {MAX_BATCH}, got {count}");
    }
    if let Some(bad) = options.tags.iter().find(|t| !t.starts_with("tag:")) {
        anyhow::bail!("tag '{bad}' must start with 'tag:'");
    }

    let config = super::config::load_checked(root)?;

    let mut request = KeyRequest::from(&config.tailscale);
    if let Some(days) = options.expiry_days {
        request.expiry_days = days;
    }
    if !options.tags.is_empty() {
        request.tags = options.tags;
    }
    request.ephemeral |= options.ephemeral;
    if options.single_use {
        request.reusable = false;
    }

    let payload = serde_json::to_value(&request)?;
    let targets = (1..=count)
        .map(|i| Target::new(format!("{prefix}-{i:02}"), payload.clone()))
        .collect();

    let run = runner::run(
        root,
        config,
        Job::Start {
            action: GENERATE_AUTH_KEY,
            targets,
        },
        json,
    )?;
    if !json {
        println!("Keys are stored in the run checkpoint; view them with `flock runs show {} --json`.", run.id);
    }
    runner::finish(&run, json)
}
