use crate::output::print_json;
use anyhow::Context;
use clap::Subcommand;
use flock_core::config::{Config, ConfigWarning, WarnLevel};
use flock_core::remote::github::GitHubClient;
use flock_core::remote::tailscale::TailscaleClient;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,

    /// Validate the config and the credentials it refers to
    Validate {
        /// Skip the credential environment variable checks
        #[arg(long)]
        no_credentials: bool,

        /// Also call each API once to confirm the credentials are accepted
        #[arg(long, conflicts_with = "no_credentials")]
        online: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate {
            no_credentials,
            online,
        } => validate(root, !no_credentials, online, json),
    }
}

/// Load the config and refuse to continue if it has validation errors.
///
/// Warnings are logged and otherwise ignored.
pub fn load_checked(root: &Path) -> anyhow::Result<Config> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();
    for w in warnings.iter().filter(|w| w.level == WarnLevel::Warning) {
        tracing::warn!("{}", w.message);
    }
    if let Some(first) = warnings.iter().find(|w| w.level == WarnLevel::Error) {
        anyhow::bail!(
            "invalid configuration: {} (see `flock config validate`)",
            first.message
        );
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    if json {
        print_json(&config)?;
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, credentials: bool, online: bool, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let mut warnings = config.validate();
    if credentials {
        warnings.extend(config.check_credentials());
    }
    let mut notes = Vec::new();
    if online {
        check_online(&config, &mut notes, &mut warnings);
    }

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
            "online": notes,
        });
        print_json(&value)?;
    } else {
        for note in &notes {
            println!("{note}");
        }
        if warnings.is_empty() {
            println!("Config is valid. No warnings.");
        } else {
            print_warnings(&warnings);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}

/// One cheap authenticated call per service.
fn check_online(config: &Config, notes: &mut Vec<String>, warnings: &mut Vec<ConfigWarning>) {
    match GitHubClient::from_config(config) {
        Ok(client) => match client.whoami() {
            Ok(login) => notes.push(format!(
                "GitHub: authenticated as {login}, repositories go under {}",
                client.owner()
            )),
            Err(e) => warnings.push(ConfigWarning::error(format!("GitHub API check failed: {e}"))),
        },
        Err(e) => warnings.push(ConfigWarning::warning(format!("GitHub API check skipped: {e}"))),
    }

    match TailscaleClient::from_config(config) {
        Ok(client) => match client.count_keys() {
            Ok(n) => notes.push(format!("Tailscale: API key accepted, {n} existing key(s)")),
            Err(e) => warnings.push(ConfigWarning::error(format!(
                "Tailscale API check failed: {e}"
            ))),
        },
        Err(e) => warnings.push(ConfigWarning::warning(format!(
            "Tailscale API check skipped: {e}"
        ))),
    }
}

fn print_warnings(warnings: &[ConfigWarning]) {
    for w in warnings {
        let prefix = match w.level {
            WarnLevel::Warning => "warning",
            WarnLevel::Error => "error",
        };
        println!("[{prefix}] {}", w.message);
    }
}
