use crate::error::{FlockError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const FLOCK_DIR: &str = ".flock";
pub const RUNS_DIR: &str = ".flock/runs";
pub const CONFIG_FILE: &str = ".flock/config.yaml";

pub const RUN_FILE_EXT: &str = "json";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn runs_dir(root: &Path) -> PathBuf {
    root.join(RUNS_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn run_file(runs_dir: &Path, run_id: &str) -> PathBuf {
    runs_dir.join(format!("{run_id}.{RUN_FILE_EXT}"))
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

const MAX_REPO_NAME_LEN: usize = 100;

static REPO_NAME_RE: OnceLock<Regex> = OnceLock::new();
static RUN_ID_RE: OnceLock<Regex> = OnceLock::new();
static SECRET_NAME_RE: OnceLock<Regex> = OnceLock::new();
static TOPIC_RE: OnceLock<Regex> = OnceLock::new();

fn repo_name_re() -> &'static Regex {
    REPO_NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").unwrap())
}

fn run_id_re() -> &'static Regex {
    RUN_ID_RE.get_or_init(|| Regex::new(r"^[0-9]{8}T[0-9]{15}Z-[0-9a-f]{8}$").unwrap())
}

fn secret_name_re() -> &'static Regex {
    SECRET_NAME_RE.get_or_init(|| Regex::new(r"^[A-Z_][A-Z0-9_]*$").unwrap())
}

fn topic_re() -> &'static Regex {
    TOPIC_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,49}$").unwrap())
}

/// Check that `name` is acceptable to GitHub as a repository name.
pub fn validate_repo_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name cannot be empty"
    } else if name.len() > MAX_REPO_NAME_LEN {
        "name is longer than 100 characters"
    } else if !repo_name_re().is_match(name) {
        "only letters, digits, '-', '_' and '.' are allowed, and the first character must be a letter or digit"
    } else {
        return Ok(());
    };
    Err(FlockError::InvalidName("repository", name.to_string(), reason.to_string()))
}

/// Check that `name` is usable as a GitHub Actions secret name.
pub fn validate_secret_name(name: &str) -> Result<()> {
    let reason = if !secret_name_re().is_match(name) {
        "only uppercase letters, digits and '_' are allowed, and it cannot start with a digit"
    } else if name.starts_with("GITHUB_") {
        "the GITHUB_ prefix is reserved"
    } else {
        return Ok(());
    };
    Err(FlockError::InvalidName("secret", name.to_string(), reason.to_string()))
}

/// Check that `topic` is acceptable to GitHub as a repository topic.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic_re().is_match(topic) {
        return Ok(());
    }
    Err(FlockError::InvalidName(
        "topic",
        topic.to_string(),
        "use at most 50 lowercase letters, digits and '-', starting with a letter or digit"
            .to_string(),
    ))
}

/// True when `id` has the shape produced by `RunRecord::new_id`.
///
/// Callers use this before turning an operator-supplied id into a path.
pub fn is_run_id(id: &str) -> bool {
    run_id_re().is_match(id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
