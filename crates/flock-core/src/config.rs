use crate::error::{FlockError, Result};
use crate::naming::NamingStrategy;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// GithubConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Account or organisation that owns the repositories.
    #[serde(default)]
    pub owner: String,
    /// Create repositories under `/orgs/{owner}` instead of the token's user.
    #[serde(default)]
    pub organization: bool,
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            organization: false,
            token_env: default_github_token_env(),
            api_url: default_github_api_url(),
        }
    }
}

impl GithubConfig {
    pub fn token(&self) -> Result<String> {
        read_secret(&self.token_env)
    }
}

// ---------------------------------------------------------------------------
// TailscaleConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailscaleConfig {
    /// Tailnet name, or `-` for the key owner's default tailnet.
    #[serde(default = "default_tailnet")]
    pub tailnet: String,
    #[serde(default = "default_tailscale_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_tailscale_api_url")]
    pub api_url: String,
    #[serde(default = "default_expiry_days")]
    pub expiry_days: u32,
    #[serde(default = "default_true")]
    pub reusable: bool,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default = "default_true")]
    pub preauthorized: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_tailnet() -> String {
    "-".to_string()
}

fn default_tailscale_key_env() -> String {
    "TAILSCALE_API_KEY".to_string()
}

fn default_tailscale_api_url() -> String {
    "https://api.tailscale.com/api/v2".to_string()
}

fn default_expiry_days() -> u32 {
    90
}

fn default_true() -> bool {
    true
}

impl Default for TailscaleConfig {
    fn default() -> Self {
        Self {
            tailnet: default_tailnet(),
            api_key_env: default_tailscale_key_env(),
            api_url: default_tailscale_api_url(),
            expiry_days: default_expiry_days(),
            reusable: true,
            ephemeral: false,
            preauthorized: true,
            tags: Vec::new(),
        }
    }
}

impl TailscaleConfig {
    pub fn api_key(&self) -> Result<String> {
        read_secret(&self.api_key_env)
    }
}

// ---------------------------------------------------------------------------
// ReposConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReposConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub private: bool,
    /// Create an initial commit so the default branch exists.
    #[serde(default = "default_true")]
    pub auto_init: bool,
    #[serde(default = "default_true")]
    pub has_issues: bool,
    #[serde(default)]
    pub has_wiki: bool,
    #[serde(default)]
    pub has_projects: bool,
    /// Replaces the topic list of every created repository when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
    #[serde(default = "default_repo_count")]
    pub count: usize,
    #[serde(default)]
    pub naming: NamingStrategy,
}

fn default_repo_count() -> usize {
    10
}

impl Default for ReposConfig {
    fn default() -> Self {
        Self {
            description: String::new(),
            private: true,
            auto_init: true,
            has_issues: true,
            has_wiki: false,
            has_projects: false,
            topics: Vec::new(),
            count: default_repo_count(),
            naming: NamingStrategy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryConfig / HttpConfig / CheckpointConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    7
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl CheckpointConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 3600)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub tailscale: TailscaleConfig,
    #[serde(default)]
    pub repos: ReposConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub checkpoints: CheckpointConfig,
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(FlockError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.github.owner.trim().is_empty() {
            warnings.push(ConfigWarning::warning(
                "github.owner is empty; repository and workflow commands will fail",
            ));
        }

        for (field, url) in [
            ("github.api_url", &self.github.api_url),
            ("tailscale.api_url", &self.tailscale.api_url),
        ] {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                warnings.push(ConfigWarning::error(format!(
                    "{field} must be an http(s) URL, got '{url}'"
                )));
            }
        }

        if self.tailscale.expiry_days == 0 || self.tailscale.expiry_days > 90 {
            warnings.push(ConfigWarning::warning(format!(
                "tailscale.expiry_days is {}; Tailscale accepts 1 to 90 days",
                self.tailscale.expiry_days
            )));
        }

        for tag in &self.tailscale.tags {
            if !tag.starts_with("tag:") {
                warnings.push(ConfigWarning::error(format!(
                    "tailscale tag '{tag}' must start with 'tag:'"
                )));
            }
        }

        for topic in &self.repos.topics {
            if let Err(e) = paths::validate_topic(topic) {
                warnings.push(ConfigWarning::error(e.to_string()));
            }
        }

        if !(crate::naming::MIN_BATCH..=crate::naming::MAX_BATCH).contains(&self.repos.count) {
            warnings.push(ConfigWarning::error(format!(
                "repos.count must be between {} and {}, got {}",
                crate::naming::MIN_BATCH,
                crate::naming::MAX_BATCH,
                self.repos.count
            )));
        }

        if self.retry.max_attempts == 0 {
            warnings.push(ConfigWarning::error("retry.max_attempts must be at least 1"));
        }

        if self.http.timeout_secs == 0 {
            warnings.push(ConfigWarning::error("http.timeout_secs must be at least 1"));
        }

        warnings
    }

    /// Check the credential environment variables named by this config.
    ///
    /// Missing credentials are only warnings: a repository batch does not
    /// need the Tailscale key and vice versa.
    pub fn check_credentials(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        match self.github.token() {
            Ok(token) => {
                if !(token.starts_with("ghp_") || token.starts_with("github_pat_")) {
                    warnings.push(ConfigWarning::warning(format!(
                        "{} does not look like a GitHub personal access token",
                        self.github.token_env
                    )));
                } else if token.len() < 20 {
                    warnings.push(ConfigWarning::warning(format!(
                        "{} is too short to be a GitHub token",
                        self.github.token_env
                    )));
                }
            }
            Err(e) => warnings.push(ConfigWarning::warning(e.to_string())),
        }

        match self.tailscale.api_key() {
            Ok(key) => {
                if !key.starts_with("tskey-") {
                    warnings.push(ConfigWarning::warning(format!(
                        "{} does not look like a Tailscale API key",
                        self.tailscale.api_key_env
                    )));
                } else if key.len() < 30 {
                    warnings.push(ConfigWarning::warning(format!(
                        "{} is too short to be a Tailscale API key",
                        self.tailscale.api_key_env
                    )));
                }
            }
            Err(e) => warnings.push(ConfigWarning::warning(e.to_string())),
        }

        warnings
    }
}

fn read_secret(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(FlockError::MissingCredential(var.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_yaml_gets_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.github.token_env, "GITHUB_TOKEN");
        assert_eq!(cfg.tailscale.tailnet, "-");
        assert_eq!(cfg.tailscale.expiry_days, 90);
        assert!(cfg.tailscale.reusable);
        assert!(cfg.repos.private);
        assert!(cfg.repos.has_issues);
        assert!(!cfg.repos.has_wiki);
        assert!(!cfg.repos.has_projects);
        assert!(cfg.repos.topics.is_empty());
        assert_eq!(cfg.repos.naming, NamingStrategy::AutoGenerate);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.http.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.checkpoints.retention(), Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let yaml = r#"
github:
  owner: octo-org
repos:
  count: 3
  naming:
    strategy: sequential
    prefix: svc
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.github.owner, "octo-org");
        assert_eq!(cfg.github.api_url, "https://api.github.com");
        assert_eq!(cfg.repos.count, 3);
        assert_eq!(
            cfg.repos.naming,
            NamingStrategy::Sequential {
                prefix: "svc".into()
            }
        );
        assert!(cfg.repos.auto_init);
    }

    #[test]
    fn load_without_init_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(FlockError::NotInitialized)
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.github.owner = "octo".into();
        cfg.tailscale.tags = vec!["tag:ci".into()];
        cfg.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.github.owner, "octo");
        assert_eq!(loaded.tailscale.tags, ["tag:ci"]);
    }

    #[test]
    fn default_config_only_warns_about_owner() {
        let warnings = Config::default().validate();
        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert_eq!(warnings[0].level, WarnLevel::Warning);
        assert!(warnings[0].message.contains("github.owner"));
    }

    #[test]
    fn validate_flags_bad_values() {
        let mut cfg = Config::default();
        cfg.github.owner = "octo".into();
        cfg.repos.count = 0;
        cfg.retry.max_attempts = 0;
        cfg.tailscale.tags = vec!["ci".into()];
        cfg.github.api_url = "api.github.com".into();
        cfg.repos.topics = vec!["ok-topic".into(), "Not OK".into()];

        let errors: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .collect();
        assert_eq!(errors.len(), 5, "{errors:?}");
    }

    #[test]
    fn missing_credentials_are_warnings() {
        let mut cfg = Config::default();
        cfg.github.token_env = "FLOCK_TEST_UNSET_GITHUB_TOKEN_5c1e".into();
        cfg.tailscale.api_key_env = "FLOCK_TEST_UNSET_TS_KEY_5c1e".into();
        let warnings = cfg.check_credentials();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.level == WarnLevel::Warning));
        assert!(matches!(
            cfg.github.token(),
            Err(FlockError::MissingCredential(_))
        ));
    }
}
