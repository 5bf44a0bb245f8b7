//! Repository name generation for batch creation.

use crate::error::{FlockError, Result};
use crate::paths::validate_repo_name;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const MIN_BATCH: usize = 1;
pub const MAX_BATCH: usize = 100;

const AUTO_PREFIXES: &[&str] = &[
    "nexus", "vertex", "core", "edge", "flux", "quantum", "matrix", "prism", "cipher", "node",
    "apex", "zenith", "pixel", "spark", "forge", "pulse", "byte", "scope", "drift", "mesh",
    "atlas", "titan", "summit", "beacon", "orbit", "nova", "azure", "echo", "wave", "bloom",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum NamingStrategy {
    /// `github-<word>-NN`, cycling through a fixed word list.
    #[default]
    AutoGenerate,
    /// `<prefix>-NN`.
    Custom {
        #[serde(default = "default_custom_prefix")]
        prefix: String,
    },
    /// `<prefix>-NN`.
    Sequential {
        #[serde(default = "default_sequential_prefix")]
        prefix: String,
    },
    /// One name per non-blank line of a text file.
    ImportFile { path: PathBuf },
}

fn default_custom_prefix() -> String {
    "repo".to_string()
}

fn default_sequential_prefix() -> String {
    "project".to_string()
}

impl NamingStrategy {
    /// Produce `count` validated names. Relative import paths resolve against `root`.
    ///
    /// An import file with fewer lines than `count` yields only the names it has.
    pub fn generate(&self, count: usize, root: &Path) -> Result<Vec<String>> {
        if !(MIN_BATCH..=MAX_BATCH).contains(&count) {
            return Err(FlockError::Configuration(format!(
                "batch size {count} out of range {MIN_BATCH}..={MAX_BATCH}"
            )));
        }

        let names: Vec<String> = match self {
            NamingStrategy::AutoGenerate => (0..count)
                .map(|i| {
                    let word = AUTO_PREFIXES[i % AUTO_PREFIXES.len()];
                    format!("github-{word}-{:02}", i + 1)
                })
                .collect(),
            NamingStrategy::Custom { prefix } | NamingStrategy::Sequential { prefix } => {
                numbered(prefix, count)
            }
            NamingStrategy::ImportFile { path } => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    root.join(path)
                };
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    FlockError::Configuration(format!(
                        "cannot read names file {}: {e}",
                        path.display()
                    ))
                })?;
                let names = parse_names(&content, count);
                if names.len() < count {
                    warn!(
                        file = %path.display(),
                        wanted = count,
                        found = names.len(),
                        "names file has fewer entries than requested"
                    );
                }
                names
            }
        };

        for name in &names {
            validate_repo_name(name)?;
        }
        Ok(names)
    }
}

fn numbered(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{prefix}-{i:02}")).collect()
}

/// Non-blank, trimmed lines, `#` comments skipped, at most `limit`.
pub fn parse_names(content: &str, limit: usize) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .take(limit)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn auto_generate_cycles_words() {
        let names = NamingStrategy::AutoGenerate
            .generate(3, Path::new("."))
            .unwrap();
        assert_eq!(names, ["github-nexus-01", "github-vertex-02", "github-core-03"]);
    }

    #[test]
    fn auto_generate_wraps_word_list() {
        let n = AUTO_PREFIXES.len() + 1;
        let names = NamingStrategy::AutoGenerate
            .generate(n, Path::new("."))
            .unwrap();
        assert_eq!(names.last().unwrap(), &format!("github-nexus-{n:02}"));
    }

    #[test]
    fn sequential_pads_numbers() {
        let s = NamingStrategy::Sequential {
            prefix: "svc".into(),
        };
        assert_eq!(s.generate(2, Path::new(".")).unwrap(), ["svc-01", "svc-02"]);
    }

    #[test]
    fn count_bounds_are_enforced() {
        let s = NamingStrategy::AutoGenerate;
        assert!(s.generate(0, Path::new(".")).is_err());
        assert!(s.generate(101, Path::new(".")).is_err());
        assert_eq!(s.generate(100, Path::new(".")).unwrap().len(), 100);
    }

    #[test]
    fn import_file_truncates_and_skips_blanks() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("names.txt"), "alpha\n\n  beta  \n# skip\ngamma\n").unwrap();
        let s = NamingStrategy::ImportFile {
            path: "names.txt".into(),
        };
        assert_eq!(s.generate(2, dir.path()).unwrap(), ["alpha", "beta"]);
        assert_eq!(s.generate(10, dir.path()).unwrap(), ["alpha", "beta", "gamma"]);
    }

    #[test]
    fn import_file_rejects_invalid_names() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("names.txt"), "good\nbad name\n").unwrap();
        let s = NamingStrategy::ImportFile {
            path: dir.path().join("names.txt"),
        };
        let err = s.generate(5, dir.path()).unwrap_err();
        assert!(matches!(err, FlockError::InvalidName(_, ref n, _) if n == "bad name"));
    }

    #[test]
    fn missing_import_file_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let s = NamingStrategy::ImportFile {
            path: "nope.txt".into(),
        };
        assert!(matches!(
            s.generate(1, dir.path()),
            Err(FlockError::Configuration(_))
        ));
    }

    #[test]
    fn strategy_yaml_shape() {
        let s: NamingStrategy = serde_yaml::from_str("strategy: custom\nprefix: demo\n").unwrap();
        assert_eq!(
            s,
            NamingStrategy::Custom {
                prefix: "demo".into()
            }
        );
        let d: NamingStrategy = serde_yaml::from_str("strategy: sequential\n").unwrap();
        assert_eq!(
            d,
            NamingStrategy::Sequential {
                prefix: "project".into()
            }
        );
    }
}
