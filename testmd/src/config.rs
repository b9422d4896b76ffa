//! Configuration for where accepted files live and how permutations are re-run

use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

/// Environment variable forcing every permutation to be verified again
pub const FORCE_RUN_ENV: &str = "TESTMD_FORCE_RUN";

/// Environment variable overriding [`Config::base_directory`]
pub const BASE_DIRECTORY_ENV: &str = "TESTMD_BASE_DIRECTORY";

/// Extension appended to the test group path
pub const ACCEPTED_FILE_SUFFIX: &str = ".accepted.md";

/// testmd configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directory accepted files are stored under
    #[serde(default = "default_base_directory")]
    pub base_directory: PathBuf,

    /// Verify every permutation, ignoring previous results
    #[serde(default)]
    pub force_rerun: bool,

    /// Keep accepted results of tests that did not run this session.
    ///
    /// Off by default: when two or more tests of a group ran, tests that did not run
    /// are treated as deleted and removed from the accepted file. A session that ran a
    /// single test always keeps the others, so focused runs never drop results.
    #[serde(default)]
    pub retain_unrun_tests: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_directory: default_base_directory(),
            force_rerun: false,
            retain_unrun_tests: false,
        }
    }
}

fn default_base_directory() -> PathBuf {
    PathBuf::from("tests/accepted")
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;

        Self::from_toml(&content).map_err(|error| match error {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|error| ConfigError::Parse {
            path: PathBuf::new(),
            error,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(
            std::env::var(FORCE_RUN_ENV).ok().as_deref(),
            std::env::var(BASE_DIRECTORY_ENV).ok().as_deref(),
        )
    }

    fn with_overrides(
        mut self,
        force_run: Option<&str>,
        base_directory: Option<&str>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = force_run.map(str::trim).filter(|v| !v.is_empty()) {
            self.force_rerun = parse_flag(FORCE_RUN_ENV, value)?;
        }
        if let Some(dir) = base_directory.map(str::trim).filter(|v| !v.is_empty()) {
            self.base_directory = PathBuf::from(dir);
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "base_directory".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Location of the accepted file for a test group.
    ///
    /// `my_crate::parser::tests` (or `my_crate.parser.tests`) maps to
    /// `<base>/my_crate/parser/tests.accepted.md`.
    pub fn location_for(&self, test_group: &str) -> PathBuf {
        let segments: Vec<&str> = test_group
            .split("::")
            .flat_map(|part| part.split('.'))
            .filter(|part| !part.is_empty())
            .collect();

        let mut path = self.base_directory.clone();
        if let Some((last, dirs)) = segments.split_last() {
            for dir in dirs {
                path.push(dir);
            }
            path.push(format!("{}{}", last, ACCEPTED_FILE_SUFFIX));
        }
        path
    }
}

fn parse_flag(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            field: field.to_string(),
            message: format!("expected a boolean, found \"{}\"", value),
        }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error for {path:?}: {error}")]
    Io { path: PathBuf, error: std::io::Error },

    #[error("Parse error for {path:?}: {error}")]
    Parse { path: PathBuf, error: toml::de::Error },

    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_location_for_module_path() {
        let config = Config {
            base_directory: PathBuf::from("accepted"),
            ..Config::default()
        };
        assert_eq!(
            config.location_for("my_crate::parser::tests"),
            PathBuf::from("accepted/my_crate/parser/tests.accepted.md")
        );
        assert_eq!(
            config.location_for("com.example.ExampleTest"),
            PathBuf::from("accepted/com/example/ExampleTest.accepted.md")
        );
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(&temp_dir.path().join("testmd.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("testmd.toml");
        fs::write(&path, "base_directory = \"golden\"\nforce_rerun = true\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.base_directory, PathBuf::from("golden"));
        assert!(config.force_rerun);
        assert!(!config.retain_unrun_tests);
    }

    #[test]
    fn test_invalid_toml_names_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("testmd.toml");
        fs::write(&path, "force_rerun = \"maybe\"").unwrap();

        match Config::load(&path) {
            Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_overrides() {
        let config = Config::default()
            .with_overrides(Some("TRUE"), Some("other"))
            .unwrap();
        assert!(config.force_rerun);
        assert_eq!(config.base_directory, PathBuf::from("other"));

        let err = Config::default().with_overrides(Some("sometimes"), None);
        assert!(matches!(err, Err(ConfigError::Invalid { .. })));
    }
}
