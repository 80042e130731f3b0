//! Configuration management for clipstash
//!
//! This module handles loading, validating, and generating the TOML
//! configuration shared by the daemon and the CLI commands.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::clipboard::ClipboardBackend;
use crate::history::MAX_HISTORY;
use crate::poller::PollMode;

/// Largest accepted history capacity
pub const MAX_CAPACITY: usize = 1000;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error
    #[error("Config validation failed: {0}")]
    Validation(String),

    /// An ignore pattern is not a valid regular expression
    #[error("Invalid ignore pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// History storage settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Clipboard polling settings
    #[serde(default)]
    pub poller: PollerConfig,

    /// Noise filtering settings
    #[serde(default)]
    pub filter: FilterConfig,
}

/// History storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of entries to keep
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Path to the SQLite database
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Legacy history files imported when the daemon starts
    #[serde(default = "default_legacy_sources")]
    pub legacy_sources: Vec<PathBuf>,
}

/// Clipboard polling configuration
///
/// The optional fields override the values implied by `mode`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Polling profile
    #[serde(default)]
    pub mode: PollMode,

    /// Clipboard backend
    #[serde(default)]
    pub backend: ClipboardBackend,

    /// Seconds between polls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,

    /// Seconds to wait after a failed read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_secs: Option<u64>,

    /// Seconds to wait once `max_errors` consecutive reads have failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_secs: Option<u64>,

    /// Consecutive failures before backing off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_errors: Option<u32>,

    /// Check for images every N polls (0 disables image capture)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_every: Option<u32>,
}

/// Noise filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Shorter text (in characters) is treated as noise
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    /// Artifact substrings only count as noise below this length
    #[serde(default = "default_artifact_max_len")]
    pub artifact_max_len: usize,

    /// Substrings that mark short text as a program artifact
    #[serde(default = "default_artifacts")]
    pub artifacts: Vec<String>,

    /// Regular expressions; matching text is never recorded
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

// Default value functions
fn default_capacity() -> usize {
    MAX_HISTORY
}

fn default_database() -> PathBuf {
    PathBuf::from("~/.local/share/clipstash/history.db")
}

fn default_legacy_sources() -> Vec<PathBuf> {
    vec![
        PathBuf::from("~/.local/share/clipboard-manager/history.db"),
        PathBuf::from("~/.local/share/clipboard-manager/history.json"),
    ]
}

fn default_min_length() -> usize {
    3
}

fn default_artifact_max_len() -> usize {
    50
}

fn default_artifacts() -> Vec<String> {
    ["signal\"", "syscall\"", "time\"", "import", "package", "func"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            database: default_database(),
            legacy_sources: default_legacy_sources(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            artifact_max_len: default_artifact_max_len(),
            artifacts: default_artifacts(),
            ignore_patterns: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            history: HistoryConfig::default(),
            poller: PollerConfig::default(),
            filter: FilterConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path or the default locations
    ///
    /// Without a path, checks in order:
    /// 1. Path from CLIPSTASH_CONFIG environment variable
    /// 2. ~/.config/clipstash/config.toml
    /// 3. Built-in defaults
    pub fn load_config(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match config_path.map(Path::to_path_buf).or_else(Self::find_config_path) {
            Some(path) => Self::load_from_path(&path),
            None => {
                let mut config = Self::default();
                config.expand_paths();
                Ok(config)
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(toml_str)?;
        config.expand_paths();
        config.validate_config()?;
        Ok(config)
    }

    /// Where `load()` would read from, if a file exists there
    pub fn find_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CLIPSTASH_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        Self::default_config_path().filter(|p| p.exists())
    }

    /// `~/.config/clipstash/config.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("clipstash").join("config.toml"))
    }

    /// Expand tilde in paths
    fn expand_paths(&mut self) {
        self.history.database = expand_path(&self.history.database);
        for source in &mut self.history.legacy_sources {
            *source = expand_path(source);
        }
    }

    /// Validate configuration values
    pub fn validate_config(&self) -> Result<(), ConfigError> {
        if self.history.capacity < 1 {
            return Err(ConfigError::Validation(
                "history.capacity must be at least 1".to_string(),
            ));
        }
        if self.history.capacity > MAX_CAPACITY {
            return Err(ConfigError::Validation(format!(
                "history.capacity must not exceed {}",
                MAX_CAPACITY
            )));
        }

        let intervals = [
            ("poller.interval_secs", self.poller.interval_secs),
            ("poller.retry_secs", self.poller.retry_secs),
            ("poller.backoff_secs", self.poller.backoff_secs),
        ];
        for (name, value) in intervals {
            if value == Some(0) {
                return Err(ConfigError::Validation(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }
        if self.poller.max_errors == Some(0) {
            return Err(ConfigError::Validation(
                "poller.max_errors must be greater than 0".to_string(),
            ));
        }

        for pattern in &self.filter.ignore_patterns {
            regex::Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        }

        if !matches!(
            self.log_level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(ConfigError::Validation(format!(
                "log_level must be one of trace, debug, info, warn, error (got {:?})",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Validate configuration file at given path
    pub fn validate(path: &Path) -> Result<(), ConfigError> {
        Self::load_from_path(path).map(|_| ())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the commented example configuration to `path`
    pub fn write_example(path: &Path, force: bool) -> Result<(), ConfigError> {
        if !force && path.exists() {
            return Err(ConfigError::Validation(
                "Config file already exists. Use --force to overwrite.".to_string(),
            ));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::generate_example())?;
        Ok(())
    }

    /// Generate example configuration file
    pub fn generate_example() -> String {
        let config = Config::default();
        let quoted = |items: &[String]| {
            items
                .iter()
                .map(|s| format!("{:?}", s))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let legacy: Vec<String> = config
            .history
            .legacy_sources
            .iter()
            .map(|p| p.display().to_string())
            .collect();

        format!(
            r#"# clipstash configuration file
# Location: ~/.config/clipstash/config.toml

# Logging level (trace, debug, info, warn, error)
log_level = "{}"

[history]
# Number of clipboard entries to keep (1-{})
capacity = {}
# Path to the history database
database = "{}"
# Older history files imported (then renamed to *.backup) when the daemon starts
legacy_sources = [{}]

[poller]
# standard, text-only, minimal or passive
mode = "standard"
# auto, native or command (xclip / wl-clipboard)
backend = "auto"
# Uncomment to override the timings implied by the mode
# interval_secs = 2
# retry_secs = 3
# backoff_secs = 10
# max_errors = 5
# image_every = 3

[filter]
# Text shorter than this many characters is ignored
min_length = {}
# Short text containing one of these artifacts is ignored
artifact_max_len = {}
artifacts = [{}]
# Regular expressions for text that should never be recorded
ignore_patterns = []
"#,
            config.log_level,
            MAX_CAPACITY,
            config.history.capacity,
            config.history.database.display(),
            quoted(&legacy),
            config.filter.min_length,
            config.filter.artifact_max_len,
            quoted(&config.filter.artifacts),
        )
    }
}

/// Expand tilde in path
fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(path_str.as_ref());
    PathBuf::from(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.history.capacity, 50);
        assert_eq!(config.poller.mode, PollMode::Standard);
        assert_eq!(config.poller.backend, ClipboardBackend::Auto);
        assert_eq!(config.filter.min_length, 3);
        assert_eq!(config.filter.artifacts.len(), 6);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_load_from_toml() {
        let toml_str = r#"
            log_level = "debug"

            [history]
            capacity = 10
            database = "/tmp/clipstash-test.db"
            legacy_sources = []

            [poller]
            mode = "text-only"
            backend = "command"
            interval_secs = 7

            [filter]
            ignore_patterns = ["^secret"]
        "#;

        let config = Config::from_toml(toml_str).unwrap();
        assert_eq!(config.history.capacity, 10);
        assert_eq!(config.history.database, PathBuf::from("/tmp/clipstash-test.db"));
        assert!(config.history.legacy_sources.is_empty());
        assert_eq!(config.poller.mode, PollMode::TextOnly);
        assert_eq!(config.poller.backend, ClipboardBackend::Command);
        assert_eq!(config.poller.interval_secs, Some(7));
        assert_eq!(config.poller.retry_secs, None);
        assert_eq!(config.poller.backoff_secs, None);
        assert_eq!(config.filter.ignore_patterns, vec!["^secret"]);
        // Unset filter fields keep their defaults.
        assert_eq!(config.filter.min_length, 3);
    }

    #[test]
    fn test_tilde_is_expanded() {
        let config = Config::from_toml("[history]\ndatabase = \"~/h.db\"").unwrap();
        assert!(!config.history.database.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_validation_capacity() {
        assert!(Config::from_toml("[history]\ncapacity = 0").is_err());
        assert!(Config::from_toml("[history]\ncapacity = 1001").is_err());
        assert!(Config::from_toml("[history]\ncapacity = 1000").is_ok());
    }

    #[test]
    fn test_validation_intervals() {
        assert!(Config::from_toml("[poller]\ninterval_secs = 0").is_err());
        assert!(Config::from_toml("[poller]\nmax_errors = 0").is_err());
    }

    #[test]
    fn test_validation_patterns() {
        let result = Config::from_toml("[filter]\nignore_patterns = [\"(unclosed\"]");
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_validation_log_level() {
        assert!(Config::from_toml("log_level = \"loud\"").is_err());
    }

    #[test]
    fn test_example_parses_to_defaults() {
        let example = Config::generate_example();
        assert!(example.contains("clipstash configuration"));

        let parsed = Config::from_toml(&example).unwrap();
        let mut expected = Config::default();
        expected.expand_paths();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_write_example_respects_force() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("clipstash").join("config.toml");

        Config::write_example(&path, false).unwrap();
        assert!(Config::validate(&path).is_ok());
        assert!(Config::write_example(&path, false).is_err());
        assert!(Config::write_example(&path, true).is_ok());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = Config::default();
        config.poller.image_every = Some(0);
        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
