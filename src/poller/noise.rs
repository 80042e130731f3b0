//! Heuristics that keep program artifacts and user-excluded text out of history

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{ConfigError, FilterConfig};

/// Filter built from the default configuration
static DEFAULT_FILTER: Lazy<NoiseFilter> = Lazy::new(|| {
    let config = FilterConfig::default();
    NoiseFilter {
        min_length: config.min_length,
        artifact_max_len: config.artifact_max_len,
        artifacts: config.artifacts,
        ignore: Vec::new(),
    }
});

/// Check text against the built-in rules
pub fn is_system_noise(text: &str) -> bool {
    DEFAULT_FILTER.is_noise(text)
}

/// Decides whether captured text is worth recording
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    min_length: usize,
    artifact_max_len: usize,
    artifacts: Vec<String>,
    ignore: Vec<Regex>,
}

impl Default for NoiseFilter {
    fn default() -> Self {
        DEFAULT_FILTER.clone()
    }
}

impl NoiseFilter {
    pub fn from_config(config: &FilterConfig) -> Result<Self, ConfigError> {
        let ignore = config
            .ignore_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            min_length: config.min_length,
            artifact_max_len: config.artifact_max_len,
            artifacts: config.artifacts.clone(),
            ignore,
        })
    }

    /// Check if text should be dropped instead of recorded
    pub fn is_noise(&self, text: &str) -> bool {
        if self.ignore.iter().any(|pattern| pattern.is_match(text)) {
            return true;
        }

        let length = text.chars().count();
        if length < self.min_length {
            return true;
        }

        // Debuggers and editors leave short fragments like `time"` behind
        length < self.artifact_max_len
            && self
                .artifacts
                .iter()
                .any(|artifact| text.contains(artifact.as_str()))
    }
}
