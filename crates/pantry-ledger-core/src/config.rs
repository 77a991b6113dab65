//! Resolver configuration.
//!
//! Defaults are tuned for supermarket receipts. Everything can be overridden
//! from a TOML document:
//!
//! ```toml
//! accept_threshold = 0.9
//! max_conflict_retries = 5
//!
//! [abbreviations]
//! lch = "leche"
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tunables for identity resolution.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverConfig {
    /// Scores above this surface a candidate duplicate
    pub duplicate_threshold: f64,
    /// Scores at or above this let the fuzzy fallback auto-bind
    pub accept_threshold: f64,
    /// Accepted candidates closer than this are ambiguous
    pub ambiguity_margin: f64,
    /// Global candidates pulled from the FTS index per resolution
    pub fts_candidate_limit: usize,
    /// Retries after losing a creation race
    pub max_conflict_retries: u32,
    /// How long a writer waits for a locked database
    pub busy_timeout_ms: u64,
    /// Extra abbreviation expansions (abbreviation → expansion)
    pub abbreviations: HashMap<String, String>,
    /// Extra filler words to drop from names
    pub filler_words: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.70,
            accept_threshold: 0.85,
            ambiguity_margin: 0.02,
            fts_candidate_limit: 50,
            max_conflict_retries: 3,
            busy_timeout_ms: 5_000,
            abbreviations: HashMap::new(),
            filler_words: Vec::new(),
        }
    }
}

impl ResolverConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: ResolverConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Check threshold ordering and ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.duplicate_threshold)
            || !(0.0..=1.0).contains(&self.accept_threshold)
        {
            return Err(ConfigError::Invalid(
                "thresholds must be within [0, 1]".into(),
            ));
        }
        if self.duplicate_threshold >= self.accept_threshold {
            return Err(ConfigError::Invalid(format!(
                "duplicate_threshold ({}) must be below accept_threshold ({})",
                self.duplicate_threshold, self.accept_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.ambiguity_margin) {
            return Err(ConfigError::Invalid(
                "ambiguity_margin must be within [0, 1)".into(),
            ));
        }
        if self.fts_candidate_limit == 0 {
            return Err(ConfigError::Invalid(
                "fts_candidate_limit must be positive".into(),
            ));
        }
        Ok(())
    }
}
