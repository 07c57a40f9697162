//! Engine configuration
//!
//! Loaded from YAML. Every field has a default, so an empty document (or no
//! file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub const DEFAULT_HONORIFICS: &[&str] = &[
    "mr", "mrs", "ms", "miss", "mx", "dr", "prof", "sir", "dame", "president", "senator", "sen", "rep", "gov",
    "governor", "mayor", "judge", "justice", "rev", "father", "sister", "general", "gen", "col", "capt", "lt",
    "sgt", "minister", "chancellor", "king", "queen", "prince", "princess", "lord", "lady",
];

/// Entity resolution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Fall back to fuzzy alias matching when exact lookups miss
    pub fuzzy_matching: bool,
    /// Largest Levenshtein distance treated as the same name
    pub max_edit_distance: usize,
    /// Both keys must be at least this many characters for edit-distance matching
    pub min_fuzzy_len: usize,
    /// Extra create attempts after a uniqueness conflict
    pub max_conflict_retries: usize,
    /// Titles stripped from the front of PERSON mentions
    pub honorifics: Vec<String>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            fuzzy_matching: true,
            max_edit_distance: 1,
            min_fuzzy_len: 6,
            max_conflict_retries: 1,
            honorifics: DEFAULT_HONORIFICS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Characters kept on each side of a mention
    pub window_size: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { window_size: 80 }
    }
}

/// Trend detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    pub bucket_seconds: i64,
    /// Standard deviations above the baseline mean a bucket must exceed
    pub k: f64,
    /// Entities with fewer non-empty buckets are ignored
    pub min_active_buckets: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            bucket_seconds: 86_400,
            k: 2.0,
            min_active_buckets: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_concurrent_runs: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_concurrent_runs: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn tracing_level(&self) -> Result<tracing::Level, ConfigError> {
        self.level
            .parse::<tracing::Level>()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level: {}", self.level)))
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub resolution: ResolutionConfig,
    pub context: ContextConfig,
    pub trends: TrendConfig,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
}

impl TrackerConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: TrackerConfig = if yaml.trim().is_empty() {
            TrackerConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trends.bucket_seconds <= 0 {
            return Err(ConfigError::Invalid("trends.bucket_seconds must be positive".into()));
        }
        if !self.trends.k.is_finite() || self.trends.k < 0.0 {
            return Err(ConfigError::Invalid("trends.k must be a non-negative number".into()));
        }
        if self.trends.min_active_buckets < 2 {
            return Err(ConfigError::Invalid("trends.min_active_buckets must be at least 2".into()));
        }
        if self.context.window_size == 0 {
            return Err(ConfigError::Invalid("context.window_size must be positive".into()));
        }
        if self.dispatch.max_concurrent_runs == 0 {
            return Err(ConfigError::Invalid("dispatch.max_concurrent_runs must be positive".into()));
        }
        self.logging.tracing_level()?;
        Ok(())
    }
}
