//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.
//! Command-line flags override both.

use crate::index::{BuildOptions, FingerprintMode};
use crate::query::RefineMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Index layout configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_tile_size")]
    pub tile_size: usize,

    #[serde(default)]
    pub fingerprint: FingerprintMode,
}

fn default_tile_size() -> usize {
    493
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            tile_size: default_tile_size(),
            fingerprint: FingerprintMode::default(),
        }
    }
}

/// Index build configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// 0 = one worker per CPU
    #[serde(default)]
    pub jobs: usize,

    /// 0 = no checkpoints
    #[serde(default)]
    pub checkpoint_interval: usize,
}

fn default_pattern() -> String {
    "*.swath".to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
            jobs: 0,
            checkpoint_interval: 0,
        }
    }
}

/// Query defaults
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub refine: RefineMode,

    /// Variables returned when a query names none
    #[serde(default)]
    pub variables: Vec<String>,

    /// 0 = one reader per CPU
    #[serde(default)]
    pub jobs: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("swathdb").join("config.toml")),
            Some(PathBuf::from("/etc/swathdb/config.toml")),
            Some(PathBuf::from("./swathdb.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::debug!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load an explicit file if given, otherwise search the default locations
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_with_env(path),
            None => Ok(Self::load_default()),
        }
    }

    /// Build options seeded from this configuration
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            tile_size: self.index.tile_size,
            pattern: self.build.pattern.clone(),
            jobs: self.build.jobs,
            fingerprint: self.index.fingerprint,
            checkpoint_interval: self.build.checkpoint_interval,
            ..Default::default()
        }
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(size) = var("SWATHDB_TILE_SIZE") {
            match size.parse() {
                Ok(n) => self.index.tile_size = n,
                Err(_) => tracing::warn!("Ignoring invalid SWATHDB_TILE_SIZE: {}", size),
            }
        }
        if let Some(pattern) = var("SWATHDB_PATTERN") {
            self.build.pattern = pattern;
        }
        if let Some(jobs) = var("SWATHDB_JOBS") {
            match jobs.parse() {
                Ok(n) => {
                    self.build.jobs = n;
                    self.query.jobs = n;
                }
                Err(_) => tracing::warn!("Ignoring invalid SWATHDB_JOBS: {}", jobs),
            }
        }

        if let Some(level) = var("SWATHDB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("SWATHDB_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# SwathDB Configuration
#
# Environment variables override these settings:
# - SWATHDB_TILE_SIZE
# - SWATHDB_PATTERN
# - SWATHDB_JOBS
# - SWATHDB_LOG_LEVEL
# - SWATHDB_LOG_FORMAT

[index]
# Along-track rows per tile. Changing it requires `build --rebuild`.
tile_size = 493

# Change detection: metadata (size + mtime) or checksum (size + CRC32)
fingerprint = "metadata"

[build]
# File name glob, matched against the relative path when it contains '/'
pattern = "*.swath"

# Parallel file readers, 0 = one per CPU
jobs = 0

# Save the index every N newly tiled files, 0 = only at the end
checkpoint_interval = 0

[query]
# points: samples inside the box; lines: whole rows touching the box
refine = "points"

# Variables returned when a query does not name any
variables = []

# Parallel file readers, 0 = one per CPU
jobs = 0

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for terminals) or json (for log collectors)
format = "pretty"
"#
    .to_string()
}
