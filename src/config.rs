//! Exporter configuration using Figment
//!
//! Configuration is layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. A TOML file (optional)
//! 3. Environment variables prefixed with `DAQ_METADATA_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! DAQ_METADATA_OUTPUT__DIRECTORY=/mnt/usb
//! DAQ_METADATA_OUTPUT__FILE_PREFIX="{plan_name}-{uid}-"
//! DAQ_METADATA_ENCODING__INDENT=2
//! DAQ_METADATA_LOGGING__LEVEL=debug
//! ```
//!
//! # Example config file
//!
//! ```toml
//! [output]
//! directory = "/data/runs"
//! file_prefix = "{time:%Y-%m-%d}_{uid}-"
//!
//! [encoding]
//! indent = 2
//! sort_keys = true
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use crate::data::encode::EncodingOptions;
use crate::template::{FilenameTemplate, DEFAULT_FILE_PREFIX};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "DAQ_METADATA_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read, or a value had the wrong type.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Values that loaded but make no sense together.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::LoadError(Box::new(err))
    }
}

/// Top-level exporter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Where and under which name the metadata file is written
    pub output: OutputConfig,
    /// JSON layout options
    pub encoding: EncodingOptions,
    /// Logging settings for the binary
    pub logging: LoggingConfig,
}

/// Output location configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory the metadata file is written to
    pub directory: PathBuf,
    /// File prefix template, rendered from the start document
    pub file_prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl ExportConfig {
    /// Load configuration from defaults, an optional TOML file and the
    /// environment, then validate it.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if a provider fails to parse or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(ExportConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate from an already assembled figment.
    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - The file prefix template parses
    /// - Custom separators are not empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        FilenameTemplate::parse(&self.output.file_prefix).map_err(|e| {
            ConfigError::ValidationError(format!(
                "Invalid file_prefix '{}': {e}",
                self.output.file_prefix
            ))
        })?;

        if let Some(separators) = &self.encoding.separators {
            if separators.item.is_empty() || separators.key.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Separators must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}
