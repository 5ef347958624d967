//! Configuration management.
//!
//! This module handles loading, parsing, and validation of configuration
//! files. Every section falls back to sensible defaults, so a missing file
//! is not an error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_SYNC_MAX_RETRIES, PBKDF2_DEFAULT_ITERATIONS, PBKDF2_MIN_ITERATIONS};
use crate::error::{Error, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub crypto: CryptoConfig,
    pub logging: LoggingConfig,
}

/// Retry queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts before a queued operation is dropped as a permanent failure.
    pub max_retries: u32,
}

/// Key derivation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2-HMAC-SHA256 iteration count. Values below the floor are
    /// rejected by [`Config::validate`].
    pub kdf_iterations: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable logging.
    pub enabled: bool,
    /// Optional log file; stderr only when absent.
    pub file: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_SYNC_MAX_RETRIES,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: PBKDF2_DEFAULT_ITERATIONS,
        }
    }
}

impl Config {
    /// Load configuration from file or return defaults.
    pub fn load() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Configuration(format!(
                "failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| {
            Error::Configuration(format!(
                "failed to parse config file {}: {e}",
                path.as_ref().display()
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in order of precedence.
    fn find_config_file() -> Option<PathBuf> {
        // 1. Current directory
        let current_dir_config = PathBuf::from("taskstash.toml");
        if current_dir_config.exists() {
            return Some(current_dir_config);
        }

        // 2. XDG config directory
        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("taskstash").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_retries == 0 {
            return Err(Error::Configuration("max_retries must be at least 1".into()));
        }

        // The iteration floor is a hard invariant, not a tunable default.
        if self.crypto.kdf_iterations < PBKDF2_MIN_ITERATIONS {
            return Err(Error::Configuration(format!(
                "kdf_iterations must be at least {PBKDF2_MIN_ITERATIONS}, got {}",
                self.crypto.kdf_iterations
            )));
        }

        Ok(())
    }
}
