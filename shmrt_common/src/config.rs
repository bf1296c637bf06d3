//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across all shmrt applications.
//!
//! # Usage
//!
//! ```rust,no_run
//! use shmrt_common::config::{ConfigLoader, SharedConfig, ShmConfig, ConfigError};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct MyAppConfig {
//!     shared: SharedConfig,
//!     #[serde(default)]
//!     shm: ShmConfig,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = MyAppConfig::load(Path::new("config.toml"))?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::{DEFAULT_NAME_PREFIX, DEFAULT_SHM_MODE, MAX_PREFIX_LEN};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Common configuration fields shared across all shmrt applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "shmrt-stress-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared-memory runtime settings.
///
/// Every field has a default, so an absent `[shm]` table yields a usable
/// configuration.
///
/// # TOML Example
///
/// ```toml
/// [shm]
/// name_prefix = "shmrt_"
/// mode = 0o600
/// populate = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShmConfig {
    /// Prefix prepended to every OS object name.
    pub name_prefix: String,
    /// Permission bits for newly created objects.
    pub mode: u32,
    /// Prefault mapped pages (`MAP_POPULATE`) on create and attach.
    pub populate: bool,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            mode: DEFAULT_SHM_MODE,
            populate: false,
        }
    }
}

impl ShmConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `name_prefix` is empty, longer than `MAX_PREFIX_LEN` or contains `/` or NUL
    /// - `mode` has bits outside `0o777`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name_prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "name_prefix cannot be empty".to_string(),
            ));
        }
        if self.name_prefix.len() > MAX_PREFIX_LEN {
            return Err(ConfigError::ValidationError(format!(
                "name_prefix longer than {MAX_PREFIX_LEN} bytes"
            )));
        }
        if self.name_prefix.contains(['/', '\0']) {
            return Err(ConfigError::ValidationError(
                "name_prefix cannot contain '/' or NUL".to_string(),
            ));
        }
        if self.mode & !0o777 != 0 {
            return Err(ConfigError::ValidationError(format!(
                "mode {:#o} has bits outside 0o777",
                self.mode
            )));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
