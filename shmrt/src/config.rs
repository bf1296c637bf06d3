//! CLI configuration file
//!
//! ```toml
//! [shared]
//! log_level = "debug"
//! service_name = "shmrt-ops"
//!
//! [shm]
//! name_prefix = "shmrt_"
//! mode = 0o600
//! ```
//!
//! Both tables are optional; without a file every default applies.

use serde::Deserialize;
use shmrt_common::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig, ShmConfig};
use std::path::Path;

/// Top-level configuration of the `shmrt` binary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    /// Common service settings
    #[serde(default)]
    pub shared: Option<SharedConfig>,
    /// Runtime settings
    #[serde(default)]
    pub shm: ShmConfig,
}

impl CliConfig {
    /// Load and validate `path`, or fall back to defaults when `None`.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every table present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(shared) = &self.shared {
            shared.validate()?;
        }
        self.shm.validate()
    }

    /// Log level from the file, `info` when unset.
    pub fn log_level(&self) -> LogLevel {
        self.shared
            .as_ref()
            .map(|shared| shared.log_level)
            .unwrap_or_default()
    }
}
