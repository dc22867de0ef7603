//! Engine Configuration
//!
//! Settings for a [`Runtime`](crate::execution::Runtime), loadable from a
//! YAML file. Every field is optional in the file and falls back to its
//! default.
//!
//! ```yaml
//! max_parallel: 8
//! concurrency: reject
//! snapshot_dir: /var/lib/durastep
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execution::ConcurrencyPolicy;

/// Environment variable overriding the default snapshot directory.
pub const SNAPSHOT_DIR_ENV: &str = "DURASTEP_SNAPSHOT_DIR";

/// Lazily-resolved default snapshot directory.
pub static DEFAULT_SNAPSHOT_DIR: Lazy<PathBuf> = Lazy::new(|| {
    match std::env::var_os(SNAPSHOT_DIR_ENV) {
        Some(dir) if !dir.is_empty() => {
            info!("Using snapshot directory from {}", SNAPSHOT_DIR_ENV);
            PathBuf::from(dir)
        }
        _ => PathBuf::from(".durastep"),
    }
});

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("max_parallel must be at least 1")]
    InvalidParallel,
}

/// Runtime settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of steps executing at once
    pub max_parallel: usize,

    /// What a second start/resume on a busy run does
    pub concurrency: ConcurrencyPolicy,

    /// Where the file snapshot store keeps its files
    pub snapshot_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: num_cpus::get().max(1),
            concurrency: ConcurrencyPolicy::default(),
            snapshot_dir: DEFAULT_SNAPSHOT_DIR.clone(),
        }
    }
}

impl EngineConfig {
    /// Loads a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_yaml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses a configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        // An empty file is a valid, all-defaults config
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        debug!("Parsed configuration: {:?}", config);
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel == 0 {
            return Err(ConfigError::InvalidParallel);
        }
        Ok(())
    }
}
