//! Configuration loading and validation.
//!
//! Configuration is explicit: a [`Config`] is loaded from a YAML file,
//! validated eagerly, and passed into constructors. There are no
//! process-wide singletons and no environment probing in the core.

use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Connection settings for one CRM account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Account base URL, e.g. `https://example.amocrm.ru`.
    pub base_url: String,

    /// Long-lived API token.
    pub token: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Page size for list endpoints.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

/// Transfer-run behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Bounded fan-out: entities migrated concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts per remote call before a transient failure becomes a warning.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Timeout per remote call in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry_attempts: default_retry_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source account (amoCRM side).
    pub source: ClientConfig,

    /// Destination account (Kommo side).
    pub target: ClientConfig,

    /// Field mapping store file.
    pub mapping_file: PathBuf,

    /// Migration index file.
    pub index_file: PathBuf,

    #[serde(default)]
    pub migration: RunConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        for (side, client) in [("source", &self.source), ("target", &self.target)] {
            if client.base_url.is_empty() {
                return Err(MigrateError::Config(format!("{}: base_url is empty", side)));
            }
            if client.token.is_empty() {
                return Err(MigrateError::Config(format!("{}: token is empty", side)));
            }
            if client.timeout_secs == 0 {
                return Err(MigrateError::Config(format!(
                    "{}: timeout_secs must be positive",
                    side
                )));
            }
        }
        if self.migration.workers == 0 {
            return Err(MigrateError::Config("workers must be at least 1".into()));
        }
        if self.migration.retry_attempts == 0 {
            return Err(MigrateError::Config(
                "retry_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> usize {
    250
}

fn default_workers() -> usize {
    4
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    30
}
