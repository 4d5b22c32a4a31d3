//! Configuration management for the ledger store

use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "chainledger.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tenants: TenantsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

/// Tenants that may be routed to even before they appear in the
/// provisioning registry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantsConfig {
    #[serde(default)]
    pub allow: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Rows per insert chunk. All chunks of one call share a single
    /// SQLite transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Parses a TOML document and validates it.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.is_empty() {
            return Err(LedgerError::Config(
                "database.path must not be empty".to_string(),
            ));
        }
        if self.ingest.batch_size == 0 {
            return Err(LedgerError::Config(
                "ingest.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.log_level().is_none() {
            return Err(LedgerError::Config(format!(
                "logging.level `{}` is not one of trace, debug, info, warn, error",
                self.logging.level
            )));
        }
        Ok(())
    }

    pub fn log_level(&self) -> Option<tracing::Level> {
        self.logging.level.parse().ok()
    }
}

/// Loads configuration from `path`, falling back to defaults when the file
/// does not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }

    let raw = fs::read_to_string(path)?;
    Config::from_toml_str(&raw)
}

fn default_db_path() -> String {
    "./data/chainledger.db".to_string()
}

fn default_batch_size() -> usize {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}
