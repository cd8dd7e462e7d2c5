//! Configuration management for the fan-out coordinator
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and sensible defaults.
//!
//! ```toml
//! [filter]
//! read = "allow_all"
//! write = "local_only"
//! complete_tags = "allow_all"
//!
//! [cost]
//! enabled = true
//! query_limit = 10000000
//! block_limit = 1000000
//!
//! [monitoring]
//! metrics_enabled = true
//! log_level = "info"
//! ```

use crate::error::{Error, Result, ValidationError};
use crate::storage::filter::FilterPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Backend selection policies
    #[serde(default)]
    pub filter: FilterConfig,

    /// Query cost accounting
    #[serde(default)]
    pub cost: CostConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Backend selection policy per request kind
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FilterConfig {
    /// Policy for fetch, search and block requests
    #[serde(default)]
    pub read: FilterPolicy,

    /// Policy for writes
    #[serde(default)]
    pub write: FilterPolicy,

    /// Policy for tag completion
    #[serde(default)]
    pub complete_tags: FilterPolicy,
}

/// Cost accounting configuration
///
/// Limits count datapoints appended to blocks.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CostConfig {
    /// Enforce the limits below
    #[serde(default)]
    pub enabled: bool,

    /// Maximum datapoints held by one query
    #[serde(default = "default_query_limit")]
    pub query_limit: u64,

    /// Maximum datapoints held by one block
    #[serde(default = "default_block_limit")]
    pub block_limit: u64,
}

/// Monitoring configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log filter (a level such as `info`, or an `EnvFilter` directive)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_query_limit() -> u64 { 10_000_000 }
fn default_block_limit() -> u64 { 1_000_000 }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            query_limit: default_query_limit(),
            block_limit: default_block_limit(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
        }
    }
}

impl MonitoringConfig {
    /// Install a global `tracing` subscriber filtered by `log_level`
    ///
    /// `RUST_LOG`, when set, takes precedence. Fails if a global subscriber
    /// is already installed.
    pub fn init_tracing(&self) -> Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.log_level));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .try_init()
            .map_err(|e| Error::Configuration(format!("Failed to initialize tracing: {}", e)))
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        // Filters
        override_policy("FANOUT_READ_FILTER", &mut self.filter.read);
        override_policy("FANOUT_WRITE_FILTER", &mut self.filter.write);
        override_policy("FANOUT_COMPLETE_TAGS_FILTER", &mut self.filter.complete_tags);

        // Cost
        override_parsed("FANOUT_COST_ENABLED", &mut self.cost.enabled);
        override_parsed("FANOUT_QUERY_LIMIT", &mut self.cost.query_limit);
        override_parsed("FANOUT_BLOCK_LIMIT", &mut self.cost.block_limit);

        // Monitoring
        override_parsed("FANOUT_METRICS_ENABLED", &mut self.monitoring.metrics_enabled);
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.cost.enabled {
            if self.cost.query_limit == 0 {
                return Err(ValidationError::OutOfRange {
                    field: "cost.query_limit".to_string(),
                    value: "0".to_string(),
                    min: "1".to_string(),
                    max: u64::MAX.to_string(),
                });
            }
            if self.cost.block_limit == 0 || self.cost.block_limit > self.cost.query_limit {
                return Err(ValidationError::OutOfRange {
                    field: "cost.block_limit".to_string(),
                    value: self.cost.block_limit.to_string(),
                    min: "1".to_string(),
                    max: self.cost.query_limit.to_string(),
                });
            }
        }

        if self.monitoring.log_level.trim().is_empty() {
            return Err(ValidationError::MissingField("monitoring.log_level".to_string()));
        }
        EnvFilter::try_new(&self.monitoring.log_level).map_err(|e| {
            ValidationError::InvalidFormat {
                field: "monitoring.log_level".to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn override_policy(var: &str, target: &mut FilterPolicy) {
    if let Ok(value) = std::env::var(var) {
        match value.parse() {
            Ok(policy) => *target = policy,
            Err(e) => tracing::warn!("Ignoring {}: {}", var, e),
        }
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(value) = std::env::var(var) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Ignoring {}: cannot parse '{}'", var, value),
        }
    }
}
