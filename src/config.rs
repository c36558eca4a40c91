//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Engine parameters are validated once at load time and are immutable
//! for the lifetime of the engine.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

/// Lifecycle engine policy. Fixed at construction.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EngineConfig {
    /// Minimum yield (fraction) for entry, e.g. 0.30.
    pub entry_yield_threshold: f64,
    /// Notional committed to every position.
    pub committed_amount: f64,
    pub hold_duration_hours: f64,
    pub max_open_positions: usize,
    pub min_liquidity: f64,
    pub min_volume: f64,
    pub tick_interval_minutes: u64,
    pub max_opportunity_age_days: u32,
    /// Upper bound on a single opportunity-source call.
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,
}

fn default_source_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entry_yield_threshold: 0.30,
            committed_amount: 1000.0,
            hold_duration_hours: 48.0,
            max_open_positions: 10,
            min_liquidity: 100.0,
            min_volume: 50.0,
            tick_interval_minutes: 60,
            max_opportunity_age_days: 30,
            source_timeout_secs: default_source_timeout_secs(),
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.entry_yield_threshold.is_finite() && self.entry_yield_threshold > 0.0) {
            bail!(
                "entry_yield_threshold must be positive, got {}",
                self.entry_yield_threshold
            );
        }
        if !(self.committed_amount.is_finite() && self.committed_amount > 0.0) {
            bail!("committed_amount must be positive, got {}", self.committed_amount);
        }
        if !(self.hold_duration_hours.is_finite() && self.hold_duration_hours > 0.0) {
            bail!(
                "hold_duration_hours must be positive, got {}",
                self.hold_duration_hours
            );
        }
        if self.max_open_positions == 0 {
            bail!("max_open_positions must be at least 1");
        }
        if self.min_liquidity < 0.0 || self.min_volume < 0.0 {
            bail!("min_liquidity and min_volume must not be negative");
        }
        if self.tick_interval_minutes == 0 {
            bail!("tick_interval_minutes must be at least 1");
        }
        if self.source_timeout_secs == 0 {
            bail!("source_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_minutes * 60)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

/// Where opportunities come from.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// A JSON array of opportunities on disk, re-read every tick.
    File { path: String },
    /// An HTTP endpoint returning a JSON array of opportunities.
    Http { url: String },
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub state_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: "harvester_state.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse TOML")?;
        config.engine.validate()?;
        Ok(config)
    }
}
