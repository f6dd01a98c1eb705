//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section has defaults, so a missing section (or a missing file, via
//! `load_or_default`) yields a runnable dry-run configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::types::ArbiterError;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub polymarket: PolymarketSection,
    pub strategy: StrategySection,
    pub risk: RiskSection,
    pub storage: StorageSection,
    pub dashboard: DashboardSection,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineSection {
    /// Target cadence between scan starts.
    pub scan_interval_ms: u64,
    /// Admission cap on simultaneously active trades.
    pub max_concurrent_trades: usize,
    /// Maximum simultaneous orderbook fetches.
    pub fetch_concurrency: usize,
    /// Per-call timeout for collaborator calls; 0 disables.
    pub call_timeout_ms: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            scan_interval_ms: 5_000,
            max_concurrent_trades: 3,
            fetch_concurrency: 6,
            call_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PolymarketSection {
    pub gamma_url: String,
    pub clob_url: String,
    pub market_limit: u32,
    pub http_timeout_secs: u64,
}

impl Default for PolymarketSection {
    fn default() -> Self {
        Self {
            gamma_url: "https://gamma-api.polymarket.com".to_string(),
            clob_url: "https://clob.polymarket.com".to_string(),
            market_limit: 100,
            http_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrategySection {
    pub min_edge_bps: f64,
    pub max_trade_usd: f64,
    /// Fraction of reported market liquidity a single trade may take.
    pub max_liquidity_fraction: f64,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            min_edge_bps: 50.0,
            max_trade_usd: 50.0,
            max_liquidity_fraction: 0.05,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskSection {
    pub min_profit_usd: f64,
    pub max_exposure_usd: f64,
    pub market_cooldown_secs: i64,
    pub max_consecutive_failures: u32,
    pub failure_cooldown_secs: i64,
    pub min_gas_balance: f64,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            min_profit_usd: 0.10,
            max_exposure_usd: 500.0,
            market_cooldown_secs: 300,
            max_consecutive_failures: 3,
            failure_cooldown_secs: 600,
            min_gas_balance: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSection {
    /// JSON Lines decision log; empty disables decision logging.
    pub decisions_path: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            decisions_path: "arbiter_decisions.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardSection {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardSection {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8090,
        }
    }
}

impl EngineSection {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            info!(path, "No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse and validate a TOML document.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ArbiterError> {
        if self.engine.fetch_concurrency == 0 {
            return Err(ArbiterError::Config(
                "engine.fetch_concurrency must be at least 1".into(),
            ));
        }
        if self.strategy.max_trade_usd <= 0.0 {
            return Err(ArbiterError::Config(
                "strategy.max_trade_usd must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.strategy.max_liquidity_fraction) {
            return Err(ArbiterError::Config(
                "strategy.max_liquidity_fraction must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
