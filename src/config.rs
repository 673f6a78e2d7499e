//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, RPC URLs) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub scheduler: SchedulerSection,
    pub predictor: PredictorSection,
    pub market_data: MarketDataSection,
    pub chain: ChainSection,
    pub database: DatabaseSection,
    pub dashboard: DashboardSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentSection {
    /// Engine instance name, used in logs.
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerSection {
    /// Fixed cadence of the scheduling loop.
    pub tick_interval_secs: u64,
    /// Delay before a freshly registered agent becomes eligible.
    pub registration_delay_secs: i64,
    /// Fixed backoff applied to an agent after a faulted cycle.
    pub error_backoff_minutes: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PredictorSection {
    pub base_url: String,
    /// Hard timeout on a single `/predict` round-trip.
    pub timeout_secs: u64,
    /// Env var holding an optional bearer token for the AI service.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketDataSection {
    pub pyth_endpoint: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainSection {
    pub jupiter_base_url: String,
    /// Env var holding the Solana RPC URL (may embed a provider key).
    #[serde(default)]
    pub rpc_url_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSection {
    /// SQLite URL; overridden by `DATABASE_URL` when set.
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardSection {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Database URL, preferring the `DATABASE_URL` env var when present.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }
}
