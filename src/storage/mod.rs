//! Persistence layer.
//!
//! Defines the `AgentStore` trait consumed by the engine and provides a
//! SQLite implementation via sqlx. Store failures are never fatal to a
//! cycle: the dispatcher logs them and carries on with its in-memory
//! state, so callers should treat writes as fire-and-forget.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{AgentConfig, AgentStatus, ExecutionRecord, RiskLevel};

/// Abstraction over the agent/execution store.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Fetch one agent's persisted configuration.
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentConfig>>;

    /// All agents whose persisted status is `active` (used to restore the
    /// scheduler table on startup).
    async fn list_active_agents(&self) -> Result<Vec<AgentConfig>>;

    /// Create or replace an agent row.
    async fn upsert_agent(&self, config: &AgentConfig, status: AgentStatus) -> Result<()>;

    /// Append one execution record.
    async fn save_execution(&self, record: &ExecutionRecord) -> Result<()>;

    /// Fold one cycle's result into the agent's lifetime counters.
    async fn update_runtime_counters(
        &self,
        agent_id: &str,
        profit: Decimal,
        success: bool,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

const CREATE_AGENTS: &str = "
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    strategy TEXT NOT NULL,
    risk_level TEXT NOT NULL,
    wallet_address TEXT NOT NULL,
    protocols TEXT NOT NULL,
    watched_tokens TEXT NOT NULL,
    max_investment TEXT NOT NULL,
    min_profit_threshold REAL NOT NULL,
    stop_loss_percent REAL NOT NULL,
    status TEXT NOT NULL,
    total_profit TEXT NOT NULL DEFAULT '0',
    total_trades INTEGER NOT NULL DEFAULT 0,
    successful_trades INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
)";

const CREATE_EXECUTIONS: &str = "
CREATE TABLE IF NOT EXISTS executions (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    strategy_type TEXT NOT NULL,
    decision TEXT NOT NULL,
    outcome TEXT,
    success INTEGER NOT NULL,
    profit TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL
)";

/// SQLite-backed store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and run the idempotent schema migration.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true);

        // In-memory databases live and die with their connection; the pool
        // must hold exactly one.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {url}"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "Database ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_AGENTS)
            .execute(&self.pool)
            .await
            .context("Failed to create agents table")?;
        sqlx::query(CREATE_EXECUTIONS)
            .execute(&self.pool)
            .await
            .context("Failed to create executions table")?;
        Ok(())
    }

    fn row_to_config(row: &SqliteRow) -> Result<AgentConfig> {
        let risk_level: String = row.try_get("risk_level")?;
        let protocols: String = row.try_get("protocols")?;
        let watched_tokens: String = row.try_get("watched_tokens")?;
        let max_investment: String = row.try_get("max_investment")?;

        Ok(AgentConfig {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            strategy: row.try_get("strategy")?,
            risk_level: risk_level.parse::<RiskLevel>()?,
            wallet_address: row.try_get("wallet_address")?,
            protocols: serde_json::from_str(&protocols)
                .context("Malformed protocols column")?,
            watched_tokens: serde_json::from_str(&watched_tokens)
                .context("Malformed watched_tokens column")?,
            max_investment: max_investment
                .parse::<Decimal>()
                .context("Malformed max_investment column")?,
            min_profit_threshold: row.try_get("min_profit_threshold")?,
            stop_loss_percent: row.try_get("stop_loss_percent")?,
        })
    }
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentConfig>> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch agent")?;

        row.as_ref().map(Self::row_to_config).transpose()
    }

    async fn list_active_agents(&self) -> Result<Vec<AgentConfig>> {
        let rows = sqlx::query("SELECT * FROM agents WHERE status = 'active' ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list active agents")?;

        rows.iter().map(Self::row_to_config).collect()
    }

    async fn upsert_agent(&self, config: &AgentConfig, status: AgentStatus) -> Result<()> {
        sqlx::query(
            "INSERT INTO agents (
                id, name, strategy, risk_level, wallet_address, protocols,
                watched_tokens, max_investment, min_profit_threshold,
                stop_loss_percent, status, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                strategy = excluded.strategy,
                risk_level = excluded.risk_level,
                wallet_address = excluded.wallet_address,
                protocols = excluded.protocols,
                watched_tokens = excluded.watched_tokens,
                max_investment = excluded.max_investment,
                min_profit_threshold = excluded.min_profit_threshold,
                stop_loss_percent = excluded.stop_loss_percent,
                status = excluded.status,
                updated_at = excluded.updated_at",
        )
        .bind(&config.id)
        .bind(&config.name)
        .bind(&config.strategy)
        .bind(config.risk_level.as_str())
        .bind(&config.wallet_address)
        .bind(serde_json::to_string(&config.protocols)?)
        .bind(serde_json::to_string(&config.watched_tokens)?)
        .bind(config.max_investment.to_string())
        .bind(config.min_profit_threshold)
        .bind(config.stop_loss_percent)
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to upsert agent")?;

        debug!(agent_id = %config.id, status = %status, "Agent row upserted");
        Ok(())
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO executions (
                id, agent_id, strategy_type, decision, outcome, success,
                profit, started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.agent_id)
        .bind(record.decision.action.kind())
        .bind(serde_json::to_string(&record.decision)?)
        .bind(
            record
                .outcome
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(record.success() as i64)
        .bind(record.profit().to_string())
        .bind(record.started_at.to_rfc3339())
        .bind(record.finished_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save execution record")?;

        debug!(agent_id = %record.agent_id, record_id = %record.id, "Execution record saved");
        Ok(())
    }

    async fn update_runtime_counters(
        &self,
        agent_id: &str,
        profit: Decimal,
        success: bool,
    ) -> Result<()> {
        let row = sqlx::query(
            "SELECT total_profit, total_trades, successful_trades FROM agents WHERE id = ?",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read agent counters")?;

        let Some(row) = row else {
            anyhow::bail!("Agent not found: {agent_id}");
        };

        let total_profit: String = row.try_get("total_profit")?;
        let total_profit = total_profit.parse::<Decimal>().unwrap_or(Decimal::ZERO) + profit;
        let total_trades: i64 = row.try_get::<i64, _>("total_trades")? + 1;
        let successful_trades: i64 =
            row.try_get::<i64, _>("successful_trades")? + if success { 1 } else { 0 };

        sqlx::query(
            "UPDATE agents SET total_profit = ?, total_trades = ?,
             successful_trades = ?, updated_at = ? WHERE id = ?",
        )
        .bind(total_profit.to_string())
        .bind(total_trades)
        .bind(successful_trades)
        .bind(Utc::now().to_rfc3339())
        .bind(agent_id)
        .execute(&self.pool)
        .await
        .context("Failed to update agent counters")?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
