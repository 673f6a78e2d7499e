//! Shared types for the SOLSTICE agent engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that provider, engine,
//! and storage modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Well-known mints
// ---------------------------------------------------------------------------

/// Wrapped SOL mint address.
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";
/// USDC mint address.
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
/// USDT mint address.
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Agent lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Created,
    Active,
    Paused,
    Stopped,
    Error,
}

impl AgentStatus {
    /// Stable lowercase token, used for persistence and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Created => "created",
            AgentStatus::Active => "active",
            AgentStatus::Paused => "paused",
            AgentStatus::Stopped => "stopped",
            AgentStatus::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(AgentStatus::Created),
            "active" => Ok(AgentStatus::Active),
            "paused" => Ok(AgentStatus::Paused),
            "stopped" => Ok(AgentStatus::Stopped),
            "error" => Ok(AgentStatus::Error),
            _ => Err(anyhow::anyhow!("Unknown agent status: {s}")),
        }
    }
}

/// Risk appetite configured per agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Numeric tolerance score used when gating decisions.
    pub fn score(&self) -> f64 {
        match self {
            RiskLevel::Low => 0.2,
            RiskLevel::Medium => 0.5,
            RiskLevel::High => 0.8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            _ => Err(anyhow::anyhow!("Unknown risk level: {s}")),
        }
    }
}

/// DeFi protocols an agent can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Jupiter,
    Marginfi,
    Orca,
    Raydium,
    Kamino,
    Solend,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Jupiter => "jupiter",
            Protocol::Marginfi => "marginfi",
            Protocol::Orca => "orca",
            Protocol::Raydium => "raydium",
            Protocol::Kamino => "kamino",
            Protocol::Solend => "solend",
        };
        write!(f, "{name}")
    }
}

/// Lending-market operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LendingAction {
    Deposit,
    Withdraw,
    Borrow,
    Repay,
}

/// Liquidity-pool operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidityAction {
    Add,
    Remove,
}

/// Yield-farm operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FarmAction {
    Stake,
    Unstake,
    Harvest,
}

// ---------------------------------------------------------------------------
// Agent configuration
// ---------------------------------------------------------------------------

/// Persisted agent configuration, fetched from the store at the start of
/// every cycle. The financial constraints are forwarded to the predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    /// Strategy family label, e.g. "yield_farming", "arbitrage".
    pub strategy: String,
    pub risk_level: RiskLevel,
    pub wallet_address: String,
    pub protocols: Vec<String>,
    pub watched_tokens: Vec<String>,
    /// Maximum amount (USD) the agent may commit in total.
    pub max_investment: Decimal,
    /// Minimum predicted yield (fraction) required to execute.
    pub min_profit_threshold: f64,
    pub stop_loss_percent: f64,
}

impl AgentConfig {
    /// Conservative defaults used when the store cannot be reached
    /// mid-cycle. The cycle proceeds rather than aborting.
    pub fn fallback(agent_id: &str) -> Self {
        Self {
            id: agent_id.to_string(),
            name: agent_id.to_string(),
            strategy: "unknown".to_string(),
            risk_level: RiskLevel::Low,
            wallet_address: String::new(),
            protocols: Vec::new(),
            watched_tokens: vec![SOL_MINT.to_string(), USDC_MINT.to_string()],
            max_investment: Decimal::from(1000),
            min_profit_threshold: 0.01,
            stop_loss_percent: 0.1,
        }
    }

    /// Helper to build a test agent config with sensible defaults.
    #[cfg(test)]
    pub fn sample(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: format!("agent-{id}"),
            strategy: "yield_farming".to_string(),
            risk_level: RiskLevel::Medium,
            wallet_address: format!("wallet-{id}"),
            protocols: vec!["marginfi".to_string(), "raydium".to_string()],
            watched_tokens: vec![SOL_MINT.to_string(), USDC_MINT.to_string()],
            max_investment: Decimal::from(1000),
            min_profit_threshold: 0.01,
            stop_loss_percent: 0.1,
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy actions & decisions
// ---------------------------------------------------------------------------

/// A concrete action the execution provider knows how to perform.
///
/// `MultiHop` carries an ordered sequence of sub-actions which are executed
/// strictly sequentially; nesting another `MultiHop` inside the steps is
/// rejected at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy_type", rename_all = "snake_case")]
pub enum StrategyAction {
    Swap {
        from_token: String,
        to_token: String,
        amount: Decimal,
        #[serde(default = "default_slippage_bps")]
        slippage_bps: u32,
    },
    Lending {
        action: LendingAction,
        token: String,
        amount: Decimal,
        protocol: Protocol,
    },
    LiquidityProvision {
        action: LiquidityAction,
        pool_id: String,
        amount_a: Decimal,
        amount_b: Decimal,
        protocol: Protocol,
    },
    YieldFarming {
        action: FarmAction,
        farm_id: String,
        token: Option<String>,
        amount: Decimal,
        protocol: Protocol,
    },
    MultiHop {
        steps: Vec<StrategyAction>,
    },
    Hold,
}

fn default_slippage_bps() -> u32 {
    50
}

impl StrategyAction {
    /// Strategy family label for logging and persistence.
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyAction::Swap { .. } => "swap",
            StrategyAction::Lending { .. } => "lending",
            StrategyAction::LiquidityProvision { .. } => "liquidity_provision",
            StrategyAction::YieldFarming { .. } => "yield_farming",
            StrategyAction::MultiHop { .. } => "multi_hop",
            StrategyAction::Hold => "hold",
        }
    }

    /// Whether a successful execution of this action leaves the agent with
    /// an open exposure that must later be closed.
    pub fn opens_position(&self) -> bool {
        matches!(
            self,
            StrategyAction::Lending {
                action: LendingAction::Deposit,
                ..
            } | StrategyAction::LiquidityProvision {
                action: LiquidityAction::Add,
                ..
            } | StrategyAction::YieldFarming {
                action: FarmAction::Stake,
                ..
            }
        )
    }
}

impl fmt::Display for StrategyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyAction::MultiHop { steps } => write!(f, "multi_hop[{}]", steps.len()),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Predictor output for one cycle: which action to take, how confident the
/// model is, whether to act at all, and when to check back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: StrategyAction,
    /// Model-predicted yield for the cycle (fraction, e.g. 0.02 = 2 %).
    pub predicted_yield: f64,
    /// Model confidence (0–1).
    pub confidence: f64,
    /// Assessed risk of the proposed action (0–1).
    pub risk_score: f64,
    pub should_execute: bool,
    /// Suggested delay before the agent's next cycle, in minutes.
    pub next_check_minutes: i64,
}

impl Decision {
    /// A do-nothing decision that defers the next check by the given delay.
    pub fn hold(next_check_minutes: i64) -> Self {
        Self {
            action: StrategyAction::Hold,
            predicted_yield: 0.0,
            confidence: 0.0,
            risk_score: 0.0,
            should_execute: false,
            next_check_minutes,
        }
    }

    pub fn next_check(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.next_check_minutes)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} yield={:.2}% conf={:.0}% risk={:.2} execute={} next={}m",
            self.action,
            self.predicted_yield * 100.0,
            self.confidence * 100.0,
            self.risk_score,
            self.should_execute,
            self.next_check_minutes,
        )
    }
}

// ---------------------------------------------------------------------------
// Positions & execution results
// ---------------------------------------------------------------------------

/// An open exposure tracked per agent until explicitly closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub protocol: Protocol,
    /// Token mint, pool id, or farm id the exposure sits in.
    pub market: String,
    pub size: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} size={} ({})",
            self.protocol, self.market, self.size, self.id,
        )
    }
}

/// Result of one action dispatched to the execution provider.
///
/// Providers never raise into the scheduler; failures come back as a
/// receipt with `success == false` and a populated `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReceipt {
    pub success: bool,
    pub tx_reference: Option<String>,
    pub output_amount: Decimal,
    /// Realized profit/loss for this action. May be non-zero on failure
    /// (e.g. fees burned by a reverted transaction).
    pub profit: Decimal,
    pub error: Option<String>,
}

impl ActionReceipt {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            tx_reference: None,
            output_amount: Decimal::ZERO,
            profit: Decimal::ZERO,
            error: Some(message.into()),
        }
    }

    pub fn filled(tx_reference: impl Into<String>, output_amount: Decimal, profit: Decimal) -> Self {
        Self {
            success: true,
            tx_reference: Some(tx_reference.into()),
            output_amount,
            profit,
            error: None,
        }
    }
}

impl fmt::Display for ActionReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            write!(
                f,
                "ok tx={} out={} pnl={}",
                self.tx_reference.as_deref().unwrap_or("-"),
                self.output_amount,
                self.profit,
            )
        } else {
            write!(f, "failed: {}", self.error.as_deref().unwrap_or("unknown"))
        }
    }
}

/// Aggregate result of executing one decision, which may span several
/// sequential steps. `completed_steps` counts attempted steps; `profit`
/// sums the profit reported by every attempted step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyOutcome {
    pub success: bool,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub profit: Decimal,
    pub tx_references: Vec<String>,
    pub error: Option<String>,
}

impl StrategyOutcome {
    /// Outcome for a single-action decision.
    pub fn from_receipt(receipt: &ActionReceipt) -> Self {
        Self {
            success: receipt.success,
            completed_steps: 1,
            total_steps: 1,
            profit: receipt.profit,
            tx_references: receipt.tx_reference.iter().cloned().collect(),
            error: receipt.error.clone(),
        }
    }
}

impl fmt::Display for StrategyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps={}/{} pnl={}",
            if self.success { "ok" } else { "failed" },
            self.completed_steps,
            self.total_steps,
            self.profit,
        )
    }
}

// ---------------------------------------------------------------------------
// Market context
// ---------------------------------------------------------------------------

/// A single token balance inside a wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalance {
    pub mint: String,
    pub balance: Decimal,
    pub decimals: u8,
}

/// Snapshot of an agent wallet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Portfolio {
    pub sol_balance: Decimal,
    pub total_value_usd: Decimal,
    pub token_balances: Vec<TokenBalance>,
}

/// Everything the predictor sees about the outside world for one cycle.
///
/// Every field degrades independently: a failed provider call leaves its
/// slice empty and the cycle proceeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub timestamp: DateTime<Utc>,
    /// Token mint → USD price.
    pub prices: HashMap<String, Decimal>,
    /// Protocol name → opaque state snapshot.
    pub protocols: HashMap<String, serde_json::Value>,
    pub portfolio: Portfolio,
}

impl MarketContext {
    pub fn empty() -> Self {
        Self {
            timestamp: Utc::now(),
            prices: HashMap::new(),
            protocols: HashMap::new(),
            portfolio: Portfolio::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
            && self.protocols.is_empty()
            && self.portfolio.token_balances.is_empty()
            && self.portfolio.sol_balance.is_zero()
    }

    pub fn price(&self, mint: &str) -> Option<Decimal> {
        self.prices.get(mint).copied()
    }
}

// ---------------------------------------------------------------------------
// Execution records
// ---------------------------------------------------------------------------

/// Persisted record of one completed cycle that reached a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub agent_id: String,
    pub decision: Decision,
    /// None when the decision was not executed (`should_execute == false`).
    pub outcome: Option<StrategyOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn success(&self) -> bool {
        self.outcome.as_ref().map(|o| o.success).unwrap_or(true)
    }

    pub fn profit(&self) -> Decimal {
        self.outcome
            .as_ref()
            .map(|o| o.profit)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for SOLSTICE.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Agent already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Agent not found: {0}")]
    UnknownAgent(String),

    #[error("Predictor error: {0}")]
    Predictor(String),

    #[error("Market data error ({source_name}): {message}")]
    MarketData {
        source_name: String,
        message: String,
    },

    #[error("Execution error ({protocol}): {message}")]
    Execution { protocol: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
