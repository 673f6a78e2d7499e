//! External capability providers.
//!
//! Defines the three interfaces the engine core depends on:
//! - `MarketDataProvider` — prices, protocol state, wallet portfolios
//! - `Predictor` — per-cycle strategy decisions from the AI service
//! - `ExecutionProvider` — on-chain action execution
//!
//! Production implementations talk HTTP; tests swap in deterministic fakes.

pub mod market;
pub mod predictor;
pub mod chain;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::types::{
    ActionReceipt, AgentConfig, Decision, FarmAction, LendingAction, LiquidityAction,
    MarketContext, Portfolio, Position, Protocol,
};

/// Abstraction over market data sources.
///
/// Implementors are expected to degrade gracefully: a partial or empty
/// result is always preferable to an error, and the dispatcher treats any
/// error as an empty slice of context anyway.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Current USD prices for the given token mints.
    async fn get_prices(&self, mints: &[String]) -> Result<HashMap<String, Decimal>>;

    /// Opaque per-protocol state snapshots (rates, pools, farms).
    async fn get_protocol_state(
        &self,
        protocols: &[String],
    ) -> Result<HashMap<String, serde_json::Value>>;

    /// Balances held by an agent wallet.
    async fn get_portfolio(&self, wallet: &str) -> Result<Portfolio>;

    /// Provider name for logging and identification.
    fn name(&self) -> &str;
}

/// Abstraction over the strategy decision service.
///
/// The dispatcher calls this under a bounded timeout; an error or timeout
/// is converted into a degraded hold for the cycle, so implementors should
/// surface upstream failures rather than guessing.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Produce a decision for one agent given the current market context,
    /// its open positions, and its configured constraints.
    async fn decide(
        &self,
        agent_id: &str,
        context: &MarketContext,
        positions: &HashMap<String, Position>,
        config: &AgentConfig,
    ) -> Result<Decision>;

    /// Model identifier string.
    fn name(&self) -> &str;
}

/// Abstraction over on-chain strategy execution.
///
/// One operation per strategy family plus generic position closing.
/// Implementors never raise into the scheduler: every failure comes back
/// as a receipt with `success == false`.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    async fn execute_swap(
        &self,
        agent_id: &str,
        from_token: &str,
        to_token: &str,
        amount: Decimal,
        slippage_bps: u32,
    ) -> ActionReceipt;

    async fn execute_lending(
        &self,
        agent_id: &str,
        protocol: Protocol,
        action: LendingAction,
        token: &str,
        amount: Decimal,
    ) -> ActionReceipt;

    async fn execute_liquidity(
        &self,
        agent_id: &str,
        protocol: Protocol,
        action: LiquidityAction,
        pool_id: &str,
        amount_a: Decimal,
        amount_b: Decimal,
    ) -> ActionReceipt;

    async fn execute_yield_farm(
        &self,
        agent_id: &str,
        protocol: Protocol,
        action: FarmAction,
        farm_id: &str,
        amount: Decimal,
    ) -> ActionReceipt;

    /// Close a single open position.
    async fn close_position(&self, agent_id: &str, position: &Position) -> ActionReceipt;

    /// Provider name for logging and identification.
    fn name(&self) -> &str;
}
