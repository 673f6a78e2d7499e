//! Execution dispatcher — runs one strategy cycle for one agent.
//!
//! A cycle is gather-context → decide → execute → report. The dispatcher
//! never mutates the runtime table; it returns a `CycleOutcome` and the
//! scheduler applies it under the table lock, which keeps all state
//! mutation single-writer.
//!
//! Upstream failures are absorbed here: market data degrades to empty
//! context, a predictor failure or timeout resolves to a degraded hold,
//! and store writes are fire-and-forget.

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::providers::{ExecutionProvider, MarketDataProvider, Predictor};
use crate::storage::AgentStore;
use crate::types::{
    ActionReceipt, AgentConfig, Decision, ExecutionRecord, MarketContext, Position,
    StrategyAction, StrategyOutcome,
};

// ---------------------------------------------------------------------------
// Cycle outcome
// ---------------------------------------------------------------------------

/// A cycle that reached a decision.
#[derive(Debug, Clone)]
pub struct CompletedCycle {
    pub decision: Decision,
    /// None when the decision was skipped (`should_execute == false`).
    pub outcome: Option<StrategyOutcome>,
    /// Positions opened by successful steps of this cycle.
    pub opened_positions: Vec<Position>,
}

impl CompletedCycle {
    pub fn executed(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn profit(&self) -> Decimal {
        self.outcome
            .as_ref()
            .map(|o| o.profit)
            .unwrap_or(Decimal::ZERO)
    }
}

/// How one agent's cycle resolved. The scheduler maps each variant onto a
/// runtime-state update.
#[derive(Debug)]
pub enum CycleOutcome {
    /// A decision was obtained; counts as a completed execution attempt.
    Completed(CompletedCycle),
    /// The predictor was unavailable; the agent gets the fixed backoff and
    /// nothing else changes.
    DegradedHold,
    /// The persisted agent record is gone; the agent is parked in `error`.
    ConfigMissing,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct CycleDispatcher {
    market: Arc<dyn MarketDataProvider>,
    predictor: Arc<dyn Predictor>,
    executor: Arc<dyn ExecutionProvider>,
    store: Arc<dyn AgentStore>,
    predictor_timeout: Duration,
}

impl CycleDispatcher {
    pub fn new(
        market: Arc<dyn MarketDataProvider>,
        predictor: Arc<dyn Predictor>,
        executor: Arc<dyn ExecutionProvider>,
        store: Arc<dyn AgentStore>,
        predictor_timeout: Duration,
    ) -> Self {
        Self {
            market,
            predictor,
            executor,
            store,
            predictor_timeout,
        }
    }

    /// Run one full cycle for an agent. `positions` is a snapshot of the
    /// agent's open positions at dispatch time; the scheduler applies the
    /// returned outcome against its own tick clock.
    pub async fn run_cycle(
        &self,
        agent_id: &str,
        positions: &HashMap<String, Position>,
    ) -> Result<CycleOutcome> {
        let started_at = Utc::now();

        // 1. Agent configuration. A read error degrades to defaults; a
        //    missing row means the agent was deleted underneath us.
        let config = match self.store.get_agent(agent_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                warn!(agent_id = %agent_id, "Agent record missing, parking agent");
                return Ok(CycleOutcome::ConfigMissing);
            }
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Store read failed, using fallback constraints");
                AgentConfig::fallback(agent_id)
            }
        };

        // 2. Market context, each slice degrading independently.
        let context = self.gather_market_context(&config).await;

        // 3. Decision, under a hard timeout.
        let decided = tokio::time::timeout(
            self.predictor_timeout,
            self.predictor.decide(agent_id, &context, positions, &config),
        )
        .await;
        let decision = match decided {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                warn!(agent_id = %agent_id, error = %e, "Predictor failed, degrading to hold");
                return Ok(CycleOutcome::DegradedHold);
            }
            Err(_) => {
                warn!(
                    agent_id = %agent_id,
                    timeout_secs = self.predictor_timeout.as_secs(),
                    "Predictor timed out, degrading to hold"
                );
                return Ok(CycleOutcome::DegradedHold);
            }
        };

        info!(agent_id = %agent_id, decision = %decision, "Decision received");

        // 4–5. Execute unless the predictor said to sit this one out.
        let (outcome, opened_positions) = if decision.should_execute {
            let (outcome, opened) = self.execute_decision(agent_id, &decision.action).await;
            info!(agent_id = %agent_id, outcome = %outcome, "Execution complete");
            (Some(outcome), opened)
        } else {
            debug!(agent_id = %agent_id, "Decision skipped by predictor gate");
            (None, Vec::new())
        };

        // 6. Persistence is fire-and-forget relative to the runtime update.
        let record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            decision: decision.clone(),
            outcome: outcome.clone(),
            started_at,
            finished_at: Utc::now(),
        };
        if let Err(e) = self.store.save_execution(&record).await {
            warn!(agent_id = %agent_id, error = %e, "Failed to save execution record");
        }
        if let Some(outcome) = &outcome {
            if let Err(e) = self
                .store
                .update_runtime_counters(agent_id, outcome.profit, outcome.success)
                .await
            {
                warn!(agent_id = %agent_id, error = %e, "Failed to update agent counters");
            }
        }

        Ok(CycleOutcome::Completed(CompletedCycle {
            decision,
            outcome,
            opened_positions,
        }))
    }

    /// Fetch prices, protocol state, and the wallet portfolio, degrading
    /// each slice independently. Never fails.
    pub async fn gather_market_context(&self, config: &AgentConfig) -> MarketContext {
        let mut context = MarketContext::empty();

        let (prices, protocols, portfolio) = tokio::join!(
            self.market.get_prices(&config.watched_tokens),
            self.market.get_protocol_state(&config.protocols),
            self.market.get_portfolio(&config.wallet_address),
        );

        match prices {
            Ok(prices) => context.prices = prices,
            Err(e) => warn!(agent_id = %config.id, error = %e, "Price fetch failed, using empty prices"),
        }
        match protocols {
            Ok(protocols) => context.protocols = protocols,
            Err(e) => warn!(agent_id = %config.id, error = %e, "Protocol fetch failed, using empty state"),
        }
        match portfolio {
            Ok(portfolio) => context.portfolio = portfolio,
            Err(e) => warn!(agent_id = %config.id, error = %e, "Portfolio fetch failed, using empty portfolio"),
        }

        context
    }

    // -- Action execution ------------------------------------------------

    async fn execute_decision(
        &self,
        agent_id: &str,
        action: &StrategyAction,
    ) -> (StrategyOutcome, Vec<Position>) {
        match action {
            StrategyAction::MultiHop { steps } => self.execute_sequence(agent_id, steps).await,
            single => {
                let receipt = self.execute_single(agent_id, single).await;
                let opened = position_from(single, &receipt).into_iter().collect();
                (StrategyOutcome::from_receipt(&receipt), opened)
            }
        }
    }

    /// Execute an ordered sequence of sub-actions strictly sequentially.
    ///
    /// The first failing step aborts the remainder. `completed_steps`
    /// counts attempted steps, and `profit` sums what every attempted step
    /// reported — including any realized loss from the failing step.
    async fn execute_sequence(
        &self,
        agent_id: &str,
        steps: &[StrategyAction],
    ) -> (StrategyOutcome, Vec<Position>) {
        let mut outcome = StrategyOutcome {
            success: !steps.is_empty(),
            completed_steps: 0,
            total_steps: steps.len(),
            profit: Decimal::ZERO,
            tx_references: Vec::new(),
            error: if steps.is_empty() {
                Some("Empty multi-step sequence".to_string())
            } else {
                None
            },
        };
        let mut opened = Vec::new();

        for step in steps {
            let receipt = if matches!(step, StrategyAction::MultiHop { .. }) {
                ActionReceipt::failure("Nested multi-step sequences are not supported")
            } else {
                self.execute_single(agent_id, step).await
            };

            outcome.completed_steps += 1;
            outcome.profit += receipt.profit;
            if let Some(tx) = &receipt.tx_reference {
                outcome.tx_references.push(tx.clone());
            }

            if !receipt.success {
                warn!(
                    agent_id = %agent_id,
                    step = outcome.completed_steps,
                    total = outcome.total_steps,
                    error = receipt.error.as_deref().unwrap_or("unknown"),
                    "Sequence step failed, aborting remainder"
                );
                outcome.success = false;
                outcome.error = receipt.error.clone();
                break;
            }

            if let Some(position) = position_from(step, &receipt) {
                opened.push(position);
            }
        }

        (outcome, opened)
    }

    async fn execute_single(&self, agent_id: &str, action: &StrategyAction) -> ActionReceipt {
        match action {
            StrategyAction::Swap {
                from_token,
                to_token,
                amount,
                slippage_bps,
            } => {
                self.executor
                    .execute_swap(agent_id, from_token, to_token, *amount, *slippage_bps)
                    .await
            }
            StrategyAction::Lending {
                action,
                token,
                amount,
                protocol,
            } => {
                self.executor
                    .execute_lending(agent_id, *protocol, *action, token, *amount)
                    .await
            }
            StrategyAction::LiquidityProvision {
                action,
                pool_id,
                amount_a,
                amount_b,
                protocol,
            } => {
                self.executor
                    .execute_liquidity(agent_id, *protocol, *action, pool_id, *amount_a, *amount_b)
                    .await
            }
            StrategyAction::YieldFarming {
                action,
                farm_id,
                amount,
                protocol,
                ..
            } => {
                self.executor
                    .execute_yield_farm(agent_id, *protocol, *action, farm_id, *amount)
                    .await
            }
            StrategyAction::Hold => ActionReceipt {
                success: true,
                tx_reference: None,
                output_amount: Decimal::ZERO,
                profit: Decimal::ZERO,
                error: None,
            },
            StrategyAction::MultiHop { .. } => {
                ActionReceipt::failure("Nested multi-step sequences are not supported")
            }
        }
    }
}

/// A successful position-opening action becomes a tracked Position.
fn position_from(action: &StrategyAction, receipt: &ActionReceipt) -> Option<Position> {
    if !receipt.success || !action.opens_position() {
        return None;
    }

    let (protocol, market, size) = match action {
        StrategyAction::Lending {
            token,
            amount,
            protocol,
            ..
        } => (*protocol, token.clone(), *amount),
        StrategyAction::LiquidityProvision {
            pool_id,
            amount_a,
            amount_b,
            protocol,
            ..
        } => (*protocol, pool_id.clone(), *amount_a + *amount_b),
        StrategyAction::YieldFarming {
            farm_id,
            amount,
            protocol,
            ..
        } => (*protocol, farm_id.clone(), *amount),
        _ => return None,
    };

    Some(Position {
        id: Uuid::new_v4().to_string(),
        protocol,
        market,
        size,
        opened_at: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
