//! Deterministic provider fakes for integration testing.
//!
//! The scheduler is wired against these plus a real in-memory SQLite
//! store, so scenarios run the full register → tick → persist path with
//! no external dependencies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use solstice::engine::dispatcher::CycleDispatcher;
use solstice::engine::scheduler::{AgentScheduler, SchedulerConfig};
use solstice::providers::{ExecutionProvider, MarketDataProvider, Predictor};
use solstice::storage::{AgentStore, SqliteStore};
use solstice::types::{
    ActionReceipt, AgentConfig, AgentStatus, Decision, FarmAction, LendingAction,
    LiquidityAction, MarketContext, Portfolio, Position, Protocol, SOL_MINT, USDC_MINT,
};

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Market data fake with a fixed, healthy-looking context.
pub struct StaticMarket;

#[async_trait]
impl MarketDataProvider for StaticMarket {
    async fn get_prices(&self, _mints: &[String]) -> Result<HashMap<String, Decimal>> {
        let mut prices = HashMap::new();
        prices.insert(SOL_MINT.to_string(), Decimal::from(150));
        prices.insert(USDC_MINT.to_string(), Decimal::ONE);
        Ok(prices)
    }

    async fn get_protocol_state(
        &self,
        protocols: &[String],
    ) -> Result<HashMap<String, serde_json::Value>> {
        Ok(protocols
            .iter()
            .map(|p| (p.clone(), serde_json::json!({"healthy": true})))
            .collect())
    }

    async fn get_portfolio(&self, _wallet: &str) -> Result<Portfolio> {
        Ok(Portfolio {
            sol_balance: Decimal::from(10),
            total_value_usd: Decimal::from(1500),
            token_balances: Vec::new(),
        })
    }

    fn name(&self) -> &str {
        "static-market"
    }
}

// ---------------------------------------------------------------------------
// Predictor
// ---------------------------------------------------------------------------

/// Predictor fake replaying a queue of responses; `None` simulates an
/// upstream failure, the queue running dry replays the default.
pub struct QueuedPredictor {
    queue: Mutex<VecDeque<Option<Decision>>>,
    default: Decision,
}

impl QueuedPredictor {
    pub fn new(default: Decision) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default,
        }
    }

    pub fn push_decision(&self, decision: Decision) {
        self.queue.lock().unwrap().push_back(Some(decision));
    }

    pub fn push_failure(&self) {
        self.queue.lock().unwrap().push_back(None);
    }
}

#[async_trait]
impl Predictor for QueuedPredictor {
    async fn decide(
        &self,
        _agent_id: &str,
        _context: &MarketContext,
        _positions: &HashMap<String, Position>,
        _config: &AgentConfig,
    ) -> Result<Decision> {
        match self.queue.lock().unwrap().pop_front() {
            Some(Some(decision)) => Ok(decision),
            Some(None) => Err(anyhow!("predictor unavailable")),
            None => Ok(self.default.clone()),
        }
    }

    fn name(&self) -> &str {
        "queued"
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Execution fake replaying scripted receipts and recording every call.
pub struct ScriptedExecutor {
    receipts: Mutex<VecDeque<ActionReceipt>>,
    pub calls: Mutex<Vec<String>>,
    pub closed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            receipts: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    pub fn push_receipt(&self, receipt: ActionReceipt) {
        self.receipts.lock().unwrap().push_back(receipt);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next(&self, kind: &str) -> ActionReceipt {
        self.calls.lock().unwrap().push(kind.to_string());
        self.receipts.lock().unwrap().pop_front().unwrap_or_else(|| {
            ActionReceipt::filled(format!("tx-{kind}"), Decimal::ZERO, Decimal::ZERO)
        })
    }
}

#[async_trait]
impl ExecutionProvider for ScriptedExecutor {
    async fn execute_swap(
        &self,
        _agent_id: &str,
        _from_token: &str,
        _to_token: &str,
        _amount: Decimal,
        _slippage_bps: u32,
    ) -> ActionReceipt {
        self.next("swap")
    }

    async fn execute_lending(
        &self,
        _agent_id: &str,
        _protocol: Protocol,
        _action: LendingAction,
        _token: &str,
        _amount: Decimal,
    ) -> ActionReceipt {
        self.next("lending")
    }

    async fn execute_liquidity(
        &self,
        _agent_id: &str,
        _protocol: Protocol,
        _action: LiquidityAction,
        _pool_id: &str,
        _amount_a: Decimal,
        _amount_b: Decimal,
    ) -> ActionReceipt {
        self.next("liquidity")
    }

    async fn execute_yield_farm(
        &self,
        _agent_id: &str,
        _protocol: Protocol,
        _action: FarmAction,
        _farm_id: &str,
        _amount: Decimal,
    ) -> ActionReceipt {
        self.next("yield_farm")
    }

    async fn close_position(&self, _agent_id: &str, position: &Position) -> ActionReceipt {
        self.closed.lock().unwrap().push(position.id.clone());
        ActionReceipt::filled(format!("close-{}", position.id), position.size, Decimal::ZERO)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct TestEngine {
    pub scheduler: Arc<AgentScheduler>,
    pub predictor: Arc<QueuedPredictor>,
    pub executor: Arc<ScriptedExecutor>,
    pub store: Arc<SqliteStore>,
}

/// Build a scheduler wired to the fakes and a fresh in-memory store,
/// with the given agents seeded as persisted rows.
pub async fn engine_with_agents(default_decision: Decision, agent_ids: &[&str]) -> TestEngine {
    let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
    for id in agent_ids {
        store
            .upsert_agent(&sample_config(id), AgentStatus::Created)
            .await
            .unwrap();
    }

    let predictor = Arc::new(QueuedPredictor::new(default_decision));
    let executor = Arc::new(ScriptedExecutor::new());
    let dispatcher = CycleDispatcher::new(
        Arc::new(StaticMarket),
        predictor.clone(),
        executor.clone(),
        store.clone(),
        std::time::Duration::from_secs(5),
    );
    let scheduler = Arc::new(AgentScheduler::new(
        dispatcher,
        executor.clone(),
        SchedulerConfig::default(),
    ));

    TestEngine {
        scheduler,
        predictor,
        executor,
        store,
    }
}

pub fn sample_config(id: &str) -> AgentConfig {
    AgentConfig {
        id: id.to_string(),
        name: format!("agent-{id}"),
        strategy: "yield_farming".to_string(),
        risk_level: solstice::types::RiskLevel::Medium,
        wallet_address: format!("wallet-{id}"),
        protocols: vec!["marginfi".to_string(), "raydium".to_string()],
        watched_tokens: vec![SOL_MINT.to_string(), USDC_MINT.to_string()],
        max_investment: Decimal::from(1000),
        min_profit_threshold: 0.01,
        stop_loss_percent: 0.1,
    }
}

/// A should-execute decision carrying the given action.
pub fn executing_decision(
    action: solstice::types::StrategyAction,
    next_check_minutes: i64,
) -> Decision {
    Decision {
        action,
        predicted_yield: 0.03,
        confidence: 0.8,
        risk_score: 0.3,
        should_execute: true,
        next_check_minutes,
    }
}

pub fn deposit_action(amount: Decimal) -> solstice::types::StrategyAction {
    solstice::types::StrategyAction::Lending {
        action: LendingAction::Deposit,
        token: USDC_MINT.to_string(),
        amount,
        protocol: Protocol::Marginfi,
    }
}
