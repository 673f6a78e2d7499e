//! Deterministic provider fakes for engine unit tests.
//!
//! All state is in-memory and fully controllable from test code, so the
//! scheduler and dispatcher can be exercised without any network or
//! database dependencies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::providers::{ExecutionProvider, MarketDataProvider, Predictor};
use crate::storage::AgentStore;
use crate::types::{
    ActionReceipt, AgentConfig, AgentStatus, Decision, ExecutionRecord, FarmAction,
    LendingAction, LiquidityAction, MarketContext, Portfolio, Position, Protocol,
};

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Market data fake returning a fixed context, or failing on demand.
pub struct FakeMarket {
    pub prices: HashMap<String, Decimal>,
    pub portfolio: Portfolio,
    pub fail: AtomicBool,
}

impl FakeMarket {
    pub fn new() -> Self {
        Self {
            prices: HashMap::new(),
            portfolio: Portfolio::default(),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MarketDataProvider for FakeMarket {
    async fn get_prices(&self, _mints: &[String]) -> Result<HashMap<String, Decimal>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("price feed down"));
        }
        Ok(self.prices.clone())
    }

    async fn get_protocol_state(
        &self,
        protocols: &[String],
    ) -> Result<HashMap<String, serde_json::Value>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("protocol feed down"));
        }
        Ok(protocols
            .iter()
            .map(|p| (p.clone(), serde_json::json!({})))
            .collect())
    }

    async fn get_portfolio(&self, _wallet: &str) -> Result<Portfolio> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("rpc down"));
        }
        Ok(self.portfolio.clone())
    }

    fn name(&self) -> &str {
        "fake-market"
    }
}

// ---------------------------------------------------------------------------
// Predictor
// ---------------------------------------------------------------------------

/// One scripted predictor response.
pub enum PredictorStep {
    Decide(Decision),
    Fail(String),
    /// Wait until the notify fires, then return the default decision.
    /// Used to hold a cycle in flight from test code.
    Block(Arc<Notify>),
}

/// Predictor fake that replays a script, falling back to a default
/// decision when the script runs dry.
pub struct ScriptedPredictor {
    steps: Mutex<VecDeque<PredictorStep>>,
    pub default: Decision,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedPredictor {
    pub fn new(default: Decision) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            default,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, step: PredictorStep) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Predictor for ScriptedPredictor {
    async fn decide(
        &self,
        agent_id: &str,
        _context: &MarketContext,
        _positions: &HashMap<String, Position>,
        _config: &AgentConfig,
    ) -> Result<Decision> {
        self.calls.lock().unwrap().push(agent_id.to_string());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(PredictorStep::Decide(d)) => Ok(d),
            Some(PredictorStep::Fail(msg)) => Err(anyhow!(msg)),
            Some(PredictorStep::Block(notify)) => {
                notify.notified().await;
                Ok(self.default.clone())
            }
            None => Ok(self.default.clone()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Execution fake that replays scripted receipts and records every call.
pub struct RecordingExecutor {
    receipts: Mutex<VecDeque<ActionReceipt>>,
    pub calls: Mutex<Vec<String>>,
    pub closed: Mutex<Vec<String>>,
}

impl RecordingExecutor {
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

    pub fn closed_positions(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }

    fn next_receipt(&self, kind: &str) -> ActionReceipt {
        self.calls.lock().unwrap().push(kind.to_string());
        self.receipts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ActionReceipt::filled(format!("tx-{kind}"), Decimal::ZERO, Decimal::ZERO))
    }
}

#[async_trait]
impl ExecutionProvider for RecordingExecutor {
    async fn execute_swap(
        &self,
        _agent_id: &str,
        _from_token: &str,
        _to_token: &str,
        _amount: Decimal,
        _slippage_bps: u32,
    ) -> ActionReceipt {
        self.next_receipt("swap")
    }

    async fn execute_lending(
        &self,
        _agent_id: &str,
        _protocol: Protocol,
        _action: LendingAction,
        _token: &str,
        _amount: Decimal,
    ) -> ActionReceipt {
        self.next_receipt("lending")
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
        self.next_receipt("liquidity")
    }

    async fn execute_yield_farm(
        &self,
        _agent_id: &str,
        _protocol: Protocol,
        _action: FarmAction,
        _farm_id: &str,
        _amount: Decimal,
    ) -> ActionReceipt {
        self.next_receipt("yield_farm")
    }

    async fn close_position(&self, _agent_id: &str, position: &Position) -> ActionReceipt {
        self.closed.lock().unwrap().push(position.id.clone());
        ActionReceipt::filled(format!("close-{}", position.id), position.size, Decimal::ZERO)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// In-memory agent store with switchable failure modes.
pub struct MemoryStore {
    pub agents: Mutex<HashMap<String, AgentConfig>>,
    pub saved: Mutex<Vec<ExecutionRecord>>,
    pub counter_calls: Mutex<Vec<(String, Decimal, bool)>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            saved: Mutex::new(Vec::new()),
            counter_calls: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn with_agent(config: AgentConfig) -> Self {
        let store = Self::new();
        store
            .agents
            .lock()
            .unwrap()
            .insert(config.id.clone(), config);
        store
    }

    pub fn saved_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentConfig>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("store unreachable"));
        }
        Ok(self.agents.lock().unwrap().get(agent_id).cloned())
    }

    async fn list_active_agents(&self) -> Result<Vec<AgentConfig>> {
        Ok(self.agents.lock().unwrap().values().cloned().collect())
    }

    async fn upsert_agent(&self, config: &AgentConfig, _status: AgentStatus) -> Result<()> {
        self.agents
            .lock()
            .unwrap()
            .insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn save_execution(&self, record: &ExecutionRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("store unreachable"));
        }
        self.saved.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn update_runtime_counters(
        &self,
        agent_id: &str,
        profit: Decimal,
        success: bool,
    ) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("store unreachable"));
        }
        self.counter_calls
            .lock()
            .unwrap()
            .push((agent_id.to_string(), profit, success));
        Ok(())
    }
}
