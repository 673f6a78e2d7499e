//! Agent scheduler.
//!
//! Holds the authoritative runtime table for every registered agent and
//! decides, each tick, which agents are due to run. All table mutation
//! happens here, under one lock, from lifecycle calls and from outcome
//! application — the dispatcher only computes.
//!
//! The correctness-critical invariant is at most one in-flight cycle per
//! agent at any instant. It is enforced structurally: an agent is marked
//! in-flight under the table lock before dispatch and is invisible to
//! further ticks until its outcome has been applied.

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::engine::dispatcher::{CycleDispatcher, CycleOutcome};
use crate::providers::ExecutionProvider;
use crate::types::{AgentStatus, EngineError, Position};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Scheduler timing knobs. The tick interval is an engine-wide constant,
/// not a per-agent property.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval_secs: u64,
    pub registration_delay_secs: i64,
    pub error_backoff_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            registration_delay_secs: 60,
            error_backoff_minutes: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn from_app(section: &crate::config::SchedulerSection) -> Self {
        Self {
            tick_interval_secs: section.tick_interval_secs,
            registration_delay_secs: section.registration_delay_secs,
            error_backoff_minutes: section.error_backoff_minutes,
        }
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// In-memory runtime state for one registered agent.
#[derive(Debug, Clone)]
struct AgentRuntime {
    agent_id: String,
    status: AgentStatus,
    last_execution: Option<DateTime<Utc>>,
    next_execution: Option<DateTime<Utc>>,
    execution_count: u64,
    cumulative_profit: Decimal,
    open_positions: HashMap<String, Position>,
    /// True while a cycle is running for this agent.
    in_flight: bool,
}

impl AgentRuntime {
    fn new(agent_id: &str, next_execution: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            status: AgentStatus::Created,
            last_execution: None,
            next_execution: Some(next_execution),
            execution_count: 0,
            cumulative_profit: Decimal::ZERO,
            open_positions: HashMap::new(),
            in_flight: false,
        }
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == AgentStatus::Active
            && !self.in_flight
            && self.next_execution.map_or(false, |t| t <= now)
    }

    fn snapshot(&self) -> RuntimeSnapshot {
        RuntimeSnapshot {
            agent_id: self.agent_id.clone(),
            status: self.status,
            last_execution: self.last_execution,
            next_execution: self.next_execution,
            execution_count: self.execution_count,
            cumulative_profit: self.cumulative_profit,
            open_positions: self.open_positions.values().cloned().collect(),
        }
    }
}

/// Read-only view of an agent's runtime state, exposed to callers
/// (dashboard, tests) without handing out the table entry itself.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    pub agent_id: String,
    pub status: AgentStatus,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub cumulative_profit: Decimal,
    pub open_positions: Vec<Position>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct AgentScheduler {
    agents: RwLock<HashMap<String, AgentRuntime>>,
    dispatcher: Arc<CycleDispatcher>,
    executor: Arc<dyn ExecutionProvider>,
    config: SchedulerConfig,
}

impl AgentScheduler {
    pub fn new(
        dispatcher: CycleDispatcher,
        executor: Arc<dyn ExecutionProvider>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            dispatcher: Arc::new(dispatcher),
            executor,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // -- Lifecycle operations --------------------------------------------

    /// Register an agent with the scheduler. The agent starts in `created`
    /// and becomes eligible shortly after (registration delay).
    pub async fn register(&self, agent_id: &str) -> Result<RuntimeSnapshot, EngineError> {
        let mut agents = self.agents.write().await;
        if agents.contains_key(agent_id) {
            return Err(EngineError::AlreadyRegistered(agent_id.to_string()));
        }

        let next = Utc::now() + Duration::seconds(self.config.registration_delay_secs);
        let runtime = AgentRuntime::new(agent_id, next);
        let snapshot = runtime.snapshot();
        agents.insert(agent_id.to_string(), runtime);

        info!(agent_id = %agent_id, next_execution = %next, "Agent registered");
        Ok(snapshot)
    }

    /// Activate an agent for autonomous execution. Valid from any state,
    /// including `error` (operator recovery). Returns false for unknown ids.
    pub async fn activate(&self, agent_id: &str) -> bool {
        let mut agents = self.agents.write().await;
        let Some(runtime) = agents.get_mut(agent_id) else {
            warn!(agent_id = %agent_id, "Activate: agent not found");
            return false;
        };

        runtime.status = AgentStatus::Active;
        runtime.next_execution = Some(Utc::now());
        info!(agent_id = %agent_id, "Agent activated");
        true
    }

    /// Pause an active agent. Pausing a non-active agent is an accepted
    /// no-op: the call succeeds but the state is left untouched, so a
    /// stopped agent can never drift back into `paused`.
    pub async fn pause(&self, agent_id: &str) -> bool {
        let mut agents = self.agents.write().await;
        let Some(runtime) = agents.get_mut(agent_id) else {
            warn!(agent_id = %agent_id, "Pause: agent not found");
            return false;
        };

        if runtime.status == AgentStatus::Active {
            runtime.status = AgentStatus::Paused;
            info!(agent_id = %agent_id, "Agent paused");
        } else {
            info!(agent_id = %agent_id, status = %runtime.status, "Pause ignored for non-active agent");
        }
        true
    }

    /// Stop an agent: close every open position through the execution
    /// provider, then mark it stopped. Close failures are logged and do
    /// not leave entries behind — the position map is cleared regardless,
    /// matching the executor's best-effort close semantics.
    pub async fn stop(&self, agent_id: &str) -> bool {
        let positions: Vec<Position> = {
            let agents = self.agents.read().await;
            match agents.get(agent_id) {
                Some(runtime) => runtime.open_positions.values().cloned().collect(),
                None => {
                    warn!(agent_id = %agent_id, "Stop: agent not found");
                    return false;
                }
            }
        };

        if !positions.is_empty() {
            let closures = positions
                .iter()
                .map(|position| self.executor.close_position(agent_id, position));
            let receipts = futures::future::join_all(closures).await;
            for (position, receipt) in positions.iter().zip(&receipts) {
                if receipt.success {
                    info!(agent_id = %agent_id, position = %position, "Position closed");
                } else {
                    warn!(
                        agent_id = %agent_id,
                        position = %position,
                        error = receipt.error.as_deref().unwrap_or("unknown"),
                        "Position close failed"
                    );
                }
            }
        }

        let mut agents = self.agents.write().await;
        let Some(runtime) = agents.get_mut(agent_id) else {
            return false;
        };
        runtime.open_positions.clear();
        runtime.status = AgentStatus::Stopped;
        runtime.next_execution = None;
        info!(agent_id = %agent_id, closed = positions.len(), "Agent stopped");
        true
    }

    /// Remove an agent from the runtime table entirely.
    pub async fn deregister(&self, agent_id: &str) -> bool {
        let removed = self.agents.write().await.remove(agent_id).is_some();
        if removed {
            info!(agent_id = %agent_id, "Agent deregistered");
        }
        removed
    }

    // -- Status queries ---------------------------------------------------

    pub async fn get_status(&self, agent_id: &str) -> Option<RuntimeSnapshot> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(AgentRuntime::snapshot)
    }

    pub async fn get_all_statuses(&self) -> Vec<RuntimeSnapshot> {
        let mut snapshots: Vec<_> = self
            .agents
            .read()
            .await
            .values()
            .map(AgentRuntime::snapshot)
            .collect();
        snapshots.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        snapshots
    }

    // -- Tick loop ---------------------------------------------------------

    /// Run one scheduling pass: every active agent whose due-time has
    /// passed gets one cycle, sequentially, in id order. Returns the ids
    /// that were dispatched.
    ///
    /// A fault in one agent's cycle is absorbed into that agent's backoff
    /// and never affects the others or the calling loop.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<String> {
        let due: Vec<String> = {
            let mut agents = self.agents.write().await;
            let mut due: Vec<&mut AgentRuntime> = agents
                .values_mut()
                .filter(|runtime| runtime.is_due(now))
                .collect();
            due.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
            due.iter_mut()
                .map(|runtime| {
                    runtime.in_flight = true;
                    runtime.agent_id.clone()
                })
                .collect()
        };

        let mut executed = Vec::with_capacity(due.len());
        for agent_id in due {
            self.run_agent_cycle(&agent_id, now).await;
            executed.push(agent_id);
        }
        executed
    }

    /// Run and apply one cycle for one agent. The dispatcher future runs
    /// in its own task so a panic surfaces as a fault, not a dead loop.
    async fn run_agent_cycle(&self, agent_id: &str, now: DateTime<Utc>) {
        let positions = {
            let agents = self.agents.read().await;
            agents
                .get(agent_id)
                .map(|runtime| runtime.open_positions.clone())
                .unwrap_or_default()
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let id = agent_id.to_string();
        let handle = tokio::spawn(async move { dispatcher.run_cycle(&id, &positions).await });
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("Agent cycle aborted: {e}")),
        };

        self.apply_outcome(agent_id, now, result).await;
    }

    /// Fold a cycle result into the runtime table. This is the only place
    /// execution results touch agent state.
    async fn apply_outcome(
        &self,
        agent_id: &str,
        now: DateTime<Utc>,
        result: anyhow::Result<CycleOutcome>,
    ) {
        let mut agents = self.agents.write().await;
        let Some(runtime) = agents.get_mut(agent_id) else {
            // Deregistered while in flight; nothing left to update.
            return;
        };
        runtime.in_flight = false;

        match result {
            Ok(CycleOutcome::Completed(cycle)) => {
                let executed = cycle.executed();
                let profit = cycle.profit();
                runtime.execution_count += 1;
                runtime.cumulative_profit += profit;
                runtime.last_execution = Some(now);
                runtime.next_execution =
                    Some(now + Duration::minutes(cycle.decision.next_check_minutes));
                for position in cycle.opened_positions {
                    runtime.open_positions.insert(position.id.clone(), position);
                }
                info!(
                    agent_id = %agent_id,
                    executed,
                    profit = %profit,
                    cumulative_profit = %runtime.cumulative_profit,
                    execution_count = runtime.execution_count,
                    next_execution = ?runtime.next_execution,
                    "Cycle applied"
                );
            }
            Ok(CycleOutcome::DegradedHold) => {
                runtime.next_execution =
                    Some(now + Duration::minutes(self.config.error_backoff_minutes));
                info!(
                    agent_id = %agent_id,
                    backoff_minutes = self.config.error_backoff_minutes,
                    "Degraded cycle, backing off"
                );
            }
            Ok(CycleOutcome::ConfigMissing) => {
                runtime.status = AgentStatus::Error;
                runtime.next_execution = None;
                error!(agent_id = %agent_id, "Agent record missing, parked in error state");
            }
            Err(e) => {
                runtime.next_execution =
                    Some(now + Duration::minutes(self.config.error_backoff_minutes));
                error!(
                    agent_id = %agent_id,
                    error = %e,
                    backoff_minutes = self.config.error_backoff_minutes,
                    "Cycle faulted, backing off"
                );
            }
        }
    }

    // -- Shutdown ----------------------------------------------------------

    /// Stop every registered agent, closing all open positions, so the
    /// process exits with no dangling exposure.
    pub async fn shutdown(&self) {
        let agent_ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        info!(agents = agent_ids.len(), "Scheduler shutting down");
        for agent_id in agent_ids {
            self.stop(&agent_id).await;
        }
    }

    // -- Test support ------------------------------------------------------

    /// Seed an open position directly, bypassing the execution path.
    #[cfg(test)]
    pub(crate) async fn inject_position(&self, agent_id: &str, position: Position) {
        let mut agents = self.agents.write().await;
        if let Some(runtime) = agents.get_mut(agent_id) {
            runtime.open_positions.insert(position.id.clone(), position);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
