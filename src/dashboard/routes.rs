//! Dashboard API route handlers.
//!
//! All endpoints are read-only JSON views over the scheduler's runtime
//! table, accessed through the `StatusSource` seam so handlers can be
//! tested against a fake.

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::engine::scheduler::RuntimeSnapshot;
use crate::types::AgentStatus;

// ---------------------------------------------------------------------------
// Status source
// ---------------------------------------------------------------------------

/// Read-only view over agent runtime states.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn all_statuses(&self) -> Vec<RuntimeSnapshot>;
    async fn status_of(&self, agent_id: &str) -> Option<RuntimeSnapshot>;
}

pub type AppState = Arc<dyn StatusSource>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct OverviewResponse {
    pub agents: usize,
    pub active: usize,
    pub errored: usize,
    pub total_executions: u64,
    pub total_profit: Decimal,
    pub open_positions: usize,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/agents
pub async fn get_agents(State(state): State<AppState>) -> Json<Vec<RuntimeSnapshot>> {
    Json(state.all_statuses().await)
}

/// GET /api/agents/:id
pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<RuntimeSnapshot>, StatusCode> {
    state
        .status_of(&agent_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// GET /api/overview
pub async fn get_overview(State(state): State<AppState>) -> Json<OverviewResponse> {
    let snapshots = state.all_statuses().await;
    Json(OverviewResponse {
        agents: snapshots.len(),
        active: snapshots
            .iter()
            .filter(|s| s.status == AgentStatus::Active)
            .count(),
        errored: snapshots
            .iter()
            .filter(|s| s.status == AgentStatus::Error)
            .count(),
        total_executions: snapshots.iter().map(|s| s.execution_count).sum(),
        total_profit: snapshots.iter().map(|s| s.cumulative_profit).sum(),
        open_positions: snapshots.iter().map(|s| s.open_positions.len()).sum(),
    })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    struct FakeSource {
        snapshots: Vec<RuntimeSnapshot>,
    }

    #[async_trait]
    impl StatusSource for FakeSource {
        async fn all_statuses(&self) -> Vec<RuntimeSnapshot> {
            self.snapshots.clone()
        }

        async fn status_of(&self, agent_id: &str) -> Option<RuntimeSnapshot> {
            self.snapshots
                .iter()
                .find(|s| s.agent_id == agent_id)
                .cloned()
        }
    }

    fn snapshot(agent_id: &str, status: AgentStatus, profit: Decimal) -> RuntimeSnapshot {
        RuntimeSnapshot {
            agent_id: agent_id.to_string(),
            status,
            last_execution: None,
            next_execution: None,
            execution_count: 3,
            cumulative_profit: profit,
            open_positions: Vec::new(),
        }
    }

    fn state_with(snapshots: Vec<RuntimeSnapshot>) -> AppState {
        Arc::new(FakeSource { snapshots })
    }

    #[tokio::test]
    async fn test_get_agents() {
        let state = state_with(vec![
            snapshot("a1", AgentStatus::Active, dec!(2.5)),
            snapshot("a2", AgentStatus::Paused, dec!(0)),
        ]);
        let Json(agents) = get_agents(State(state)).await;
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].agent_id, "a1");
    }

    #[tokio::test]
    async fn test_get_agent_found() {
        let state = state_with(vec![snapshot("a1", AgentStatus::Active, dec!(1))]);
        let result = get_agent(State(state), Path("a1".to_string())).await;
        assert_eq!(result.unwrap().0.agent_id, "a1");
    }

    #[tokio::test]
    async fn test_get_agent_not_found() {
        let state = state_with(vec![]);
        let result = get_agent(State(state), Path("ghost".to_string())).await;
        assert_eq!(result.unwrap_err(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_overview_aggregates() {
        let state = state_with(vec![
            snapshot("a1", AgentStatus::Active, dec!(2.5)),
            snapshot("a2", AgentStatus::Error, dec!(-1.0)),
            snapshot("a3", AgentStatus::Stopped, dec!(0.5)),
        ]);
        let Json(overview) = get_overview(State(state)).await;
        assert_eq!(overview.agents, 3);
        assert_eq!(overview.active, 1);
        assert_eq!(overview.errored, 1);
        assert_eq!(overview.total_executions, 9);
        assert_eq!(overview.total_profit, dec!(2.0));
    }

    #[test]
    fn test_overview_serializes() {
        let overview = OverviewResponse {
            agents: 2,
            active: 1,
            errored: 0,
            total_executions: 10,
            total_profit: dec!(3.25),
            open_positions: 4,
        };
        let json = serde_json::to_string(&overview).unwrap();
        assert!(json.contains("\"agents\":2"));
        assert!(json.contains("3.25"));
    }
}
