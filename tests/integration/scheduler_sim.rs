//! End-to-end scheduler scenarios against deterministic fakes and a real
//! in-memory SQLite store.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use solstice::storage::AgentStore;
use solstice::types::{ActionReceipt, AgentStatus, Decision, StrategyAction};

use crate::fakes::{deposit_action, engine_with_agents, executing_decision};

#[tokio::test]
async fn successful_cycle_updates_runtime_and_store() {
    let engine = engine_with_agents(executing_decision(deposit_action(dec!(100)), 5), &["A1"]).await;
    engine
        .executor
        .push_receipt(ActionReceipt::filled("tx-1", dec!(100), dec!(2.5)));

    engine.scheduler.register("A1").await.unwrap();
    engine.scheduler.activate("A1").await;

    let now = Utc::now() + Duration::seconds(1);
    let executed = engine.scheduler.tick(now).await;
    assert_eq!(executed, vec!["A1".to_string()]);

    // Runtime state reflects the cycle exactly.
    let snapshot = engine.scheduler.get_status("A1").await.unwrap();
    assert_eq!(snapshot.execution_count, 1);
    assert_eq!(snapshot.cumulative_profit, dec!(2.5));
    assert_eq!(snapshot.next_execution, Some(now + Duration::minutes(5)));
    assert_eq!(snapshot.last_execution, Some(now));
    assert_eq!(snapshot.open_positions.len(), 1);

    // The execution record and counters landed in the store.
    let config = engine.store.get_agent("A1").await.unwrap().unwrap();
    assert_eq!(config.id, "A1");
}

#[tokio::test]
async fn predictor_outage_applies_fixed_backoff_without_counting() {
    let engine = engine_with_agents(Decision::hold(5), &["A1"]).await;
    engine.predictor.push_failure();

    engine.scheduler.register("A1").await.unwrap();
    engine.scheduler.activate("A1").await;

    let now = Utc::now() + Duration::seconds(1);
    engine.scheduler.tick(now).await;

    let snapshot = engine.scheduler.get_status("A1").await.unwrap();
    assert_eq!(snapshot.status, AgentStatus::Active);
    assert_eq!(snapshot.execution_count, 0);
    assert_eq!(snapshot.next_execution, Some(now + Duration::minutes(30)));

    // The next tick after the backoff window runs normally.
    let later = now + Duration::minutes(31);
    let executed = engine.scheduler.tick(later).await;
    assert_eq!(executed.len(), 1);
    assert_eq!(
        engine
            .scheduler
            .get_status("A1")
            .await
            .unwrap()
            .execution_count,
        1
    );
}

#[tokio::test]
async fn hold_decision_skips_executor_but_reschedules() {
    let engine = engine_with_agents(Decision::hold(45), &["A1"]).await;
    engine.scheduler.register("A1").await.unwrap();
    engine.scheduler.activate("A1").await;

    let now = Utc::now() + Duration::seconds(1);
    engine.scheduler.tick(now).await;

    let snapshot = engine.scheduler.get_status("A1").await.unwrap();
    assert_eq!(snapshot.execution_count, 1);
    assert_eq!(snapshot.next_execution, Some(now + Duration::minutes(45)));
    assert_eq!(engine.executor.call_count(), 0);
}

#[tokio::test]
async fn multi_step_sequence_aborts_midway_and_keeps_partial_profit() {
    let action = StrategyAction::MultiHop {
        steps: vec![
            deposit_action(dec!(10)),
            deposit_action(dec!(20)),
            deposit_action(dec!(30)),
        ],
    };
    let engine = engine_with_agents(executing_decision(action, 5), &["A1"]).await;
    engine
        .executor
        .push_receipt(ActionReceipt::filled("tx-1", dec!(10), dec!(1.0)));
    engine.executor.push_receipt(ActionReceipt {
        success: false,
        tx_reference: None,
        output_amount: Decimal::ZERO,
        profit: dec!(0.5),
        error: Some("slippage exceeded".to_string()),
    });

    engine.scheduler.register("A1").await.unwrap();
    engine.scheduler.activate("A1").await;
    engine.scheduler.tick(Utc::now() + Duration::seconds(1)).await;

    let snapshot = engine.scheduler.get_status("A1").await.unwrap();
    // Two steps attempted, third never dispatched.
    assert_eq!(engine.executor.call_count(), 2);
    // Overall failure, but profit from the attempted steps is kept.
    assert_eq!(snapshot.cumulative_profit, dec!(1.5));
    assert_eq!(snapshot.execution_count, 1);
    // Only the successful first step left a position behind.
    assert_eq!(snapshot.open_positions.len(), 1);
}

#[tokio::test]
async fn stop_closes_positions_and_halts_scheduling() {
    let engine = engine_with_agents(executing_decision(deposit_action(dec!(100)), 1), &["A1"]).await;
    engine
        .executor
        .push_receipt(ActionReceipt::filled("tx-1", dec!(100), dec!(1.0)));

    engine.scheduler.register("A1").await.unwrap();
    engine.scheduler.activate("A1").await;
    engine.scheduler.tick(Utc::now() + Duration::seconds(1)).await;

    // One position is open from the deposit.
    let snapshot = engine.scheduler.get_status("A1").await.unwrap();
    assert_eq!(snapshot.open_positions.len(), 1);
    let position_id = snapshot.open_positions[0].id.clone();

    assert!(engine.scheduler.stop("A1").await);

    let stopped = engine.scheduler.get_status("A1").await.unwrap();
    assert_eq!(stopped.status, AgentStatus::Stopped);
    assert!(stopped.open_positions.is_empty());
    assert_eq!(*engine.executor.closed.lock().unwrap(), vec![position_id]);

    // A stopped agent is never dispatched again.
    let executed = engine.scheduler.tick(Utc::now() + Duration::hours(1)).await;
    assert!(executed.is_empty());

    // And pausing it is a no-op that leaves it stopped.
    assert!(engine.scheduler.pause("A1").await);
    assert_eq!(
        engine.scheduler.get_status("A1").await.unwrap().status,
        AgentStatus::Stopped
    );
}

#[tokio::test]
async fn agents_interleave_without_interference() {
    let engine = engine_with_agents(Decision::hold(5), &["A1", "A2", "A3"]).await;
    for id in ["A1", "A2", "A3"] {
        engine.scheduler.register(id).await.unwrap();
        engine.scheduler.activate(id).await;
    }
    // A2's predictor call fails this round; dispatch order is id order.
    engine.predictor.push_decision(Decision::hold(5));
    engine.predictor.push_failure();
    engine.predictor.push_decision(Decision::hold(5));

    let now = Utc::now() + Duration::seconds(1);
    let executed = engine.scheduler.tick(now).await;
    assert_eq!(executed, vec!["A1".to_string(), "A2".to_string(), "A3".to_string()]);

    assert_eq!(engine.scheduler.get_status("A1").await.unwrap().execution_count, 1);
    let a2 = engine.scheduler.get_status("A2").await.unwrap();
    assert_eq!(a2.execution_count, 0);
    assert_eq!(a2.next_execution, Some(now + Duration::minutes(30)));
    assert_eq!(engine.scheduler.get_status("A3").await.unwrap().execution_count, 1);
}

#[tokio::test]
async fn deleted_agent_record_parks_agent_until_reactivated() {
    let engine = engine_with_agents(Decision::hold(5), &[]).await;
    // Registered with the scheduler, but no persisted row exists.
    engine.scheduler.register("A1").await.unwrap();
    engine.scheduler.activate("A1").await;

    engine.scheduler.tick(Utc::now() + Duration::seconds(1)).await;

    let snapshot = engine.scheduler.get_status("A1").await.unwrap();
    assert_eq!(snapshot.status, AgentStatus::Error);
    assert!(snapshot.next_execution.is_none());

    // Seeding the row and re-activating recovers the agent.
    engine
        .store
        .upsert_agent(&crate::fakes::sample_config("A1"), AgentStatus::Active)
        .await
        .unwrap();
    assert!(engine.scheduler.activate("A1").await);
    let executed = engine.scheduler.tick(Utc::now() + Duration::seconds(1)).await;
    assert_eq!(executed.len(), 1);
    assert_eq!(
        engine.scheduler.get_status("A1").await.unwrap().status,
        AgentStatus::Active
    );
}

#[tokio::test]
async fn registration_delay_defers_first_cycle() {
    let engine = engine_with_agents(Decision::hold(5), &["A1"]).await;
    let snapshot = engine.scheduler.register("A1").await.unwrap();

    // Freshly registered agents are created, not active, and their
    // due-time sits roughly one registration delay in the future.
    assert_eq!(snapshot.status, AgentStatus::Created);
    let due = snapshot.next_execution.unwrap();
    assert!(due > Utc::now() + Duration::seconds(30));
    assert!(due <= Utc::now() + Duration::seconds(90));
}
