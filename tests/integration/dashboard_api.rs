//! Dashboard API over a live scheduler.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use tower::ServiceExt;

use solstice::dashboard::build_router;
use solstice::types::{ActionReceipt, Decision};

use crate::fakes::{deposit_action, engine_with_agents, executing_decision};

#[tokio::test]
async fn agents_endpoint_reflects_scheduler_state() {
    let engine = engine_with_agents(executing_decision(deposit_action(dec!(100)), 5), &["A1"]).await;
    engine
        .executor
        .push_receipt(ActionReceipt::filled("tx-1", dec!(100), dec!(2.5)));
    engine.scheduler.register("A1").await.unwrap();
    engine.scheduler.activate("A1").await;
    engine.scheduler.tick(Utc::now() + Duration::seconds(1)).await;

    let app = build_router(engine.scheduler.clone());
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/agents")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
    let agents: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["agent_id"], "A1");
    assert_eq!(agents[0]["status"], "active");
    assert_eq!(agents[0]["execution_count"], 1);
    assert_eq!(agents[0]["open_positions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn agent_detail_and_overview_endpoints() {
    let engine = engine_with_agents(Decision::hold(5), &["A1", "A2"]).await;
    engine.scheduler.register("A1").await.unwrap();
    engine.scheduler.register("A2").await.unwrap();
    engine.scheduler.activate("A1").await;

    let app = build_router(engine.scheduler.clone());
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/agents/A1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let app = build_router(engine.scheduler.clone());
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/agents/missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let app = build_router(engine.scheduler.clone());
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/overview")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
    let overview: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(overview["agents"], 2);
    assert_eq!(overview["active"], 1);
}
