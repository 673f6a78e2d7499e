//! Dashboard — Axum web server for real-time monitoring.
//!
//! Serves a REST API and a self-contained HTML page over the scheduler's
//! runtime table. Read-only: agent lifecycle is owned by the engine's
//! callers, not this surface. CORS enabled for local development.

pub mod routes;

use async_trait::async_trait;
use axum::{
    http::{header, HeaderValue, Method},
    response::Html,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::engine::scheduler::{AgentScheduler, RuntimeSnapshot};
use routes::{AppState, StatusSource};

/// The embedded dashboard HTML (compiled into the binary).
const DASHBOARD_HTML: &str = include_str!("templates/index.html");

#[async_trait]
impl StatusSource for AgentScheduler {
    async fn all_statuses(&self) -> Vec<RuntimeSnapshot> {
        self.get_all_statuses().await
    }

    async fn status_of(&self, agent_id: &str) -> Option<RuntimeSnapshot> {
        self.get_status(agent_id).await
    }
}

/// Start the dashboard web server.
///
/// This spawns a background task — it doesn't block.
pub fn spawn_dashboard(state: AppState, port: u16) {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "Dashboard server starting on http://localhost:{port}");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .expect("Failed to bind dashboard port");

        axum::serve(listener, app)
            .await
            .expect("Dashboard server error");
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // API routes
        .route("/api/agents", get(routes::get_agents))
        .route("/api/agents/:id", get(routes::get_agent))
        .route("/api/overview", get(routes::get_overview))
        .route("/health", get(routes::health))
        // Dashboard HTML
        .route("/", get(serve_dashboard))
        .layer(cors)
        .with_state(state)
}

/// Serve the embedded HTML dashboard.
async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
