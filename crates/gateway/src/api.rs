//! HTTP health endpoint.

use crate::stats::GatewayStats;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application state.
pub struct AppState {
    pub gate_name: String,
    pub stats: Arc<GatewayStats>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    gate: String,
    connections: usize,
    sessions: usize,
    pending_verifications: usize,
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let snapshot = state.stats.snapshot();
    Json(HealthResponse {
        status: "ok",
        gate: state.gate_name.clone(),
        connections: snapshot.connections,
        sessions: snapshot.sessions,
        pending_verifications: snapshot.pending_verifications,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_reports_counts() {
        let stats = Arc::new(GatewayStats::new());
        stats.record(3, 2, 1);
        let state = Arc::new(AppState {
            gate_name: "gate-1".to_string(),
            stats,
        });

        let Json(health) = health_handler(State(state)).await;
        let value = serde_json::to_value(&health).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "status": "ok",
                "gate": "gate-1",
                "connections": 3,
                "sessions": 2,
                "pending_verifications": 1,
            })
        );
    }
}
