use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};

use crate::AppState;

/// GET /health. Anonymous, never rate-limited.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
        "uptime": state.started_at.elapsed().as_secs(),
        "sessions": state.sessions.live_count(),
    }))
}

/// GET /health/ready
pub async fn ready() -> impl IntoResponse {
    Json(serde_json::json!({
        "ready": true,
        "timestamp": chrono::Utc::now(),
    }))
}

/// GET /health/live
pub async fn live() -> impl IntoResponse {
    Json(serde_json::json!({
        "alive": true,
        "timestamp": chrono::Utc::now(),
    }))
}
