//! Ambient operability endpoints: liveness and session-count (SPEC_FULL.md
//! "Ambient stack", not part of spec.md's core protocol).

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use super::AppState;

pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn session_count(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.registry.health_snapshot().await;
    Json(serde_json::json!({
        "active_sessions": sessions.len(),
        "sessions": sessions.iter().map(|s| serde_json::json!({
            "session_id": s.session_id.to_string(),
            "malformed_frames": s.malformed_frames,
            "dropped_frames": s.dropped_frames,
        })).collect::<Vec<_>>(),
    }))
}
