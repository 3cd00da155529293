//! Health probe and daemon lifecycle endpoints.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

/// `GET /health` — public, no auth.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `POST /v1/shutdown` — acknowledge, then invoke the registered shutdown
/// closure on a background task. The closure fires at most once.
pub async fn shutdown(State(state): State<AppState>) -> impl IntoResponse {
    let hook = state.shutdown.clone();
    tokio::spawn(async move {
        if hook.fire() {
            tracing::info!("shutdown hook fired");
        } else {
            tracing::debug!("shutdown already requested");
        }
    });
    Json(serde_json::json!({ "ok": true }))
}
