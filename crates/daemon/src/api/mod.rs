//! HTTP API.
//!
//! Routes are split into **public** (`/health`) and **protected**
//! (everything under `/v1`, gated behind the bearer-token middleware).

pub mod admin;
pub mod auth;
pub mod sessions;
pub mod workspaces;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};

use archon_domain::error::Error;

use crate::state::AppState;

/// Build the full API router. `state` is needed to wire up the auth
/// middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(admin::health));

    let protected = Router::new()
        // Sessions
        .route("/v1/sessions", post(sessions::start_session))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:id", get(sessions::get_session))
        .route("/v1/sessions/:id", delete(sessions::kill_session))
        .route("/v1/sessions/:id/turns", post(sessions::start_turn))
        .route("/v1/sessions/:id/respond", post(sessions::respond))
        .route("/v1/sessions/:id/interrupt", post(sessions::interrupt))
        .route("/v1/sessions/:id/events", get(sessions::session_events))
        .route("/v1/sessions/:id/debug", get(sessions::session_debug))
        .route("/v1/sessions/:id/items", get(sessions::session_items))
        // Approvals
        .route("/v1/approvals", get(sessions::list_approvals))
        // Workspaces
        .route("/v1/workspaces", post(workspaces::create_workspace))
        .route("/v1/workspaces", get(workspaces::list_workspaces))
        .route("/v1/workspaces/:id", get(workspaces::get_workspace))
        .route("/v1/workspaces/:id", put(workspaces::update_workspace))
        .route("/v1/workspaces/:id", delete(workspaces::delete_workspace))
        .route(
            "/v1/workspaces/:id/worktrees",
            post(workspaces::create_worktree),
        )
        .route(
            "/v1/workspaces/:id/worktrees",
            get(workspaces::list_worktrees),
        )
        // Workspace groups
        .route("/v1/workspace-groups", post(workspaces::create_group))
        .route("/v1/workspace-groups", get(workspaces::list_groups))
        .route("/v1/workspace-groups/:id", get(workspaces::get_group))
        .route("/v1/workspace-groups/:id", put(workspaces::update_group))
        .route("/v1/workspace-groups/:id", delete(workspaces::delete_group))
        // Lifecycle
        .route("/v1/shutdown", post(admin::shutdown))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`,
/// with the status derived from the engine's error kind.
pub(crate) fn error_response(e: Error) -> Response {
    let status = match &e {
        Error::Invalid(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::TurnInProgress(_) => StatusCode::CONFLICT,
        Error::Transport { .. } => StatusCode::BAD_GATEWAY,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}
