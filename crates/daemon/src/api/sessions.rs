//! Session API endpoints — the primary interface for driving sessions.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_core::Stream;
use serde::Deserialize;
use serde_json::Value;

use archon_domain::policy::RuntimeOptions;

use crate::api::error_response;
use crate::service::StartSessionRequest;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct StartTurnRequest {
    /// User message text.
    pub text: String,
    #[serde(default)]
    pub options: RuntimeOptions,
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    #[serde(default)]
    pub request_id: Option<i64>,
    /// Opaque decision payload forwarded to the provider
    /// (e.g. `{"decision": "accept"}`).
    #[serde(default)]
    pub decision: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct DebugQuery {
    #[serde(default)]
    pub follow: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ItemsQuery {
    #[serde(default = "default_items_limit")]
    pub limit: usize,
}

fn default_items_limit() -> usize {
    200
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Response {
    match state.service.start_session(req) {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn list_sessions(State(state): State<AppState>) -> Response {
    Json(state.service.list_sessions()).into_response()
}

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.get_session(&id) {
        Ok(session) => Json(session).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn kill_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.kill(&id).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => error_response(e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turns, approvals, interrupts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn start_turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<StartTurnRequest>,
) -> Response {
    match state.service.start_turn(&id, &req.text, req.options).await {
        Ok(turn_id) => Json(serde_json::json!({ "turn_id": turn_id })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn respond(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RespondRequest>,
) -> Response {
    match state
        .service
        .respond(&id, req.request_id, req.decision)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn interrupt(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.interrupt(&id).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn list_approvals(State(state): State<AppState>) -> Response {
    Json(state.service.pending_approvals()).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `GET /v1/sessions/:id/events` — live SSE subscription through the hub.
/// The stream is lossy under subscriber lag; clients needing a loss-free
/// view combine `/items` with this subscription.
pub async fn session_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let (mut rx, canceller) = match state.service.subscribe(&id).await {
        Ok(pair) => pair,
        Err(e) => return error_response(e),
    };

    let stream = async_stream::stream! {
        // Held for the stream's lifetime; dropping it cancels the
        // subscription when the client disconnects.
        let _canceller = canceller;
        while let Some(event) = rx.recv().await {
            yield Ok::<_, Infallible>(sse_json(&event));
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// `GET /v1/sessions/:id/debug?follow=1` — snapshot of buffered raw
/// provider events, then (with `follow`) the live stream.
pub async fn session_debug(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DebugQuery>,
) -> Response {
    if let Err(e) = state.service.get_session(&id) {
        return error_response(e);
    }

    let follow = matches!(query.follow.as_deref(), Some("1") | Some("true"));
    let snapshot = state.debug.snapshot(&id);
    let live = follow.then(|| state.debug.subscribe(&id));

    let stream = debug_stream(snapshot, live);
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn debug_stream(
    snapshot: Vec<archon_domain::events::DebugEvent>,
    live: Option<(
        tokio::sync::mpsc::Receiver<archon_domain::events::DebugEvent>,
        archon_sessions::hub::Canceller<archon_domain::events::DebugEvent>,
    )>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        for event in snapshot {
            yield Ok(sse_json(&event));
        }
        if let Some((mut rx, canceller)) = live {
            let _canceller = canceller;
            while let Some(event) = rx.recv().await {
                yield Ok(sse_json(&event));
            }
        }
    }
}

pub async fn session_items(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ItemsQuery>,
) -> Response {
    match state.service.session_items(&id, query.limit) {
        Ok(items) => Json(items).into_response(),
        Err(e) => error_response(e),
    }
}

fn sse_json<T: serde::Serialize>(value: &T) -> Event {
    Event::default().data(serde_json::to_string(value).unwrap_or_default())
}
