//! End-to-end flow for an opencode live session against a mock server.
//!
//! The mock exposes the session message history, records permission
//! replies, and feeds a scripted SSE event stream: approval request, idle
//! (turn complete), idle again (stale repeat).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

use archon_domain::error::Result;
use archon_domain::policy::RuntimeOptions;
use archon_sessions::live::EngineDeps;
use archon_sessions::manager::CodexLaunch;
use archon_sessions::notifier::{
    CompletionNotifier, DomainNotification, NotificationPublisher, STATUS_APPROVAL_REQUIRED,
};
use archon_sessions::sync::SOURCE_RECONCILE;
use archon_sessions::{
    ApprovalStore, DebugCenter, FreshnessTracker, ItemLog, Session, SessionManager,
    SessionMetaStore, SessionStore,
};
use archon_transport::http::{Credentials, OpencodeClient};
use archon_transport::synthesize_request_id;

struct ChannelPublisher(mpsc::UnboundedSender<DomainNotification>);

#[async_trait]
impl NotificationPublisher for ChannelPublisher {
    async fn publish(&self, notification: &DomainNotification) -> Result<()> {
        let _ = self.0.send(notification.clone());
        Ok(())
    }
}

#[derive(Clone)]
struct MockState {
    /// SSE records handed out one at a time.
    sse: Arc<Mutex<Option<mpsc::UnboundedReceiver<Value>>>>,
    /// Permission-reply paths observed by the server.
    permission_replies: Arc<Mutex<Vec<String>>>,
    /// Message history served to clients.
    history: Arc<Mutex<Vec<Value>>>,
}

async fn mock_opencode(state: MockState) -> String {
    async fn events(
        State(state): State<MockState>,
    ) -> Sse<impl futures_core::Stream<Item = std::result::Result<Event, Infallible>>> {
        let rx = state.sse.lock().take();
        let stream = async_stream::stream! {
            if let Some(mut rx) = rx {
                while let Some(record) = rx.recv().await {
                    yield Ok(Event::default().data(record.to_string()));
                }
            }
        };
        Sse::new(stream)
    }

    async fn messages(State(state): State<MockState>) -> Json<Value> {
        Json(Value::Array(state.history.lock().clone()))
    }

    async fn reply(
        State(state): State<MockState>,
        Path((session_id, permission_id)): Path<(String, String)>,
    ) -> Json<Value> {
        state
            .permission_replies
            .lock()
            .push(format!("/session/{session_id}/permissions/{permission_id}"));
        Json(json!({}))
    }

    // The prompt endpoint answers with the assistant reply and records it
    // in history, the way the real server's held-open request behaves.
    async fn prompt(State(state): State<MockState>) -> Json<Value> {
        let reply = remote_message("m-2", "assistant", "fresh reply");
        state.history.lock().push(reply.clone());
        Json(reply)
    }

    let app = Router::new()
        .route("/event", get(events))
        .route("/session/:id/message", get(messages).post(prompt))
        .route("/session/:id/permissions/:pid", post(reply))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn remote_message(id: &str, role: &str, text: &str) -> Value {
    json!({
        "info": { "id": id, "role": role },
        "parts": [{ "type": "text", "text": text }],
    })
}

#[tokio::test]
async fn opencode_turn_approval_reconcile_and_stale_suppression() {
    let (sse_tx, sse_rx) = mpsc::unbounded_channel();
    let state = MockState {
        sse: Arc::new(Mutex::new(Some(sse_rx))),
        permission_replies: Arc::new(Mutex::new(Vec::new())),
        history: Arc::new(Mutex::new(vec![remote_message("m-1", "user", "question")])),
    };
    let base_url = mock_opencode(state.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let (tx, mut notifications) = mpsc::unbounded_channel();
    let deps = EngineDeps {
        sessions: Arc::new(SessionStore::new(dir.path()).unwrap()),
        meta: Arc::new(SessionMetaStore::new(dir.path()).unwrap()),
        approvals: Arc::new(ApprovalStore::new(dir.path()).unwrap()),
        items: Arc::new(ItemLog::new(dir.path())),
        notifier: Arc::new(CompletionNotifier::new(Arc::new(ChannelPublisher(tx)))),
        freshness: Arc::new(FreshnessTracker::new()),
        debug: Arc::new(DebugCenter::new(dir.path())),
    };
    let client = Arc::new(OpencodeClient::new(
        base_url,
        Credentials::None,
        Duration::from_secs(5),
    ));
    let manager = SessionManager::new(
        deps.clone(),
        CodexLaunch {
            command: "true".into(),
            args: Vec::new(),
        },
        Some(client),
    );

    let session = Session::new("opencode", dir.path().to_path_buf(), "demo");
    let session_id = session.id.clone();
    deps.sessions.insert(session.clone());

    let live = manager.ensure(&session).await.unwrap();
    let (mut events, _cancel) = live.subscribe();

    let turn_id = manager
        .start_turn(&session_id, "question", RuntimeOptions::default())
        .await
        .unwrap();
    assert!(turn_id.starts_with("opencode-turn-"));

    // ── Approval round-trip ──────────────────────────────────────────
    sse_tx
        .send(json!({
            "type": "permission.updated",
            "properties": { "id": "perm-1", "type": "bash" },
        }))
        .unwrap();

    let request = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    let request_id = request.request_id.unwrap();
    assert_eq!(request_id, synthesize_request_id("perm-1"));

    let approval_note = timeout(Duration::from_secs(5), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(approval_note.status, STATUS_APPROVAL_REQUIRED);

    live.respond(request_id, json!({"decision": "accept"}))
        .await
        .unwrap();
    // The reply hit the session-scoped permission endpoint.
    let replies = state.permission_replies.lock().clone();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].ends_with("/permissions/perm-1"), "{}", replies[0]);
    assert!(deps.approvals.get(&session_id, request_id).is_none());

    // ── Completion with history reconciliation ───────────────────────
    // Wait for the background prompt submission to land the assistant
    // reply in history, then signal idle to trigger the reconcile pass.
    timeout(Duration::from_secs(5), async {
        while state.history.lock().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    sse_tx
        .send(json!({ "type": "session.idle", "properties": {} }))
        .unwrap();

    let first = timeout(Duration::from_secs(5), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, "completed");
    assert_eq!(first.payload.turn_output.as_deref(), Some("fresh reply"));
    assert_eq!(first.payload.turn_output_fresh, Some(true));
    assert_eq!(first.payload.artifact_sync_source, SOURCE_RECONCILE);
    assert!(first.payload.artifacts_persisted);

    // Remote items were appended to the local log in order.
    let items = deps.items.tail(&session_id, 10).unwrap();
    assert!(items.iter().any(|i| i["id"] == "m-2" && i["role"] == "assistant"));

    // ── Stale repeat of the same conversation head ───────────────────
    sse_tx
        .send(json!({ "type": "session.idle", "properties": {} }))
        .unwrap();

    let second = timeout(Duration::from_secs(5), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.payload.turn_output.as_deref(), Some(""));
    assert_eq!(second.payload.turn_output_fresh, Some(false));

    manager.kill(&session_id).await.unwrap();
}

#[tokio::test]
async fn opencode_interrupt_is_unsupported() {
    let (_sse_tx, sse_rx) = mpsc::unbounded_channel::<Value>();
    let state = MockState {
        sse: Arc::new(Mutex::new(Some(sse_rx))),
        permission_replies: Arc::new(Mutex::new(Vec::new())),
        history: Arc::new(Mutex::new(Vec::new())),
    };
    let base_url = mock_opencode(state).await;

    let dir = tempfile::tempdir().unwrap();
    let (tx, _notifications) = mpsc::unbounded_channel();
    let deps = EngineDeps {
        sessions: Arc::new(SessionStore::new(dir.path()).unwrap()),
        meta: Arc::new(SessionMetaStore::new(dir.path()).unwrap()),
        approvals: Arc::new(ApprovalStore::new(dir.path()).unwrap()),
        items: Arc::new(ItemLog::new(dir.path())),
        notifier: Arc::new(CompletionNotifier::new(Arc::new(ChannelPublisher(tx)))),
        freshness: Arc::new(FreshnessTracker::new()),
        debug: Arc::new(DebugCenter::new(dir.path())),
    };
    let client = Arc::new(OpencodeClient::new(
        base_url,
        Credentials::None,
        Duration::from_secs(5),
    ));
    let manager = SessionManager::new(
        deps.clone(),
        CodexLaunch {
            command: "true".into(),
            args: Vec::new(),
        },
        Some(client),
    );

    let session = Session::new("opencode", dir.path().to_path_buf(), "demo");
    deps.sessions.insert(session.clone());

    let live = manager.ensure(&session).await.unwrap();
    let err = live.interrupt().await.unwrap_err();
    assert!(matches!(err, archon_domain::error::Error::Unavailable(_)));

    manager.kill(&session.id).await.unwrap();
}
