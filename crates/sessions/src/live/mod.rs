//! Live sessions: per-provider runtime objects that own a transport.
//!
//! What a live session can do is modeled as an explicit capability set —
//! [`LiveSession`] (events, close, identity), [`TurnCapableSession`],
//! [`ApprovalCapableSession`] — so per-provider feature matrices are
//! visible at the type level instead of hiding in base-class no-ops.
//!
//! Each variant runs exactly one pump task which is the sole reader of the
//! transport's channels; when any stream closes, the session enters its
//! terminal closed state.

pub mod codex;
pub mod opencode;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use archon_domain::error::Result;
use archon_domain::events::SessionEvent;
use archon_domain::policy::RuntimeOptions;
use archon_domain::trace::TraceEvent;
use archon_transport::{Channels, NormalizedEvent};

use crate::approvals::{is_approval_method, Approval, ApprovalStore};
use crate::debug::DebugCenter;
use crate::freshness::FreshnessTracker;
use crate::hub::{Canceller, EventHub};
use crate::items::ItemLog;
use crate::meta::SessionMetaStore;
use crate::notifier::{CompletionNotifier, NotificationPayload, SessionContext};
use crate::reservation::TurnSlot;
use crate::store::{SessionStatus, SessionStore};
use crate::sync::SyncOutcome;

pub use codex::CodexSession;
pub use opencode::OpencodeSession;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capabilities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The narrowest live-session capability: identity, event subscription,
/// teardown.
#[async_trait]
pub trait LiveSession: Send + Sync {
    fn session_id(&self) -> &str;
    fn is_closed(&self) -> bool;
    fn subscriber_count(&self) -> usize;

    /// Subscribe to the session's event stream. After close the returned
    /// channel is already closed.
    fn subscribe(&self) -> (mpsc::Receiver<SessionEvent>, Canceller<SessionEvent>);

    /// Tear the session down. Idempotent; releases the transport.
    async fn close(&self, reason: &str);
}

/// Sessions that can run turns.
#[async_trait]
pub trait TurnCapableSession: LiveSession {
    async fn start_turn(&self, input: &str, options: RuntimeOptions) -> Result<String>;
    async fn interrupt(&self) -> Result<()>;
}

/// Sessions that mediate approval requests.
#[async_trait]
pub trait ApprovalCapableSession: LiveSession {
    async fn respond(&self, request_id: i64, response: Value) -> Result<()>;
}

/// Everything the manager stores: the full capability set.
pub trait ManagedSession: TurnCapableSession + ApprovalCapableSession {}
impl<T: TurnCapableSession + ApprovalCapableSession> ManagedSession for T {}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared core
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// State and collaborators shared by all live-session variants.
pub(crate) struct SessionCore {
    pub ctx: SessionContext,
    pub hub: EventHub<SessionEvent>,
    pub slot: TurnSlot,
    closed: AtomicBool,
    pub sessions: Arc<SessionStore>,
    pub meta: Arc<SessionMetaStore>,
    pub approvals: Arc<ApprovalStore>,
    pub items: Arc<ItemLog>,
    pub notifier: Arc<CompletionNotifier>,
    pub freshness: Arc<FreshnessTracker>,
    pub debug: Arc<DebugCenter>,
}

/// Collaborator bundle used to build session cores.
#[derive(Clone)]
pub struct EngineDeps {
    pub sessions: Arc<SessionStore>,
    pub meta: Arc<SessionMetaStore>,
    pub approvals: Arc<ApprovalStore>,
    pub items: Arc<ItemLog>,
    pub notifier: Arc<CompletionNotifier>,
    pub freshness: Arc<FreshnessTracker>,
    pub debug: Arc<DebugCenter>,
}

impl SessionCore {
    pub(crate) fn new(ctx: SessionContext, deps: &EngineDeps) -> Self {
        Self {
            ctx,
            hub: EventHub::new(),
            slot: TurnSlot::new(),
            closed: AtomicBool::new(false),
            sessions: deps.sessions.clone(),
            meta: deps.meta.clone(),
            approvals: deps.approvals.clone(),
            items: deps.items.clone(),
            notifier: deps.notifier.clone(),
            freshness: deps.freshness.clone(),
            debug: deps.debug.clone(),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// First caller wins; the winner performs the variant teardown.
    pub(crate) fn mark_closed(&self, reason: &str) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        TraceEvent::SessionClosed {
            session_id: self.ctx.session_id.clone(),
            reason: reason.to_owned(),
        }
        .emit();
        self.hub.shutdown();
        self.debug.close_session(&self.ctx.session_id);
        self.sessions
            .set_status(&self.ctx.session_id, SessionStatus::Inactive);
        true
    }

    /// Broadcast an upstream request and, for approval methods with a
    /// numeric id, persist the approval record and publish the
    /// approval-required notification.
    pub(crate) fn handle_request(&self, event: NormalizedEvent) {
        let request_id = event.request_id;
        self.hub.broadcast(SessionEvent {
            request_id,
            ..SessionEvent::notification(event.method.clone(), event.params.clone())
        });

        let Some(request_id) = request_id else {
            return;
        };
        if !is_approval_method(&event.method) {
            return;
        }

        self.approvals.upsert(Approval {
            session_id: self.ctx.session_id.clone(),
            request_id,
            method: event.method.clone(),
            params: event.params,
            created_at: chrono::Utc::now(),
        });
        self.notifier
            .notify_approval_required(&self.ctx, request_id, &event.method);
    }

    /// Freshness-check the synchronizer outcome, build the completion
    /// payload, and publish the notification.
    pub(crate) fn publish_completion(
        &self,
        turn_id: &str,
        status: &str,
        outcome: SyncOutcome,
        turn_error: Option<String>,
    ) {
        let fresh = self.freshness.mark_fresh(
            &self.ctx.session_id,
            &outcome.evidence_key,
            &outcome.output,
        );

        let payload = NotificationPayload {
            artifacts_persisted: outcome.artifacts_persisted,
            assistant_artifact_count: outcome.assistant_artifact_count,
            artifact_sync_source: outcome.source.to_owned(),
            turn_output: Some(if fresh { outcome.output } else { String::new() }),
            turn_output_fresh: Some(fresh),
            turn_error,
            artifact_sync_error: outcome.error,
            ..Default::default()
        };

        TraceEvent::TurnCompleted {
            session_id: self.ctx.session_id.clone(),
            turn_id: turn_id.to_owned(),
            status: status.to_owned(),
            artifacts_persisted: payload.artifacts_persisted,
        }
        .emit();

        self.notifier
            .notify_turn_completed(&self.ctx, turn_id, status, payload);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The pump
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Variant hooks invoked by the pump.
#[async_trait]
pub(crate) trait PumpHandler: Send + Sync + 'static {
    fn core(&self) -> &SessionCore;

    /// Run the variant's completion sequence for a terminated turn.
    async fn on_turn_completed(
        &self,
        turn_id: String,
        claimed_output: String,
        status: String,
        turn_error: Option<String>,
    );

    /// Variant teardown invoked when the transport streams end.
    async fn close_session(&self, reason: &str);
}

/// Read `{notifications, requests, errors}` until any stream closes, then
/// move the session to its closed state.
pub(crate) async fn run_pump<H: PumpHandler>(mut channels: Channels, handler: Arc<H>) {
    loop {
        tokio::select! {
            notification = channels.notifications.recv() => match notification {
                Some(event) => handle_notification(handler.as_ref(), event).await,
                None => break,
            },
            request = channels.requests.recv() => match request {
                Some(event) => handler.core().handle_request(event),
                None => break,
            },
            error = channels.errors.recv() => match error {
                Some(err) => {
                    tracing::warn!(
                        session_id = %handler.core().ctx.session_id,
                        error = %err,
                        "transport error, closing session"
                    );
                    break;
                }
                None => break,
            },
        }
    }
    handler.close_session("transport stream ended").await;
}

async fn handle_notification<H: PumpHandler>(handler: &H, event: NormalizedEvent) {
    let core = handler.core();
    core.hub
        .broadcast(SessionEvent::notification(event.method.clone(), event.params.clone()));

    match event.method.as_str() {
        "turn/completed" => {
            let event_turn = turn_id_of(&event.params);
            let cleared = core.slot.complete(&event_turn);
            let turn_id = cleared.unwrap_or(event_turn);
            let (status, turn_error) = completion_status_of(&event.params);
            handler
                .on_turn_completed(turn_id, claimed_output_of(&event.params), status, turn_error)
                .await;
        }
        "error" => {
            // An error carrying no turn id while a turn is active: treat
            // the turn as implicitly completed with status=failed.
            if !turn_id_of(&event.params).is_empty() {
                return;
            }
            if let Some(active) = core.slot.active_turn() {
                core.slot.complete(&active);
                let message = event
                    .params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("upstream error")
                    .to_string();
                handler
                    .on_turn_completed(active, String::new(), "failed".into(), Some(message))
                    .await;
            }
        }
        _ => {}
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event field extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn turn_id_of(params: &Value) -> String {
    params
        .get("turnId")
        .or_else(|| params.get("turn_id"))
        .or_else(|| params.get("turn").and_then(|t| t.get("id")))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn claimed_output_of(params: &Value) -> String {
    params
        .get("output")
        .or_else(|| params.get("turn").and_then(|t| t.get("output")))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn completion_status_of(params: &Value) -> (String, Option<String>) {
    let error = params
        .get("error")
        .and_then(|e| e.as_str().map(str::to_string).or_else(|| {
            e.get("message").and_then(Value::as_str).map(str::to_string)
        }));
    let status = params
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            if error.is_some() {
                "failed".to_string()
            } else {
                "completed".to_string()
            }
        });
    (status, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn turn_id_extraction_accepts_all_spellings() {
        assert_eq!(turn_id_of(&json!({"turnId": "a"})), "a");
        assert_eq!(turn_id_of(&json!({"turn_id": "b"})), "b");
        assert_eq!(turn_id_of(&json!({"turn": {"id": "c"}})), "c");
        assert_eq!(turn_id_of(&json!({})), "");
    }

    #[test]
    fn completion_status_defaults_and_error_detection() {
        assert_eq!(completion_status_of(&json!({})), ("completed".into(), None));
        assert_eq!(
            completion_status_of(&json!({"error": "boom"})),
            ("failed".into(), Some("boom".into()))
        );
        assert_eq!(
            completion_status_of(&json!({"status": "interrupted"})).0,
            "interrupted"
        );
        assert_eq!(
            completion_status_of(&json!({"error": {"message": "deep"}})),
            ("failed".into(), Some("deep".into()))
        );
    }

    #[test]
    fn claimed_output_extraction() {
        assert_eq!(claimed_output_of(&json!({"output": "x"})), "x");
        assert_eq!(claimed_output_of(&json!({"turn": {"output": "y"}})), "y");
        assert_eq!(claimed_output_of(&json!({})), "");
    }
}
