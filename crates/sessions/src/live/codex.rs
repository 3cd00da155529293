//! Codex live session: Variant A over the app-server subprocess.
//!
//! The manager resolves or bootstraps the thread before constructing the
//! session, so the thread binding is fixed for the session's lifetime.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use archon_domain::error::{Error, Result};
use archon_domain::events::SessionEvent;
use archon_domain::policy::RuntimeOptions;
use archon_domain::provider::{new_turn_id, PROVIDER_CODEX};
use archon_domain::trace::TraceEvent;
use archon_transport::stdio::StdioTransport;
use archon_transport::Channels;

use crate::hub::Canceller;
use crate::items::{assistant_count, has_assistant_text};
use crate::live::{
    run_pump, ApprovalCapableSession, EngineDeps, LiveSession, PumpHandler, SessionCore,
    TurnCapableSession,
};
use crate::notifier::SessionContext;
use crate::reservation::{ProbeVerdict, TurnProbe};
use crate::sync::{SyncOutcome, SOURCE_NOOP};

pub struct CodexSession {
    core: SessionCore,
    transport: Arc<StdioTransport>,
    thread_id: String,
    weak: Weak<CodexSession>,
}

impl CodexSession {
    /// Wire a resumed transport into a live session and start its pump.
    pub fn start(
        ctx: SessionContext,
        deps: &EngineDeps,
        transport: Arc<StdioTransport>,
        thread_id: String,
        channels: Channels,
    ) -> Arc<Self> {
        let session = Arc::new_cyclic(|weak| Self {
            core: SessionCore::new(ctx, deps),
            transport,
            thread_id,
            weak: weak.clone(),
        });
        tokio::spawn(run_pump(channels, session.clone()));
        session
    }

    fn effective_options(&self, incoming: &RuntimeOptions) -> RuntimeOptions {
        let stored = self.core.meta.get(&self.core.ctx.session_id).runtime_options;
        RuntimeOptions::from_env()
            .merged_with(&stored)
            .merged_with(incoming)
    }
}

#[async_trait]
impl LiveSession for CodexSession {
    fn session_id(&self) -> &str {
        &self.core.ctx.session_id
    }

    fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    fn subscriber_count(&self) -> usize {
        self.core.hub.count()
    }

    fn subscribe(&self) -> (mpsc::Receiver<SessionEvent>, Canceller<SessionEvent>) {
        self.core.hub.add()
    }

    async fn close(&self, reason: &str) {
        if self.core.mark_closed(reason) {
            self.transport.close().await;
        }
    }
}

#[async_trait]
impl TurnCapableSession for CodexSession {
    async fn start_turn(&self, input: &str, options: RuntimeOptions) -> Result<String> {
        if self.core.is_closed() {
            return Err(Error::ClosedPipe("session is closed".into()));
        }

        let effective = self.effective_options(&options);
        let session_id = self.core.ctx.session_id.clone();

        let turn_id = self
            .core
            .slot
            .reserve(&self.thread_id, Some(self), || async {
                let turn_id = new_turn_id(PROVIDER_CODEX);
                // The user side lands in the log before the upstream call so
                // reconnecting clients see it even if the request dies.
                self.core
                    .items
                    .append_user_message(&session_id, &turn_id, input)?;
                self.transport
                    .start_turn(&self.thread_id, &turn_id, input, &effective)
                    .await
            })
            .await?;

        self.core.meta.set_last_turn(&session_id, &turn_id);
        self.core.meta.merge_runtime_options(&session_id, &options);
        TraceEvent::TurnStarted {
            session_id,
            turn_id: turn_id.clone(),
        }
        .emit();
        Ok(turn_id)
    }

    async fn interrupt(&self) -> Result<()> {
        let last_turn = self.core.meta.get(&self.core.ctx.session_id).last_turn_id;
        let turn_id = match self.core.slot.active_turn() {
            Some(active) => active,
            None if last_turn.is_empty() => {
                return Err(Error::Invalid("no active turn".into()))
            }
            None => last_turn,
        };

        self.transport
            .interrupt_turn(&self.thread_id, &turn_id)
            .await?;
        self.core.slot.complete(&turn_id);
        Ok(())
    }
}

#[async_trait]
impl ApprovalCapableSession for CodexSession {
    async fn respond(&self, request_id: i64, response: Value) -> Result<()> {
        let session_id = &self.core.ctx.session_id;
        if self.core.approvals.get(session_id, request_id).is_none() {
            return Err(Error::NotFound("approval not found".into()));
        }

        self.transport.respond(request_id, response).await?;

        self.core.approvals.remove(session_id, request_id);
        self.core.slot.touch();
        self.core.meta.touch(session_id);
        Ok(())
    }
}

#[async_trait]
impl PumpHandler for CodexSession {
    fn core(&self) -> &SessionCore {
        &self.core
    }

    async fn on_turn_completed(
        &self,
        turn_id: String,
        claimed_output: String,
        status: String,
        turn_error: Option<String>,
    ) {
        let session_id = &self.core.ctx.session_id;

        // Variant A has no remote history to reconcile; the claimed output
        // is the artifact. Persist it so reconnecting clients can replay.
        if !claimed_output.is_empty() {
            if let Err(e) = self.core.items.append(
                session_id,
                &[json!({
                    "type": "message",
                    "role": "assistant",
                    "text": claimed_output.as_str(),
                    "turnId": turn_id.as_str(),
                })],
            ) {
                tracing::warn!(session_id = %session_id, error = %e, "persisting turn output failed");
            }
        }

        let local = self
            .core
            .items
            .tail(session_id, crate::items::DEFAULT_TAIL)
            .unwrap_or_default();
        let outcome = SyncOutcome {
            output: claimed_output,
            artifacts_persisted: has_assistant_text(&local),
            assistant_artifact_count: assistant_count(&local),
            source: SOURCE_NOOP,
            // No message ids on this path: freshness falls back to
            // comparing output hashes.
            evidence_key: String::new(),
            error: None,
        };
        self.core
            .publish_completion(&turn_id, &status, outcome, turn_error);

        // Liveness economy: nobody is watching and nothing is running.
        if self.core.hub.count() == 0 && self.core.slot.is_idle() {
            if let Some(this) = self.weak.upgrade() {
                this.close("idle after completion").await;
            }
        }
    }

    async fn close_session(&self, reason: &str) {
        self.close(reason).await;
    }
}

/// Probe for reclaiming a leaked reservation: asks the app-server whether
/// the busy turn is still running.
#[async_trait]
impl TurnProbe for CodexSession {
    async fn probe(&self, thread_id: &str, busy_turn_id: &str) -> ProbeVerdict {
        let params = json!({ "threadId": thread_id, "turnId": busy_turn_id });
        match self.transport.call("turn/status", Some(params)).await {
            Ok(result) => {
                if let Some(active) = result.get("active").and_then(Value::as_bool) {
                    return if active {
                        ProbeVerdict::Active
                    } else {
                        ProbeVerdict::Inactive
                    };
                }
                match result.get("status").and_then(Value::as_str) {
                    Some("active") | Some("inProgress") | Some("running") => ProbeVerdict::Active,
                    Some("completed") | Some("failed") | Some("inactive")
                    | Some("interrupted") => ProbeVerdict::Inactive,
                    _ => ProbeVerdict::Unknown,
                }
            }
            // A missing thread cannot have an active turn.
            Err(e) if e.is_missing_thread() => ProbeVerdict::Inactive,
            Err(_) => ProbeVerdict::Unknown,
        }
    }
}
