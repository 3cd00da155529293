//! Opencode live session: Variant B over HTTP + SSE.
//!
//! Prompt submission happens on a background task (the server holds the
//! request open for the duration of the turn); terminal state arrives on
//! the SSE stream as `session.idle`, which triggers the artifact
//! synchronizer before the completion notification fires.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use archon_domain::error::{Error, Result};
use archon_domain::events::SessionEvent;
use archon_domain::policy::RuntimeOptions;
use archon_domain::provider::{new_turn_id, PROVIDER_OPENCODE};
use archon_domain::trace::TraceEvent;
use archon_transport::http::{ModelRef, OpencodeClient};
use archon_transport::Channels;

use crate::hub::Canceller;
use crate::live::{
    run_pump, ApprovalCapableSession, EngineDeps, LiveSession, PumpHandler, SessionCore,
    TurnCapableSession,
};
use crate::notifier::SessionContext;
use crate::sync::ArtifactSynchronizer;

pub struct OpencodeSession {
    core: SessionCore,
    client: Arc<OpencodeClient>,
    provider_session_id: String,
    directory: String,
    cancel: CancellationToken,
    sync: ArtifactSynchronizer,
    /// Assistant message ids already observed; keeps the EOF-recovery path
    /// from returning a previous turn's reply.
    seen_assistant_ids: Mutex<HashSet<String>>,
    weak: Weak<OpencodeSession>,
}

impl OpencodeSession {
    /// Wire a subscribed event stream into a live session and start its
    /// pump.
    pub fn start(
        ctx: SessionContext,
        deps: &EngineDeps,
        client: Arc<OpencodeClient>,
        provider_session_id: String,
        directory: String,
        channels: Channels,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let sync = ArtifactSynchronizer::new(deps.items.clone());
        let session = Arc::new_cyclic(|weak| Self {
            core: SessionCore::new(ctx, deps),
            client,
            provider_session_id,
            directory,
            cancel,
            sync,
            seen_assistant_ids: Mutex::new(HashSet::new()),
            weak: weak.clone(),
        });
        tokio::spawn(run_pump(channels, session.clone()));
        session
    }

    fn note_assistant_id(&self, evidence_key: &str) {
        if let Some(id) = evidence_key.strip_prefix("id:") {
            if !id.is_empty() {
                self.seen_assistant_ids.lock().insert(id.to_string());
            }
        }
    }

    async fn resolve_model(&self, options: &RuntimeOptions) -> Option<ModelRef> {
        let stored = self.core.meta.get(&self.core.ctx.session_id).runtime_options;
        let raw = options.model.clone().or(stored.model)?;
        Some(self.client.resolve_model(&raw).await)
    }
}

#[async_trait]
impl LiveSession for OpencodeSession {
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
            self.cancel.cancel();
        }
    }
}

#[async_trait]
impl TurnCapableSession for OpencodeSession {
    async fn start_turn(&self, input: &str, options: RuntimeOptions) -> Result<String> {
        if self.core.is_closed() {
            return Err(Error::ClosedPipe("session is closed".into()));
        }

        let session_id = self.core.ctx.session_id.clone();
        let model = self.resolve_model(&options).await;

        let turn_id = self
            .core
            .slot
            .reserve(&self.provider_session_id, None, || async {
                let turn_id = new_turn_id(PROVIDER_OPENCODE);
                self.core
                    .items
                    .append_user_message(&session_id, &turn_id, input)?;

                // The server holds the prompt request open until the reply
                // is done; run it off the reservation path. Terminal state
                // arrives via `session.idle` on the event stream.
                let this = self.weak.upgrade().ok_or_else(|| {
                    Error::ClosedPipe("session is shutting down".into())
                })?;
                let text = input.to_string();
                let submitted_turn = turn_id.clone();
                tokio::spawn(async move {
                    this.submit_prompt(submitted_turn, text, model).await;
                });

                Ok(turn_id)
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
        // The opencode transport has no turn interruption; the capability
        // surface says so instead of pretending.
        Err(Error::Unavailable(
            "interrupt is not supported for opencode sessions".into(),
        ))
    }
}

#[async_trait]
impl ApprovalCapableSession for OpencodeSession {
    async fn respond(&self, request_id: i64, response: Value) -> Result<()> {
        let session_id = &self.core.ctx.session_id;
        let approval = self
            .core
            .approvals
            .get(session_id, request_id)
            .ok_or_else(|| Error::NotFound("approval not found".into()))?;

        let permission_id = approval
            .params
            .get("permission_id")
            .or_else(|| approval.params.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Invalid(format!(
                    "approval {request_id} carries no permission id"
                ))
            })?;

        self.client
            .reply_permission(&self.provider_session_id, permission_id, &response)
            .await?;

        self.core.approvals.remove(session_id, request_id);
        self.core.slot.touch();
        self.core.meta.touch(session_id);
        Ok(())
    }
}

impl OpencodeSession {
    async fn submit_prompt(&self, turn_id: String, text: String, model: Option<ModelRef>) {
        let seen = self.seen_assistant_ids.lock().clone();
        let result = self
            .client
            .start_turn(
                &self.provider_session_id,
                &self.directory,
                model.as_ref(),
                &text,
                &seen,
            )
            .await;

        match result {
            Ok(reply) => {
                if let Some(id) = reply.message_id {
                    self.seen_assistant_ids.lock().insert(id);
                }
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.core.ctx.session_id,
                    turn_id = %turn_id,
                    error = %e,
                    "prompt submission failed"
                );
                // The event stream may never deliver a terminal event for a
                // request that died on the wire; complete the turn as failed
                // so the reservation is not leaked.
                if self.core.slot.complete(&turn_id).is_some() {
                    self.core.hub.broadcast(SessionEvent::notification(
                        "error",
                        serde_json::json!({ "message": e.to_string(), "turnId": turn_id.as_str() }),
                    ));
                    self.on_turn_completed(turn_id, String::new(), "failed".into(), Some(e.to_string()))
                        .await;
                }
            }
        }
    }
}

#[async_trait]
impl PumpHandler for OpencodeSession {
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
        let outcome = self
            .sync
            .reconcile(
                &self.client,
                &self.core.ctx.session_id,
                &self.provider_session_id,
                &self.directory,
                &claimed_output,
            )
            .await;
        self.note_assistant_id(&outcome.evidence_key);

        self.core
            .publish_completion(&turn_id, &status, outcome, turn_error);

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
