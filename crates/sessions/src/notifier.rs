//! Completion notifier.
//!
//! Builds `turn_completed` domain notifications and hands them to the
//! external [`NotificationPublisher`] sink without blocking the engine.
//! Publisher failures are an operational concern and are swallowed.
//!
//! Approval-required notifications reuse the `turn_completed` trigger with a
//! distinguishing `status` field; callers key off `status`, not the trigger.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use archon_domain::error::Result;
use archon_domain::events::now_rfc3339_nanos;

/// Trigger constant shared by all engine notifications.
pub const TRIGGER_TURN_COMPLETED: &str = "turn_completed";
/// Status marking an approval-required notification.
pub const STATUS_APPROVAL_REQUIRED: &str = "approval_required";

/// External sink for domain notifications (desktop notifier, webhook, ...).
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, notification: &DomainNotification) -> Result<()>;
}

/// Static facts about the session a notification concerns.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session_id: String,
    pub provider: String,
    pub workspace_id: String,
    pub worktree_id: String,
    pub title: String,
    pub cwd: String,
}

/// Payload attached to a notification.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationPayload {
    pub artifacts_persisted: bool,
    pub assistant_artifact_count: usize,
    pub artifact_sync_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_output_fresh: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_sync_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// One notification delivered to the external sink.
#[derive(Debug, Clone, Serialize)]
pub struct DomainNotification {
    pub trigger: &'static str,
    pub occurred_at: String,
    pub session_id: String,
    pub turn_id: String,
    pub provider: String,
    pub workspace_id: String,
    pub worktree_id: String,
    pub title: String,
    pub cwd: String,
    pub status: String,
    pub payload: NotificationPayload,
}

/// Publishes turn-completed and approval-required notifications.
pub struct CompletionNotifier {
    publisher: Arc<dyn NotificationPublisher>,
}

impl CompletionNotifier {
    pub fn new(publisher: Arc<dyn NotificationPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish a turn-completed notification. Returns immediately; delivery
    /// happens on a background task.
    pub fn notify_turn_completed(
        &self,
        ctx: &SessionContext,
        turn_id: &str,
        status: &str,
        payload: NotificationPayload,
    ) {
        self.dispatch(build(ctx, turn_id, status, payload));
    }

    /// Publish an approval-required notification for a stored approval.
    pub fn notify_approval_required(&self, ctx: &SessionContext, request_id: i64, method: &str) {
        let payload = NotificationPayload {
            request_id: Some(request_id),
            approval_method: Some(method.to_owned()),
            source: Some(format!(
                "approval_request:{}:{}",
                ctx.session_id, request_id
            )),
            ..Default::default()
        };
        self.dispatch(build(ctx, "", STATUS_APPROVAL_REQUIRED, payload));
    }

    fn dispatch(&self, notification: DomainNotification) {
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            if let Err(e) = publisher.publish(&notification).await {
                tracing::warn!(
                    session_id = %notification.session_id,
                    status = %notification.status,
                    error = %e,
                    "notification publish failed"
                );
            }
        });
    }
}

fn build(
    ctx: &SessionContext,
    turn_id: &str,
    status: &str,
    payload: NotificationPayload,
) -> DomainNotification {
    DomainNotification {
        trigger: TRIGGER_TURN_COMPLETED,
        occurred_at: now_rfc3339_nanos(),
        session_id: ctx.session_id.clone(),
        turn_id: turn_id.to_owned(),
        provider: ctx.provider.clone(),
        workspace_id: ctx.workspace_id.clone(),
        worktree_id: ctx.worktree_id.clone(),
        title: ctx.title.clone(),
        cwd: ctx.cwd.clone(),
        status: status.to_owned(),
        payload,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingPublisher;

    fn ctx() -> SessionContext {
        SessionContext {
            session_id: "s-1".into(),
            provider: "codex".into(),
            workspace_id: "ws-1".into(),
            worktree_id: "wt-1".into(),
            title: "fix tests".into(),
            cwd: "/repo".into(),
        }
    }

    #[tokio::test]
    async fn turn_completed_notification_carries_context_and_payload() {
        let (publisher, mut rx) = RecordingPublisher::new();
        let notifier = CompletionNotifier::new(publisher);

        notifier.notify_turn_completed(
            &ctx(),
            "codex-turn-1",
            "completed",
            NotificationPayload {
                artifacts_persisted: true,
                assistant_artifact_count: 2,
                artifact_sync_source: "opencode_history_reconcile".into(),
                turn_output: Some("done".into()),
                turn_output_fresh: Some(true),
                ..Default::default()
            },
        );

        let n = rx.recv().await.unwrap();
        assert_eq!(n.trigger, TRIGGER_TURN_COMPLETED);
        assert_eq!(n.turn_id, "codex-turn-1");
        assert_eq!(n.workspace_id, "ws-1");
        assert_eq!(n.payload.turn_output.as_deref(), Some("done"));
        assert_eq!(n.payload.turn_output_fresh, Some(true));
    }

    #[tokio::test]
    async fn approval_required_reuses_the_turn_completed_trigger() {
        let (publisher, mut rx) = RecordingPublisher::new();
        let notifier = CompletionNotifier::new(publisher);

        notifier.notify_approval_required(&ctx(), 42, "item/commandExecution/requestApproval");

        let n = rx.recv().await.unwrap();
        assert_eq!(n.trigger, TRIGGER_TURN_COMPLETED);
        assert_eq!(n.status, STATUS_APPROVAL_REQUIRED);
        assert_eq!(n.payload.request_id, Some(42));
        assert_eq!(n.payload.source.as_deref(), Some("approval_request:s-1:42"));
    }

    #[tokio::test]
    async fn publisher_errors_are_swallowed() {
        struct FailingPublisher;

        #[async_trait]
        impl NotificationPublisher for FailingPublisher {
            async fn publish(&self, _n: &DomainNotification) -> Result<()> {
                Err(archon_domain::error::Error::Other("sink down".into()))
            }
        }

        let notifier = CompletionNotifier::new(Arc::new(FailingPublisher));
        // Must not panic or propagate.
        notifier.notify_turn_completed(&ctx(), "t", "completed", Default::default());
        tokio::task::yield_now().await;
    }

    #[test]
    fn payload_serialization_omits_unset_fields() {
        let payload = NotificationPayload {
            artifacts_persisted: false,
            assistant_artifact_count: 0,
            artifact_sync_source: "noop".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("artifact_sync_source"));
        assert!(!json.contains("turn_output"), "{json}");
        assert!(!json.contains("request_id"), "{json}");
    }
}
