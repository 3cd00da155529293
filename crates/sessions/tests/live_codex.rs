//! End-to-end flow for a codex live session against a scripted app-server.
//!
//! The fake provider is a shell script speaking line-delimited JSON-RPC on
//! stdio: it accepts the thread resume, acknowledges the turn, raises an
//! approval request, waits for the reply, and completes the turn twice so
//! the second completion exercises stale-output suppression.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use archon_domain::error::Result;
use archon_domain::policy::RuntimeOptions;
use archon_sessions::live::EngineDeps;
use archon_sessions::manager::CodexLaunch;
use archon_sessions::notifier::{
    CompletionNotifier, DomainNotification, NotificationPublisher, STATUS_APPROVAL_REQUIRED,
};
use archon_sessions::{
    ApprovalStore, DebugCenter, FreshnessTracker, ItemLog, Session, SessionManager,
    SessionMetaStore, SessionStore,
};

struct ChannelPublisher(mpsc::UnboundedSender<DomainNotification>);

#[async_trait]
impl NotificationPublisher for ChannelPublisher {
    async fn publish(&self, notification: &DomainNotification) -> Result<()> {
        let _ = self.0.send(notification.clone());
        Ok(())
    }
}

fn deps(
    dir: &std::path::Path,
) -> (EngineDeps, mpsc::UnboundedReceiver<DomainNotification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let deps = EngineDeps {
        sessions: Arc::new(SessionStore::new(dir).unwrap()),
        meta: Arc::new(SessionMetaStore::new(dir).unwrap()),
        approvals: Arc::new(ApprovalStore::new(dir).unwrap()),
        items: Arc::new(ItemLog::new(dir)),
        notifier: Arc::new(CompletionNotifier::new(Arc::new(ChannelPublisher(tx)))),
        freshness: Arc::new(FreshnessTracker::new()),
        debug: Arc::new(DebugCenter::new(dir)),
    };
    (deps, rx)
}

const APP_SERVER: &str = r#"
read _resume
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'
read turn
tid=$(printf '%s' "$turn" | sed -n 's/.*"turnId":"\([^"]*\)".*/\1/p')
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{}}'
printf '{"jsonrpc":"2.0","method":"turn/started","params":{"turnId":"%s"}}\n' "$tid"
printf '%s\n' '{"jsonrpc":"2.0","id":42,"method":"item/commandExecution/requestApproval","params":{"permission_id":"perm-1"}}'
read _reply
printf '{"jsonrpc":"2.0","method":"turn/completed","params":{"turnId":"%s","output":"all done"}}\n' "$tid"
printf '{"jsonrpc":"2.0","method":"turn/completed","params":{"turnId":"%s","output":"all done"}}\n' "$tid"
sleep 2
"#;

#[tokio::test]
async fn codex_turn_with_approval_and_stale_suppression() {
    let dir = tempfile::tempdir().unwrap();
    let (deps, mut notifications) = deps(dir.path());
    let manager = SessionManager::new(
        deps.clone(),
        CodexLaunch {
            command: "sh".into(),
            args: vec!["-c".into(), APP_SERVER.into()],
        },
        None,
    );

    let session = Session::new("codex", dir.path().to_path_buf(), "demo");
    let session_id = session.id.clone();
    deps.sessions.insert(session.clone());
    deps.meta.set_thread_id(&session_id, "t-1");

    // Bring up and subscribe before the turn so every event is observed.
    let live = manager.ensure(&session).await.unwrap();
    let (mut events, _cancel) = live.subscribe();

    let turn_id = manager
        .start_turn(&session_id, "run the tests", RuntimeOptions::default())
        .await
        .unwrap();
    assert!(turn_id.starts_with("codex-turn-"));

    // The user artifact was persisted before the upstream call.
    let items = deps.items.tail(&session_id, 10).unwrap();
    assert_eq!(items[0]["role"], "user");
    assert_eq!(items[0]["text"], "run the tests");

    // Both the turn/started notification and the approval request reach
    // subscribers (the two arrive on independent transport streams, so
    // their relative order is not fixed).
    let mut seen_methods = Vec::new();
    for _ in 0..2 {
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if event.method == "item/commandExecution/requestApproval" {
            assert_eq!(event.request_id, Some(42));
        }
        seen_methods.push(event.method);
    }
    assert!(seen_methods.contains(&"turn/started".to_string()));
    assert!(seen_methods.contains(&"item/commandExecution/requestApproval".to_string()));

    // An approval-required notification fires alongside; once it has, the
    // approval record is guaranteed to be stored.
    let approval_note = timeout(Duration::from_secs(5), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(approval_note.status, STATUS_APPROVAL_REQUIRED);
    assert_eq!(approval_note.payload.request_id, Some(42));
    assert!(deps.approvals.get(&session_id, 42).is_some());

    // Responding unblocks the provider and deletes the record.
    live.respond(42, serde_json::json!({"decision": "accept"}))
        .await
        .unwrap();
    assert!(deps.approvals.get(&session_id, 42).is_none());

    // First completion: fresh output.
    let first = timeout(Duration::from_secs(5), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, "completed");
    assert_eq!(first.turn_id, turn_id);
    assert_eq!(first.payload.turn_output.as_deref(), Some("all done"));
    assert_eq!(first.payload.turn_output_fresh, Some(true));
    assert!(first.payload.artifacts_persisted);

    // Second completion of the same head: suppressed output.
    let second = timeout(Duration::from_secs(5), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.payload.turn_output.as_deref(), Some(""));
    assert_eq!(second.payload.turn_output_fresh, Some(false));

    // The assistant artifact landed in the items log.
    let items = deps.items.tail(&session_id, 10).unwrap();
    assert!(items
        .iter()
        .any(|i| i["role"] == "assistant" && i["text"] == "all done"));

    manager.kill(&session_id).await.unwrap();
}

#[tokio::test]
async fn second_turn_refused_while_first_is_active() {
    let dir = tempfile::tempdir().unwrap();
    let (deps, _notifications) = deps(dir.path());
    // Accept the resume and the turn, then keep the turn open.
    let script = concat!(
        r#"read _; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{}}'; "#,
        r#"read _; printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{}}'; "#,
        r#"sleep 5"#,
    );
    let manager = SessionManager::new(
        deps.clone(),
        CodexLaunch {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
        },
        None,
    );

    let session = Session::new("codex", dir.path().to_path_buf(), "busy");
    deps.sessions.insert(session.clone());
    deps.meta.set_thread_id(&session.id, "t-1");

    manager
        .start_turn(&session.id, "first", RuntimeOptions::default())
        .await
        .unwrap();

    let err = manager
        .start_turn(&session.id, "second", RuntimeOptions::default())
        .await
        .unwrap_err();
    assert!(
        matches!(err, archon_domain::error::Error::TurnInProgress(_)),
        "{err}"
    );

    manager.kill(&session.id).await.unwrap();
}
