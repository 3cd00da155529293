//! Shared fixtures for engine tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use archon_domain::error::Result;

use crate::approvals::ApprovalStore;
use crate::debug::DebugCenter;
use crate::freshness::FreshnessTracker;
use crate::items::ItemLog;
use crate::live::EngineDeps;
use crate::manager::CodexLaunch;
use crate::meta::SessionMetaStore;
use crate::notifier::{CompletionNotifier, DomainNotification, NotificationPublisher};
use crate::store::SessionStore;

/// Publisher that forwards every notification to a channel.
pub(crate) struct RecordingPublisher {
    tx: mpsc::UnboundedSender<DomainNotification>,
}

impl RecordingPublisher {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DomainNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl NotificationPublisher for RecordingPublisher {
    async fn publish(&self, notification: &DomainNotification) -> Result<()> {
        let _ = self.tx.send(notification.clone());
        Ok(())
    }
}

/// A full collaborator bundle rooted in a temp dir, plus the notification
/// stream.
pub(crate) fn engine_deps() -> (
    tempfile::TempDir,
    EngineDeps,
    mpsc::UnboundedReceiver<DomainNotification>,
) {
    let dir = tempfile::tempdir().unwrap();
    let (publisher, rx) = RecordingPublisher::new();
    let deps = EngineDeps {
        sessions: Arc::new(SessionStore::new(dir.path()).unwrap()),
        meta: Arc::new(SessionMetaStore::new(dir.path()).unwrap()),
        approvals: Arc::new(ApprovalStore::new(dir.path()).unwrap()),
        items: Arc::new(ItemLog::new(dir.path())),
        notifier: Arc::new(CompletionNotifier::new(publisher)),
        freshness: Arc::new(FreshnessTracker::new()),
        debug: Arc::new(DebugCenter::new(dir.path())),
    };
    (dir, deps, rx)
}

/// A codex "app-server" faked with a shell script.
pub(crate) fn fake_codex(script: &str) -> CodexLaunch {
    CodexLaunch {
        command: "sh".into(),
        args: vec!["-c".into(), script.into()],
    }
}
