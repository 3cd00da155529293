//! Session service facade.
//!
//! Validates inputs from the HTTP layer, resolves working directories from
//! workspace/worktree records, and dispatches to the manager and live
//! sessions. Everything that can be rejected cheaply is rejected here, so
//! the engine only sees well-formed requests.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use archon_domain::error::{Error, Result};
use archon_domain::events::SessionEvent;
use archon_domain::policy::RuntimeOptions;
use archon_sessions::hub::Canceller;
use archon_sessions::{Approval, Session, SessionManager};

use crate::stores::{WorkspaceStore, WorktreeStore};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartSessionRequest {
    pub provider: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub worktree_id: Option<String>,
    #[serde(default)]
    pub options: RuntimeOptions,
}

pub struct SessionService {
    manager: Arc<SessionManager>,
    workspaces: Arc<WorkspaceStore>,
    worktrees: Arc<WorktreeStore>,
}

impl SessionService {
    pub fn new(
        manager: Arc<SessionManager>,
        workspaces: Arc<WorkspaceStore>,
        worktrees: Arc<WorktreeStore>,
    ) -> Self {
        Self {
            manager,
            workspaces,
            worktrees,
        }
    }

    /// Create a session record. Bring-up is lazy: the live session spawns
    /// on the first turn or subscription.
    pub fn start_session(&self, req: StartSessionRequest) -> Result<Session> {
        if req.provider.trim().is_empty() {
            return Err(Error::Invalid("provider must not be empty".into()));
        }

        let (cwd, workspace_id, worktree_id) = self.resolve_cwd(&req)?;
        let title = if req.title.is_empty() {
            req.provider.clone()
        } else {
            req.title.clone()
        };

        let session = Session::new(&req.provider, cwd, &title);
        let deps = self.manager.deps();
        deps.sessions.insert(session.clone());
        deps.meta.update(&session.id, |meta| {
            meta.workspace_id = workspace_id.clone().unwrap_or_default();
            meta.worktree_id = worktree_id.clone().unwrap_or_default();
            // Seed the thread binding so a fresh session qualifies for
            // bootstrap recovery if the first resume finds nothing upstream.
            meta.thread_id = session.id.clone();
            meta.runtime_options = RuntimeOptions::from_env().merged_with(&req.options);
        });
        Ok(session)
    }

    fn resolve_cwd(
        &self,
        req: &StartSessionRequest,
    ) -> Result<(PathBuf, Option<String>, Option<String>)> {
        if let Some(cwd) = &req.cwd {
            if cwd.is_empty() {
                return Err(Error::Invalid("cwd must not be empty".into()));
            }
            return Ok((
                PathBuf::from(cwd),
                req.workspace_id.clone(),
                req.worktree_id.clone(),
            ));
        }
        if let Some(worktree_id) = &req.worktree_id {
            let worktree = self
                .worktrees
                .get(worktree_id)
                .ok_or_else(|| Error::NotFound(format!("worktree {worktree_id}")))?;
            return Ok((
                worktree.path,
                Some(worktree.workspace_id),
                Some(worktree.id),
            ));
        }
        if let Some(workspace_id) = &req.workspace_id {
            let workspace = self
                .workspaces
                .get(workspace_id)
                .ok_or_else(|| Error::NotFound(format!("workspace {workspace_id}")))?;
            return Ok((workspace.path, Some(workspace.id), None));
        }
        Err(Error::Invalid(
            "one of cwd, workspace_id, worktree_id is required".into(),
        ))
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.manager.deps().sessions.list()
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        self.validate_id(session_id)?;
        self.manager
            .deps()
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))
    }

    pub async fn start_turn(
        &self,
        session_id: &str,
        text: &str,
        options: RuntimeOptions,
    ) -> Result<String> {
        self.validate_id(session_id)?;
        if text.trim().is_empty() {
            return Err(Error::Invalid("message text must not be empty".into()));
        }
        self.manager.start_turn(session_id, text, options).await
    }

    pub async fn respond(
        &self,
        session_id: &str,
        request_id: Option<i64>,
        decision: Option<Value>,
    ) -> Result<()> {
        self.validate_id(session_id)?;
        let request_id =
            request_id.ok_or_else(|| Error::Invalid("missing request id".into()))?;
        let decision = decision.ok_or_else(|| Error::Invalid("missing decision".into()))?;

        let session = self.get_session(session_id)?;
        let live = self.manager.ensure(&session).await?;
        live.respond(request_id, decision).await
    }

    pub async fn interrupt(&self, session_id: &str) -> Result<()> {
        self.validate_id(session_id)?;
        let session = self.get_session(session_id)?;
        let live = self.manager.ensure(&session).await?;
        live.interrupt().await
    }

    /// Subscribe to a session's live events, bringing the session up when
    /// needed.
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<(mpsc::Receiver<SessionEvent>, Canceller<SessionEvent>)> {
        self.validate_id(session_id)?;
        let session = self.get_session(session_id)?;
        let live = self.manager.ensure(&session).await?;
        Ok(live.subscribe())
    }

    pub async fn kill(&self, session_id: &str) -> Result<()> {
        self.validate_id(session_id)?;
        self.manager.kill(session_id).await
    }

    pub fn pending_approvals(&self) -> Vec<Approval> {
        self.manager.deps().approvals.list()
    }

    pub fn session_items(&self, session_id: &str, limit: usize) -> Result<Vec<Value>> {
        self.get_session(session_id)?;
        self.manager.deps().items.tail(session_id, limit)
    }

    fn validate_id(&self, session_id: &str) -> Result<()> {
        if session_id.trim().is_empty() {
            return Err(Error::Invalid("session id must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{open_workspace_store, open_worktree_store, Workspace, Worktree};
    use archon_sessions::live::EngineDeps;
    use archon_sessions::manager::CodexLaunch;
    use archon_sessions::notifier::{CompletionNotifier, NotificationPublisher};
    use archon_sessions::{
        ApprovalStore, DebugCenter, FreshnessTracker, ItemLog, SessionMetaStore, SessionStore,
    };
    use async_trait::async_trait;

    struct NullPublisher;

    #[async_trait]
    impl NotificationPublisher for NullPublisher {
        async fn publish(
            &self,
            _n: &archon_sessions::notifier::DomainNotification,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn service(dir: &std::path::Path) -> (SessionService, Arc<WorkspaceStore>, Arc<WorktreeStore>) {
        let deps = EngineDeps {
            sessions: Arc::new(SessionStore::new(dir).unwrap()),
            meta: Arc::new(SessionMetaStore::new(dir).unwrap()),
            approvals: Arc::new(ApprovalStore::new(dir).unwrap()),
            items: Arc::new(ItemLog::new(dir)),
            notifier: Arc::new(CompletionNotifier::new(Arc::new(NullPublisher))),
            freshness: Arc::new(FreshnessTracker::new()),
            debug: Arc::new(DebugCenter::new(dir)),
        };
        let manager = Arc::new(SessionManager::new(
            deps,
            CodexLaunch {
                command: "true".into(),
                args: Vec::new(),
            },
            None,
        ));
        let workspaces = Arc::new(open_workspace_store(dir).unwrap());
        let worktrees = Arc::new(open_worktree_store(dir).unwrap());
        (
            SessionService::new(manager, workspaces.clone(), worktrees.clone()),
            workspaces,
            worktrees,
        )
    }

    #[test]
    fn start_session_requires_provider_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _ws, _wt) = service(dir.path());

        let err = service
            .start_session(StartSessionRequest::default())
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));

        let err = service
            .start_session(StartSessionRequest {
                provider: "codex".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn start_session_resolves_cwd_from_worktree() {
        let dir = tempfile::tempdir().unwrap();
        let (service, workspaces, worktrees) = service(dir.path());

        let ws = Workspace::new("repo", dir.path().join("repo"));
        let ws_id = ws.id.clone();
        workspaces.insert(&ws_id, ws);

        let wt = Worktree::new(&ws_id, "feature", dir.path().join("wt"), None);
        let wt_id = wt.id.clone();
        worktrees.insert(&wt_id, wt);

        let session = service
            .start_session(StartSessionRequest {
                provider: "codex".into(),
                worktree_id: Some(wt_id.clone()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(session.cwd, dir.path().join("wt"));

        // The meta record carries workspace/worktree linkage and a seeded
        // thread binding.
        let meta = service.manager.deps().meta.get(&session.id);
        assert_eq!(meta.workspace_id, ws_id);
        assert_eq!(meta.worktree_id, wt_id);
        assert_eq!(meta.thread_id, session.id);
    }

    #[test]
    fn start_session_unknown_worktree_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _ws, _wt) = service(dir.path());

        let err = service
            .start_session(StartSessionRequest {
                provider: "codex".into(),
                worktree_id: Some("wt-missing".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn start_turn_validates_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _ws, _wt) = service(dir.path());

        let err = service
            .start_turn("", "hi", RuntimeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));

        let err = service
            .start_turn("s-1", "   ", RuntimeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[tokio::test]
    async fn respond_requires_request_id_and_decision() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _ws, _wt) = service(dir.path());

        let err = service.respond("s-1", None, None).await.unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));

        let err = service
            .respond("s-1", Some(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }
}
