//! Shared application state passed to all API handlers.

use std::sync::Arc;

use parking_lot::Mutex;

use archon_domain::config::Config;
use archon_sessions::{ApprovalStore, DebugCenter, ItemLog, SessionManager};

use crate::service::SessionService;
use crate::stores::{WorkspaceGroupStore, WorkspaceStore, WorktreeStore};

/// Closure invoked by `POST /v1/shutdown`. Fires at most once.
pub struct ShutdownHook {
    inner: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ShutdownHook {
    pub fn new(hook: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            inner: Mutex::new(Some(hook)),
        }
    }

    pub fn unset() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Invoke the registered closure. Returns whether this call fired it.
    pub fn fire(&self) -> bool {
        let hook = self.inner.lock().take();
        match hook {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }
}

/// Shared application state.
///
/// Fields are grouped by concern: engine, stores, security, lifecycle.
#[derive(Clone)]
pub struct AppState {
    // ── Engine ────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub service: Arc<SessionService>,
    pub manager: Arc<SessionManager>,
    pub debug: Arc<DebugCenter>,
    pub items: Arc<ItemLog>,
    pub approvals: Arc<ApprovalStore>,

    // ── Workspace stores ──────────────────────────────────────────────
    pub workspaces: Arc<WorkspaceStore>,
    pub worktrees: Arc<WorktreeStore>,
    pub groups: Arc<WorkspaceGroupStore>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,

    // ── Lifecycle ─────────────────────────────────────────────────────
    pub shutdown: Arc<ShutdownHook>,
}
