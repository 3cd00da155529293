//! Live session manager.
//!
//! Process-wide `sessionID → live session` registry with lazy bring-up:
//! resume the upstream thread, bootstrap a fresh one only when the evidence
//! says we are recovering a freshly-created but never-used session, and
//! retry turn starts on broken pipes with a fresh transport. The manager
//! holds the only cross-session shared state; its map lock is never held
//! across transport construction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use archon_domain::error::{Error, Result};
use archon_domain::policy::RuntimeOptions;
use archon_domain::provider::{PROVIDER_CODEX, PROVIDER_OPENCODE};
use archon_domain::trace::TraceEvent;
use archon_transport::http::OpencodeClient;
use archon_transport::stdio::{StdioConfig, StdioTransport};

use crate::debug::SessionDebugSink;
use crate::live::{CodexSession, EngineDeps, ManagedSession, OpencodeSession};
use crate::meta::SessionMeta;
use crate::notifier::SessionContext;
use crate::store::{Session, SessionStatus};

/// Turn starts are retried this many times, only for closed-pipe errors.
const MAX_START_ATTEMPTS: u32 = 4;
/// A session qualifies for thread bootstrap only this long after creation.
const BOOTSTRAP_WINDOW_SECS: i64 = 120;

/// Launch parameters for the codex app-server subprocess.
#[derive(Debug, Clone)]
pub struct CodexLaunch {
    pub command: String,
    pub args: Vec<String>,
}

/// The process-wide live session registry.
pub struct SessionManager {
    deps: EngineDeps,
    codex: CodexLaunch,
    opencode: Option<Arc<OpencodeClient>>,
    live: Mutex<HashMap<String, Arc<dyn ManagedSession>>>,
}

impl SessionManager {
    pub fn new(
        deps: EngineDeps,
        codex: CodexLaunch,
        opencode: Option<Arc<OpencodeClient>>,
    ) -> Self {
        Self {
            deps,
            codex,
            opencode,
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn deps(&self) -> &EngineDeps {
        &self.deps
    }

    /// Return the live session for `session`, bringing one up when absent
    /// or closed.
    pub async fn ensure(&self, session: &Session) -> Result<Arc<dyn ManagedSession>> {
        {
            let live = self.live.lock().await;
            if let Some(existing) = live.get(&session.id) {
                if !existing.is_closed() {
                    return Ok(existing.clone());
                }
            }
        }

        // Transport construction happens outside the map lock.
        self.deps
            .sessions
            .set_status(&session.id, SessionStatus::Starting);
        let built: Arc<dyn ManagedSession> = match session.provider.as_str() {
            PROVIDER_CODEX => self.bring_up_codex(session).await?,
            PROVIDER_OPENCODE => self.bring_up_opencode(session).await?,
            // A valid provider with no live-session variant (exec): the
            // subsystem is unreachable, not the caller's input malformed.
            other => {
                self.deps
                    .sessions
                    .set_status(&session.id, SessionStatus::Failed);
                return Err(Error::Unavailable(format!(
                    "provider {other} has no live session support"
                )));
            }
        };

        let mut live = self.live.lock().await;
        match live.get(&session.id) {
            // Lost a bring-up race; keep the incumbent.
            Some(existing) if !existing.is_closed() => {
                let winner = existing.clone();
                drop(live);
                built.close("duplicate bring-up").await;
                Ok(winner)
            }
            _ => {
                live.insert(session.id.clone(), built.clone());
                drop(live);
                self.deps
                    .sessions
                    .set_status(&session.id, SessionStatus::Running);
                Ok(built)
            }
        }
    }

    /// Fetch a live session without creating one.
    pub async fn get(&self, session_id: &str) -> Option<Arc<dyn ManagedSession>> {
        let live = self.live.lock().await;
        live.get(session_id).filter(|s| !s.is_closed()).cloned()
    }

    /// Start a turn, retrying with a fresh transport when the pipe to the
    /// provider is dead. Backoff grows `attempt * 100 ms`; any error other
    /// than a closed pipe is returned after the first attempt.
    pub async fn start_turn(
        &self,
        session_id: &str,
        input: &str,
        options: RuntimeOptions,
    ) -> Result<String> {
        let mut attempt = 1;
        loop {
            let result = async {
                let session = self.require_session(session_id)?;
                let live = self.ensure(&session).await?;
                live.start_turn(input, options.clone()).await
            }
            .await;

            match result {
                Ok(turn_id) => return Ok(turn_id),
                Err(e) if e.is_closed_pipe() && attempt < MAX_START_ATTEMPTS => {
                    TraceEvent::StartTurnRetry {
                        session_id: session_id.to_owned(),
                        attempt,
                    }
                    .emit();
                    self.drop_session(session_id).await;
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Remove a live session from the registry and close it.
    pub async fn drop_session(&self, session_id: &str) {
        let removed = self.live.lock().await.remove(session_id);
        if let Some(session) = removed {
            session.close("dropped by manager").await;
        }
    }

    /// Explicit kill: tear down the live session and retire the record.
    pub async fn kill(&self, session_id: &str) -> Result<()> {
        let session = self.require_session(session_id)?;
        self.drop_session(&session.id).await;
        self.deps
            .sessions
            .set_status(&session.id, SessionStatus::Exited);
        self.deps.approvals.remove_session(&session.id);
        self.deps.freshness.forget(&session.id);
        Ok(())
    }

    fn require_session(&self, session_id: &str) -> Result<Session> {
        self.deps
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))
    }

    // ── Bring-up: codex ──────────────────────────────────────────────

    async fn bring_up_codex(&self, session: &Session) -> Result<Arc<dyn ManagedSession>> {
        let meta = self.deps.meta.get(&session.id);
        let mut thread_id = if meta.thread_id.is_empty() {
            session.id.clone()
        } else {
            meta.thread_id.clone()
        };

        let sink = Arc::new(SessionDebugSink::new(self.deps.debug.clone(), &session.id));
        let (transport, channels) = StdioTransport::spawn(
            StdioConfig {
                command: self.codex.command.clone(),
                args: self.codex.args.clone(),
                cwd: session.cwd.clone(),
                env: Vec::new(),
            },
            sink,
        )
        .map_err(|e| self.fail_bring_up(&session.id, e))?;

        match transport.resume_thread(&thread_id).await {
            Ok(()) => {
                TraceEvent::ThreadResumed {
                    session_id: session.id.clone(),
                    thread_id: thread_id.clone(),
                }
                .emit();
            }
            Err(e) if e.is_missing_thread() && bootstrap_allowed(&meta, session) => {
                let options = RuntimeOptions::from_env().merged_with(&meta.runtime_options);
                match transport.start_thread(&session.cwd, &options).await {
                    Ok(new_thread) => {
                        TraceEvent::ThreadBootstrapped {
                            session_id: session.id.clone(),
                            old_thread_id: thread_id.clone(),
                            new_thread_id: new_thread.clone(),
                        }
                        .emit();
                        self.deps.meta.set_thread_id(&session.id, &new_thread);
                        thread_id = new_thread;
                    }
                    Err(e) => {
                        transport.close().await;
                        return Err(self.fail_bring_up(&session.id, e));
                    }
                }
            }
            Err(e) => {
                transport.close().await;
                return Err(self.fail_bring_up(&session.id, e));
            }
        }

        Ok(CodexSession::start(
            session_context(session, &self.deps.meta.get(&session.id)),
            &self.deps,
            transport,
            thread_id,
            channels,
        ))
    }

    // ── Bring-up: opencode ───────────────────────────────────────────

    async fn bring_up_opencode(&self, session: &Session) -> Result<Arc<dyn ManagedSession>> {
        let client = self.opencode.clone().ok_or_else(|| {
            self.fail_bring_up(
                &session.id,
                Error::Unavailable("opencode transport is not configured".into()),
            )
        })?;

        let meta = self.deps.meta.get(&session.id);
        let provider_session_id = if meta.provider_session_id.is_empty() {
            session.id.clone()
        } else {
            meta.provider_session_id.clone()
        };
        let directory = session.cwd.to_string_lossy().to_string();

        let sink = Arc::new(SessionDebugSink::new(self.deps.debug.clone(), &session.id));
        let (channels, cancel) = client
            .subscribe_events(&provider_session_id, &directory, sink)
            .await
            .map_err(|e| self.fail_bring_up(&session.id, e))?;

        self.deps.meta.update(&session.id, |meta| {
            meta.provider_session_id = provider_session_id.clone();
        });

        Ok(OpencodeSession::start(
            session_context(session, &self.deps.meta.get(&session.id)),
            &self.deps,
            client,
            provider_session_id,
            directory,
            channels,
            cancel,
        ))
    }

    fn fail_bring_up(&self, session_id: &str, e: Error) -> Error {
        self.deps
            .sessions
            .set_status(session_id, SessionStatus::Failed);
        e
    }
}

/// Bootstrap is a one-shot recovery for freshly-created sessions: the meta
/// record carried a thread id, no turn ever started, and the session is
/// younger than the window (a zero creation time always qualifies).
fn bootstrap_allowed(meta: &SessionMeta, session: &Session) -> bool {
    if meta.thread_id.is_empty() || !meta.last_turn_id.is_empty() {
        return false;
    }
    session.created_at.timestamp() == 0
        || (chrono::Utc::now() - session.created_at).num_seconds() <= BOOTSTRAP_WINDOW_SECS
}

fn session_context(session: &Session, meta: &SessionMeta) -> SessionContext {
    SessionContext {
        session_id: session.id.clone(),
        provider: session.provider.clone(),
        workspace_id: meta.workspace_id.clone(),
        worktree_id: meta.worktree_id.clone(),
        title: session.title.clone(),
        cwd: session.cwd.to_string_lossy().to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
