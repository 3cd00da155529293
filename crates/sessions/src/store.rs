//! Session record store.
//!
//! Persists session identity and status in `sessions.json` under the state
//! path. Identity `(id, provider, cwd, created_at, title)` is immutable;
//! `status` is mutated only by the manager.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use archon_domain::error::{Error, Result};
use archon_domain::trace::TraceEvent;

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Starting,
    Running,
    Inactive,
    Exited,
    Failed,
}

/// One brokered session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub provider: String,
    pub cwd: PathBuf,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(provider: &str, cwd: PathBuf, title: &str) -> Self {
        Self {
            id: format!("sess-{}", uuid::Uuid::new_v4().simple()),
            provider: archon_domain::provider::normalize_provider(provider),
            cwd,
            created_at: Utc::now(),
            title: title.to_owned(),
            status: SessionStatus::Created,
        }
    }
}

/// JSON-file-backed session store.
pub struct SessionStore {
    path: PathBuf,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    /// Load or create the store at `<state_path>/sessions.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("sessions.json");

        let sessions = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %path.display(),
            "session store loaded"
        );

        Ok(Self {
            path,
            sessions: RwLock::new(sessions),
        })
    }

    pub fn insert(&self, session: Session) {
        TraceEvent::SessionResolved {
            session_id: session.id.clone(),
            provider: session.provider.clone(),
            is_new: true,
        }
        .emit();
        self.sessions.write().insert(session.id.clone(), session);
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn list(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self.sessions.read().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub fn set_status(&self, session_id: &str, status: SessionStatus) {
        if let Some(session) = self.sessions.write().get_mut(session_id) {
            session.status = status;
        }
    }

    pub fn remove(&self, session_id: &str) -> Option<Session> {
        self.sessions.write().remove(session_id)
    }

    /// Persist the current state to disk.
    pub fn flush(&self) -> Result<()> {
        let sessions = self.sessions.read();
        let json = serde_json::to_string_pretty(&*sessions)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        let session = Session::new("Codex", dir.path().to_path_buf(), "fix the tests");
        let id = session.id.clone();
        assert_eq!(session.provider, "codex");
        store.insert(session);

        assert_eq!(store.get(&id).unwrap().status, SessionStatus::Created);
        store.set_status(&id, SessionStatus::Running);
        assert_eq!(store.get(&id).unwrap().status, SessionStatus::Running);
    }

    #[test]
    fn flush_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = SessionStore::new(dir.path()).unwrap();
            let session = Session::new("opencode", dir.path().to_path_buf(), "t");
            let id = session.id.clone();
            store.insert(session);
            store.flush().unwrap();
            id
        };

        let reloaded = SessionStore::new(dir.path()).unwrap();
        let session = reloaded.get(&id).unwrap();
        assert_eq!(session.provider, "opencode");
        assert_eq!(session.status, SessionStatus::Created);
    }

    #[test]
    fn list_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let mut older = Session::new("codex", dir.path().to_path_buf(), "old");
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = Session::new("codex", dir.path().to_path_buf(), "new");
        store.insert(older);
        store.insert(newer);

        let all = store.list();
        assert_eq!(all[0].title, "new");
        assert_eq!(all[1].title, "old");
    }
}
