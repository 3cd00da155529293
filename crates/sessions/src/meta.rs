//! Session metadata store.
//!
//! Mutable per-session record linking the daemon's session to the upstream
//! provider's identifiers (`provider_session_id` / `thread_id`), the
//! workspace/worktree it was started from, the last turn id, and the merged
//! runtime options. Mutated by the live session after successful turn
//! start, thread bootstrap, or approval response.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use archon_domain::error::{Error, Result};
use archon_domain::policy::RuntimeOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    #[serde(default)]
    pub provider_session_id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub worktree_id: String,
    #[serde(default)]
    pub last_turn_id: String,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub runtime_options: RuntimeOptions,
}

/// JSON-file-backed metadata store (`session_meta.json`).
pub struct SessionMetaStore {
    path: PathBuf,
    records: RwLock<HashMap<String, SessionMeta>>,
}

impl SessionMetaStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("session_meta.json");

        let records = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Fetch a session's metadata, defaulting an empty record.
    pub fn get(&self, session_id: &str) -> SessionMeta {
        self.records
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| SessionMeta {
                session_id: session_id.to_owned(),
                ..SessionMeta::default()
            })
    }

    /// Apply a mutation to a session's record, creating it when absent.
    pub fn update(&self, session_id: &str, mutate: impl FnOnce(&mut SessionMeta)) {
        let mut records = self.records.write();
        let record = records
            .entry(session_id.to_owned())
            .or_insert_with(|| SessionMeta {
                session_id: session_id.to_owned(),
                ..SessionMeta::default()
            });
        mutate(record);
    }

    pub fn set_thread_id(&self, session_id: &str, thread_id: &str) {
        self.update(session_id, |meta| {
            meta.thread_id = thread_id.to_owned();
        });
    }

    pub fn set_last_turn(&self, session_id: &str, turn_id: &str) {
        self.update(session_id, |meta| {
            meta.last_turn_id = turn_id.to_owned();
            meta.last_active_at = Some(Utc::now());
        });
    }

    pub fn touch(&self, session_id: &str) {
        self.update(session_id, |meta| {
            meta.last_active_at = Some(Utc::now());
        });
    }

    /// Merge incoming runtime options over the stored ones (set fields win,
    /// `None` preserves).
    pub fn merge_runtime_options(&self, session_id: &str, incoming: &RuntimeOptions) {
        self.update(session_id, |meta| {
            meta.runtime_options = meta.runtime_options.merged_with(incoming);
        });
    }

    pub fn remove(&self, session_id: &str) {
        self.records.write().remove(session_id);
    }

    pub fn flush(&self) -> Result<()> {
        let records = self.records.read();
        let json = serde_json::to_string_pretty(&*records)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_record_for_unknown_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionMetaStore::new(dir.path()).unwrap();

        let meta = store.get("s-1");
        assert_eq!(meta.session_id, "s-1");
        assert!(meta.thread_id.is_empty());
        assert!(meta.last_turn_id.is_empty());
    }

    #[test]
    fn thread_and_turn_updates_persist() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SessionMetaStore::new(dir.path()).unwrap();
            store.set_thread_id("s-1", "t-9");
            store.set_last_turn("s-1", "codex-turn-abc");
            store.flush().unwrap();
        }

        let reloaded = SessionMetaStore::new(dir.path()).unwrap();
        let meta = reloaded.get("s-1");
        assert_eq!(meta.thread_id, "t-9");
        assert_eq!(meta.last_turn_id, "codex-turn-abc");
        assert!(meta.last_active_at.is_some());
    }

    #[test]
    fn runtime_option_merge_preserves_unset_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionMetaStore::new(dir.path()).unwrap();

        store.merge_runtime_options(
            "s-1",
            &RuntimeOptions {
                model: Some("gpt-5".into()),
                approval_policy: Some("on-request".into()),
                ..Default::default()
            },
        );
        store.merge_runtime_options(
            "s-1",
            &RuntimeOptions {
                model: Some("o4-mini".into()),
                ..Default::default()
            },
        );

        let meta = store.get("s-1");
        assert_eq!(meta.runtime_options.model.as_deref(), Some("o4-mini"));
        assert_eq!(
            meta.runtime_options.approval_policy.as_deref(),
            Some("on-request")
        );
    }
}
