//! Pending approval store.
//!
//! An approval is a structured request from the upstream provider asking
//! the client to permit a sensitive action. Records are keyed
//! `(sessionID, requestID)`, upserted when the request message arrives, and
//! deleted once the client responds.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use archon_domain::error::{Error, Result};
use archon_domain::trace::TraceEvent;

/// Upstream request methods that create approval records.
pub const APPROVAL_METHODS: [&str; 3] = [
    "item/commandExecution/requestApproval",
    "item/fileChange/requestApproval",
    "tool/requestUserInput",
];

/// Whether a request method requires an approval record.
pub fn is_approval_method(method: &str) -> bool {
    APPROVAL_METHODS.contains(&method)
}

/// One pending approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub session_id: String,
    pub request_id: i64,
    pub method: String,
    pub params: Value,
    pub created_at: DateTime<Utc>,
}

/// Thread-safe approval store with JSON-file persistence
/// (`approvals.json`).
pub struct ApprovalStore {
    path: PathBuf,
    pending: RwLock<HashMap<(String, i64), Approval>>,
}

impl ApprovalStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("approvals.json");

        let mut pending = HashMap::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            let records: Vec<Approval> = serde_json::from_str(&raw).unwrap_or_default();
            for record in records {
                pending.insert((record.session_id.clone(), record.request_id), record);
            }
        }

        Ok(Self {
            path,
            pending: RwLock::new(pending),
        })
    }

    /// Insert or replace the approval for `(session_id, request_id)`.
    pub fn upsert(&self, approval: Approval) {
        TraceEvent::ApprovalStored {
            session_id: approval.session_id.clone(),
            request_id: approval.request_id,
            method: approval.method.clone(),
        }
        .emit();
        self.pending.write().insert(
            (approval.session_id.clone(), approval.request_id),
            approval,
        );
    }

    pub fn get(&self, session_id: &str, request_id: i64) -> Option<Approval> {
        self.pending
            .read()
            .get(&(session_id.to_owned(), request_id))
            .cloned()
    }

    /// Delete the approval after a successful respond. Returns the removed
    /// record.
    pub fn remove(&self, session_id: &str, request_id: i64) -> Option<Approval> {
        let removed = self
            .pending
            .write()
            .remove(&(session_id.to_owned(), request_id));
        if removed.is_some() {
            TraceEvent::ApprovalResolved {
                session_id: session_id.to_owned(),
                request_id,
            }
            .emit();
        }
        removed
    }

    pub fn list(&self) -> Vec<Approval> {
        let mut all: Vec<Approval> = self.pending.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub fn list_for_session(&self, session_id: &str) -> Vec<Approval> {
        let mut all: Vec<Approval> = self
            .pending
            .read()
            .values()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Drop all approvals for a session (session killed).
    pub fn remove_session(&self, session_id: &str) {
        self.pending
            .write()
            .retain(|(sid, _), _| sid != session_id);
    }

    pub fn flush(&self) -> Result<()> {
        let records: Vec<Approval> = self.pending.read().values().cloned().collect();
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, ApprovalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ApprovalStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn approval(session_id: &str, request_id: i64) -> Approval {
        Approval {
            session_id: session_id.to_owned(),
            request_id,
            method: "item/commandExecution/requestApproval".into(),
            params: json!({"permission_id": "perm-1"}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_get_remove_round_trip() {
        let (_dir, store) = store();
        store.upsert(approval("s-1", 42));

        let found = store.get("s-1", 42).unwrap();
        assert_eq!(found.params["permission_id"], "perm-1");

        assert!(store.remove("s-1", 42).is_some());
        assert!(store.get("s-1", 42).is_none());
        assert!(store.remove("s-1", 42).is_none());
    }

    #[test]
    fn upsert_replaces_existing_record() {
        let (_dir, store) = store();
        store.upsert(approval("s-1", 42));

        let mut updated = approval("s-1", 42);
        updated.params = json!({"permission_id": "perm-2"});
        store.upsert(updated);

        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get("s-1", 42).unwrap().params["permission_id"], "perm-2");
    }

    #[test]
    fn records_are_scoped_by_session() {
        let (_dir, store) = store();
        store.upsert(approval("s-1", 1));
        store.upsert(approval("s-2", 1));

        assert_eq!(store.list_for_session("s-1").len(), 1);
        store.remove_session("s-1");
        assert!(store.get("s-1", 1).is_none());
        assert!(store.get("s-2", 1).is_some());
    }

    #[test]
    fn flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ApprovalStore::new(dir.path()).unwrap();
            store.upsert(approval("s-1", 7));
            store.flush().unwrap();
        }
        let reloaded = ApprovalStore::new(dir.path()).unwrap();
        assert!(reloaded.get("s-1", 7).is_some());
    }

    #[test]
    fn approval_method_matching() {
        assert!(is_approval_method("item/commandExecution/requestApproval"));
        assert!(is_approval_method("item/fileChange/requestApproval"));
        assert!(is_approval_method("tool/requestUserInput"));
        assert!(!is_approval_method("item/agentMessage/delta"));
    }
}
