//! Workspace, worktree, and workspace-group stores.
//!
//! Each is a JSON-file-backed map under the state path, mirroring the
//! session stores: an in-memory `RwLock` cache flushed to disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use archon_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(name: &str, path: PathBuf) -> Self {
        Self {
            id: format!("ws-{}", uuid::Uuid::new_v4().simple()),
            name: name.to_owned(),
            path,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Worktree {
    pub fn new(workspace_id: &str, name: &str, path: PathBuf, branch: Option<String>) -> Self {
        Self {
            id: format!("wt-{}", uuid::Uuid::new_v4().simple()),
            workspace_id: workspace_id.to_owned(),
            name: name.to_owned(),
            path,
            branch,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub workspace_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkspaceGroup {
    pub fn new(name: &str, workspace_ids: Vec<String>) -> Self {
        Self {
            id: format!("wg-{}", uuid::Uuid::new_v4().simple()),
            name: name.to_owned(),
            workspace_ids,
            created_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generic JSON map store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// JSON-file-backed map of records keyed by id.
pub struct JsonStore<T> {
    path: PathBuf,
    records: RwLock<HashMap<String, T>>,
}

impl<T: Clone + Serialize + DeserializeOwned> JsonStore<T> {
    pub fn new(state_path: &Path, file_name: &str) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join(file_name);

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

    pub fn insert(&self, id: &str, record: T) {
        self.records.write().insert(id.to_owned(), record);
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.records.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<T> {
        self.records.write().remove(id)
    }

    pub fn update(&self, id: &str, mutate: impl FnOnce(&mut T)) -> Option<T> {
        let mut records = self.records.write();
        let record = records.get_mut(id)?;
        mutate(record);
        Some(record.clone())
    }

    pub fn values(&self) -> Vec<T> {
        self.records.read().values().cloned().collect()
    }

    pub fn flush(&self) -> Result<()> {
        let records = self.records.read();
        let json = serde_json::to_string_pretty(&*records)?;
        std::fs::write(&self.path, json).map_err(Error::Io)?;
        Ok(())
    }
}

pub type WorkspaceStore = JsonStore<Workspace>;
pub type WorktreeStore = JsonStore<Worktree>;
pub type WorkspaceGroupStore = JsonStore<WorkspaceGroup>;

pub fn open_workspace_store(state_path: &Path) -> Result<WorkspaceStore> {
    JsonStore::new(state_path, "workspaces.json")
}

pub fn open_worktree_store(state_path: &Path) -> Result<WorktreeStore> {
    JsonStore::new(state_path, "worktrees.json")
}

pub fn open_group_store(state_path: &Path) -> Result<WorkspaceGroupStore> {
    JsonStore::new(state_path, "workspace_groups.json")
}
