//! Workspace, worktree, and workspace-group CRUD.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::path::PathBuf;

use archon_domain::error::Error;

use crate::api::error_response;
use crate::state::AppState;
use crate::stores::{Workspace, WorkspaceGroup, Worktree};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkspaceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWorktreeRequest {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub workspace_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub workspace_ids: Option<Vec<String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspaces
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_workspace(
    State(state): State<AppState>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Response {
    if req.name.trim().is_empty() {
        return error_response(Error::Invalid("workspace name must not be empty".into()));
    }
    let workspace = Workspace::new(&req.name, req.path);
    state.workspaces.insert(&workspace.id, workspace.clone());
    (StatusCode::CREATED, Json(workspace)).into_response()
}

pub async fn list_workspaces(State(state): State<AppState>) -> Response {
    let mut all = state.workspaces.values();
    all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(all).into_response()
}

pub async fn get_workspace(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.workspaces.get(&id) {
        Some(workspace) => Json(workspace).into_response(),
        None => error_response(Error::NotFound(format!("workspace {id}"))),
    }
}

pub async fn update_workspace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateWorkspaceRequest>,
) -> Response {
    let updated = state.workspaces.update(&id, |workspace| {
        if let Some(name) = &req.name {
            workspace.name = name.clone();
        }
        if let Some(path) = &req.path {
            workspace.path = path.clone();
        }
    });
    match updated {
        Some(workspace) => Json(workspace).into_response(),
        None => error_response(Error::NotFound(format!("workspace {id}"))),
    }
}

pub async fn delete_workspace(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.workspaces.remove(&id) {
        Some(_) => Json(serde_json::json!({ "ok": true })).into_response(),
        None => error_response(Error::NotFound(format!("workspace {id}"))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worktrees
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_worktree(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    Json(req): Json<CreateWorktreeRequest>,
) -> Response {
    if state.workspaces.get(&workspace_id).is_none() {
        return error_response(Error::NotFound(format!("workspace {workspace_id}")));
    }
    let worktree = Worktree::new(&workspace_id, &req.name, req.path, req.branch);
    state.worktrees.insert(&worktree.id, worktree.clone());
    (StatusCode::CREATED, Json(worktree)).into_response()
}

pub async fn list_worktrees(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
) -> Response {
    let mut all: Vec<Worktree> = state
        .worktrees
        .values()
        .into_iter()
        .filter(|wt| wt.workspace_id == workspace_id)
        .collect();
    all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(all).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace groups
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Response {
    if req.name.trim().is_empty() {
        return error_response(Error::Invalid("group name must not be empty".into()));
    }
    let group = WorkspaceGroup::new(&req.name, req.workspace_ids);
    state.groups.insert(&group.id, group.clone());
    (StatusCode::CREATED, Json(group)).into_response()
}

pub async fn list_groups(State(state): State<AppState>) -> Response {
    let mut all = state.groups.values();
    all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(all).into_response()
}

pub async fn get_group(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.groups.get(&id) {
        Some(group) => Json(group).into_response(),
        None => error_response(Error::NotFound(format!("workspace group {id}"))),
    }
}

pub async fn update_group(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateGroupRequest>,
) -> Response {
    let updated = state.groups.update(&id, |group| {
        if let Some(name) = &req.name {
            group.name = name.clone();
        }
        if let Some(ids) = &req.workspace_ids {
            group.workspace_ids = ids.clone();
        }
    });
    match updated {
        Some(group) => Json(group).into_response(),
        None => error_response(Error::NotFound(format!("workspace group {id}"))),
    }
}

pub async fn delete_group(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.groups.remove(&id) {
        Some(_) => Json(serde_json::json!({ "ok": true })).into_response(),
        None => error_response(Error::NotFound(format!("workspace group {id}"))),
    }
}
