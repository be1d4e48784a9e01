//! Direct Git operations (§6.4): `commit`, `rollback`, and manual
//! `restore` bypass the Build Pipeline entirely and go straight through
//! the Git Safety Layer, still under the project's Repo Guard lease for
//! the duration of the operation.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use buildforge_core::ids::{ProjectId, SnapshotId};
use buildforge_core::model::project::ProjectRepo;
use serde::Deserialize;

use crate::error::Result;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CommitRequest {
    pub message: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub allow_empty: bool,
}

pub async fn commit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<CommitRequest>,
) -> Result<Json<serde_json::Value>> {
    let project_id = ProjectId(id);
    let project = ProjectRepo::get_by_id(&state.runtime.db, project_id).await?;
    let repo_path = PathBuf::from(project.path);

    let runtime = Arc::clone(&state.runtime);
    let closure_repo_path = repo_path.clone();
    let message = body.message;
    let paths = body.paths;
    let allow_empty = body.allow_empty;

    let oid = state
        .runtime
        .repo_guard
        .with_project(project_id, &repo_path, true, move || async move {
            runtime
                .git_safety
                .atomic_commit(&runtime.db, project_id, &closure_repo_path, &message, &paths, allow_empty)
                .await
        })
        .await?;

    Ok(Json(serde_json::json!({ "commit": oid })))
}

#[derive(Deserialize)]
pub struct RollbackRequest {
    pub target_commit: String,
}

pub async fn rollback(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RollbackRequest>,
) -> Result<Json<serde_json::Value>> {
    let project_id = ProjectId(id);
    let project = ProjectRepo::get_by_id(&state.runtime.db, project_id).await?;
    let repo_path = PathBuf::from(project.path);

    let runtime = Arc::clone(&state.runtime);
    let closure_repo_path = repo_path.clone();
    let target_commit = body.target_commit;

    state
        .runtime
        .repo_guard
        .with_project(project_id, &repo_path, true, move || async move {
            runtime
                .git_safety
                .rollback(&runtime.db, project_id, &closure_repo_path, &target_commit)
                .await
        })
        .await?;

    Ok(Json(serde_json::json!({ "status": "rolled_back" })))
}

#[derive(Deserialize)]
pub struct RestoreRequest {
    pub snapshot_id: i64,
    #[serde(default)]
    pub force: bool,
}

pub async fn restore(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RestoreRequest>,
) -> Result<Json<serde_json::Value>> {
    let project_id = ProjectId(id);
    let project = ProjectRepo::get_by_id(&state.runtime.db, project_id).await?;
    let repo_path = PathBuf::from(project.path);

    let runtime = Arc::clone(&state.runtime);
    let closure_repo_path = repo_path.clone();
    let snapshot_id = SnapshotId(body.snapshot_id);
    let force = body.force;

    state
        .runtime
        .repo_guard
        .with_project(project_id, &repo_path, true, move || async move {
            runtime
                .git_safety
                .restore_snapshot(&runtime.db, project_id, &closure_repo_path, snapshot_id, force)
                .await
        })
        .await?;

    Ok(Json(serde_json::json!({ "status": "restored" })))
}
