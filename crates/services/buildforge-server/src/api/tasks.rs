//! Task lifecycle endpoints (§6.4): create, start, cancel, and fetch a
//! build task. `start` hands the task to the Build Pipeline as a detached
//! background job; the pipeline owns the task's terminal status from
//! there on.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use buildforge_build::{BuildPipeline, TokioGradleRunner, ZipExtractor};
use buildforge_core::ids::{ProjectId, TaskId};
use buildforge_core::model::project::ProjectRepo;
use buildforge_core::model::task::{Task, TaskForCreate, TaskRepo, TaskStatus};
use serde::Deserialize;

use crate::error::{Result, ServerError};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub project_id: i64,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub archive_path: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_branch() -> String {
    "main".to_string()
}

pub async fn create(State(state): State<AppState>, Json(body): Json<CreateTaskRequest>) -> Result<Json<Task>> {
    let project_id = ProjectId(body.project_id);
    ProjectRepo::get_by_id(&state.runtime.db, project_id).await?;

    if TaskRepo::active_for_project(&state.runtime.db, project_id).await?.is_some() {
        return Err(ServerError::BadRequest(format!(
            "project {project_id} already has a task in progress"
        )));
    }

    let config = if body.config.is_null() { serde_json::json!({}) } else { body.config };
    let task = TaskRepo::create(
        &state.runtime.db,
        TaskForCreate {
            project_id,
            branch: body.branch,
            archive_path: body.archive_path,
            config,
        },
    )
    .await?;

    Ok(Json(task))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Task>> {
    let task = TaskRepo::get_by_id(&state.runtime.db, TaskId(id)).await?;
    Ok(Json(task))
}

pub async fn start(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Task>> {
    let task_id = TaskId(id);
    let task = TaskRepo::get_by_id(&state.runtime.db, task_id).await?;

    if task.status != TaskStatus::Pending {
        return Err(ServerError::BadRequest(format!(
            "task {task_id} is {:?}, only a pending task can be started",
            task.status
        )));
    }

    let kill_grace = Duration::from_secs(state.runtime.config.build.gradle_kill_grace_secs);
    let pipeline = Arc::new(BuildPipeline::new(
        Arc::clone(&state.runtime),
        TokioGradleRunner::new(kill_grace),
        ZipExtractor,
    ));

    tokio::spawn(async move {
        if let Err(err) = pipeline.run(task_id).await {
            tracing::error!(%task_id, error = %err, "build pipeline run returned an error after persisting its own terminal status");
        }
    });

    Ok(Json(task))
}

pub async fn cancel(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<serde_json::Value>> {
    let task_id = TaskId(id);
    TaskRepo::get_by_id(&state.runtime.db, task_id).await?;

    let cancel_requested = state.runtime.task_runtime.cancel(task_id).await;
    Ok(Json(serde_json::json!({
        "task_id": task_id.get(),
        "cancel_requested": cancel_requested,
    })))
}
