//! Project registration endpoints (§6.4, §4.6): the minimal surface the
//! CLI needs to register a working copy before submitting build tasks or
//! issuing direct Git operations against it.

use axum::extract::State;
use axum::Json;
use buildforge_core::model::project::{Project, ProjectForCreate, ProjectRepo};
use serde::Deserialize;

use crate::error::Result;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn create(State(state): State<AppState>, Json(body): Json<CreateProjectRequest>) -> Result<Json<Project>> {
    let project = ProjectRepo::create(
        &state.runtime.db,
        ProjectForCreate {
            name: body.name,
            path: body.path,
            description: body.description,
        },
    )
    .await?;

    Ok(Json(project))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Project>>> {
    let projects = ProjectRepo::list_active(&state.runtime.db).await?;
    Ok(Json(projects))
}
