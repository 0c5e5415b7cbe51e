use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::models::{new_id, Project, DEFAULT_PROJECT_ID};
use crate::state::AppState;
use crate::store::{self, Query, Record, SortDirection};
use crate::utils::json::{classify_nullable, non_empty_string, NullableValue};

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

pub async fn list_projects(State(state): State<AppState>) -> AppResult<Json<Vec<Project>>> {
    store::save_if_absent(state.store(), &Project::default_project()).await?;

    let query = Query::new().order_by("created_at", SortDirection::Asc);
    let projects: Vec<Project> = store::list_as(state.store(), &query).await?;
    Ok(Json(projects))
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(payload): Json<CreateProjectRequest>,
) -> AppResult<(StatusCode, Json<Project>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::invalid_field("name", "name must not be empty"));
    }

    let project = Project::new(new_id(), name, payload.description);
    store::save(state.store(), &project).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> AppResult<Json<Project>> {
    let project = store::fetch::<Project>(state.store(), &project_id)
        .await?
        .ok_or_else(|| AppError::not_found("project", &project_id))?;
    Ok(Json(project))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(body): Json<Value>,
) -> AppResult<Json<Project>> {
    let mut changes = Map::new();
    if let Some(name) = non_empty_string(&body, "name").map_err(AppError::bad_request)? {
        changes.insert("name".into(), Value::String(name));
    }
    match classify_nullable(body.get("description")).map_err(AppError::bad_request)? {
        NullableValue::Omitted => {}
        NullableValue::Null => {
            changes.insert("description".into(), Value::Null);
        }
        NullableValue::String(description) => {
            changes.insert("description".into(), Value::String(description));
        }
    }
    changes.insert("updated_at".into(), serde_json::to_value(Utc::now())?);

    let project = store::update_as::<Project>(state.store(), &project_id, changes)
        .await?
        .ok_or_else(|| AppError::not_found("project", &project_id))?;
    Ok(Json(project))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> AppResult<StatusCode> {
    if project_id == DEFAULT_PROJECT_ID {
        return Err(AppError::bad_request("the default project cannot be deleted"));
    }
    if !state.store().delete(Project::COLLECTION, &project_id).await? {
        return Err(AppError::not_found("project", &project_id));
    }
    Ok(StatusCode::NO_CONTENT)
}
