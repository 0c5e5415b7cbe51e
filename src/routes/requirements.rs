use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::jobs::{enqueue_job, JOB_GENERATE_REQUIREMENT};
use crate::models::{new_id, Issue, Requirement, RequirementStatus, DEFAULT_PROJECT_ID};
use crate::state::AppState;
use crate::store::{self, patch, Query as StoreQuery, Record, SortDirection};

const ISSUE_LABELS: [&str; 2] = ["auto-dev", "requirement"];

#[derive(Deserialize)]
pub struct ListRequirementsParams {
    pub project_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub issue_ids: Vec<String>,
    pub project_id: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateRequirementRequest {
    pub markdown_content: Option<String>,
    pub status: Option<String>,
}

pub async fn list_requirements(
    State(state): State<AppState>,
    Query(params): Query<ListRequirementsParams>,
) -> AppResult<Json<Vec<Requirement>>> {
    let status = params.status.as_deref().map(parse_status).transpose()?;
    let query = StoreQuery::new()
        .filter(
            "project_id",
            params.project_id.as_deref().unwrap_or(DEFAULT_PROJECT_ID),
        )
        .filter_opt("status", status.map(|s| s.as_str()))
        .order_by("created_at", SortDirection::Desc);
    let requirements: Vec<Requirement> = store::list_as(state.store(), &query).await?;
    Ok(Json(requirements))
}

pub async fn get_requirement(
    State(state): State<AppState>,
    Path(requirement_id): Path<String>,
) -> AppResult<Json<Requirement>> {
    Ok(Json(load_requirement(&state, &requirement_id).await?))
}

/// The requirement id is reserved now; the record appears once the job has run.
pub async fn generate_requirement(
    State(state): State<AppState>,
    Json(payload): Json<GenerateRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    if payload.issue_ids.is_empty() {
        return Err(AppError::invalid_field("issue_ids", "issue_ids must not be empty"));
    }

    let mut found = Vec::new();
    for issue_id in &payload.issue_ids {
        if let Some(issue) = store::fetch::<Issue>(state.store(), issue_id).await? {
            found.push(issue);
        }
    }
    let Some(first) = found.first() else {
        return Err(AppError::not_found("issues", payload.issue_ids.join(",")));
    };

    let project_id = payload
        .project_id
        .unwrap_or_else(|| first.project_id.clone());
    let issue_ids: Vec<&str> = found.iter().map(|issue| issue.id.as_str()).collect();
    let requirement_id = new_id();
    let job = enqueue_job(
        state.store(),
        JOB_GENERATE_REQUIREMENT,
        json!({
            "project_id": project_id,
            "requirement_id": requirement_id,
            "issue_ids": issue_ids,
        }),
        None,
    )
    .await?;

    info!(job_id = %job.id, requirement_id = %requirement_id, issues = found.len(), "queued requirement generation");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "processing",
            "requirement_id": requirement_id,
        })),
    ))
}

pub async fn update_requirement(
    State(state): State<AppState>,
    Path(requirement_id): Path<String>,
    Json(payload): Json<UpdateRequirementRequest>,
) -> AppResult<Json<Requirement>> {
    let requirement = load_requirement(&state, &requirement_id).await?;

    let mut changes = Map::new();
    if let Some(markdown) = payload.markdown_content.filter(|m| !m.trim().is_empty()) {
        changes.insert("markdown_content".into(), Value::String(markdown));
    }
    if let Some(status) = payload.status.as_deref() {
        let next = parse_status(status)?;
        check_transition(requirement.status, next)?;
        changes.insert("status".into(), serde_json::to_value(next)?);
    }
    changes.insert("updated_at".into(), serde_json::to_value(Utc::now())?);

    let updated = store::update_as::<Requirement>(state.store(), &requirement_id, changes)
        .await?
        .ok_or_else(|| AppError::not_found("requirement", &requirement_id))?;
    Ok(Json(updated))
}

pub async fn approve_requirement(
    State(state): State<AppState>,
    Path(requirement_id): Path<String>,
) -> AppResult<Json<Requirement>> {
    let requirement = load_requirement(&state, &requirement_id).await?;
    check_transition(requirement.status, RequirementStatus::Approved)?;

    let updated = store::update_as::<Requirement>(
        state.store(),
        &requirement_id,
        patch(json!({ "status": RequirementStatus::Approved, "updated_at": Utc::now() })),
    )
    .await?
    .ok_or_else(|| AppError::not_found("requirement", &requirement_id))?;
    info!(requirement_id = %requirement_id, "requirement approved");
    Ok(Json(updated))
}

pub async fn create_github_issue(
    State(state): State<AppState>,
    Path(requirement_id): Path<String>,
) -> AppResult<Json<Value>> {
    let requirement = load_requirement(&state, &requirement_id).await?;
    if !state.vcs.is_configured() {
        return Err(AppError::configuration("GITHUB_TOKEN, GITHUB_REPO"));
    }

    let labels: Vec<String> = ISSUE_LABELS.iter().map(|l| l.to_string()).collect();
    let issue = state
        .vcs
        .create_issue(&requirement.title, &issue_body(&requirement), &labels)
        .await?;

    if store::update_as::<Requirement>(
        state.store(),
        &requirement_id,
        patch(json!({
            "github_issue_number": issue.number,
            "github_issue_url": issue.url,
            "updated_at": Utc::now(),
        })),
    )
    .await?
    .is_none()
    {
        warn!(requirement_id = %requirement_id, "requirement vanished after its issue was created");
    }

    info!(requirement_id = %requirement_id, number = issue.number, "linked requirement to github issue");
    Ok(Json(json!({
        "status": "created",
        "github_issue_number": issue.number,
        "github_issue_url": issue.url,
    })))
}

pub async fn delete_requirement(
    State(state): State<AppState>,
    Path(requirement_id): Path<String>,
) -> AppResult<StatusCode> {
    if !state
        .store()
        .delete(Requirement::COLLECTION, &requirement_id)
        .await?
    {
        return Err(AppError::not_found("requirement", &requirement_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn load_requirement(
    state: &AppState,
    requirement_id: &str,
) -> AppResult<Requirement> {
    store::fetch::<Requirement>(state.store(), requirement_id)
        .await?
        .ok_or_else(|| AppError::not_found("requirement", requirement_id))
}

fn parse_status(value: &str) -> AppResult<RequirementStatus> {
    RequirementStatus::parse(value).ok_or_else(|| {
        AppError::invalid_field("status", format!("unknown requirement status: {value}"))
    })
}

fn check_transition(current: RequirementStatus, next: RequirementStatus) -> AppResult<()> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(AppError::invalid_field(
            "status",
            format!("cannot move requirement from {current} to {next}"),
        ))
    }
}

fn issue_body(requirement: &Requirement) -> String {
    format!(
        "## Requirement\n\n{}\n\n---\n\n- Requirement ID: `{}`\n- Created: {}\n- Status: {}\n",
        requirement.markdown_content,
        requirement.id,
        requirement.created_at.format("%Y-%m-%d %H:%M"),
        requirement.status,
    )
}
