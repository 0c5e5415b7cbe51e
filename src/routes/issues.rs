use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::jobs::{enqueue_job, JOB_EXTRACT_ISSUES};
use crate::models::{new_id, Issue, IssueStatus, PainLevel, DEFAULT_PROJECT_ID};
use crate::routes::sources::{load_source, source_content};
use crate::state::AppState;
use crate::store::{self, patch, Query as StoreQuery, Record, SortDirection};

#[derive(Deserialize)]
pub struct ListIssuesParams {
    pub project_id: Option<String>,
    pub source_id: Option<String>,
    pub status: Option<String>,
    pub pain_level: Option<String>,
}

#[derive(Deserialize)]
pub struct ExtractRequest {
    pub source_id: String,
    pub content: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

pub async fn list_issues(
    State(state): State<AppState>,
    Query(params): Query<ListIssuesParams>,
) -> AppResult<Json<Vec<Issue>>> {
    let status = params
        .status
        .as_deref()
        .map(parse_status)
        .transpose()?;
    let pain_level = params
        .pain_level
        .as_deref()
        .map(|value| {
            PainLevel::parse(value).ok_or_else(|| {
                AppError::invalid_field("pain_level", format!("unknown pain level: {value}"))
            })
        })
        .transpose()?;

    let query = StoreQuery::new()
        .filter(
            "project_id",
            params.project_id.as_deref().unwrap_or(DEFAULT_PROJECT_ID),
        )
        .filter_opt("source_id", params.source_id.as_deref())
        .filter_opt("status", status.map(|s| s.as_str()))
        .filter_opt("pain_level", pain_level.map(|p| p.as_str()))
        .order_by("extracted_at", SortDirection::Desc);
    let issues: Vec<Issue> = store::list_as(state.store(), &query).await?;
    Ok(Json(issues))
}

pub async fn get_issue(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
) -> AppResult<Json<Issue>> {
    Ok(Json(load_issue(&state, &issue_id).await?))
}

/// Queues extraction and answers before the model runs.
pub async fn extract_issues(
    State(state): State<AppState>,
    Json(payload): Json<ExtractRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let source = load_source(&state, &payload.source_id).await?;
    let content = match payload.content.filter(|c| !c.trim().is_empty()) {
        Some(content) => content,
        None => source_content(&state, &source).await?,
    };
    if content.trim().is_empty() {
        return Err(AppError::invalid_field(
            "content",
            "the source has no content to extract from",
        ));
    }

    let project_id = payload
        .project_id
        .unwrap_or_else(|| source.project_id.clone());
    let batch_id = new_id();
    let job = enqueue_job(
        state.store(),
        JOB_EXTRACT_ISSUES,
        json!({
            "project_id": project_id,
            "source_id": source.id,
            "content": content,
            "batch_id": batch_id,
        }),
        None,
    )
    .await?;

    info!(job_id = %job.id, source_id = %source.id, batch_id = %batch_id, "queued issue extraction");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "processing",
            "batch_id": batch_id,
            "message": "issue extraction started",
        })),
    ))
}

pub async fn update_issue_status(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
    Json(payload): Json<StatusUpdateRequest>,
) -> AppResult<Json<Issue>> {
    let next = parse_status(&payload.status)?;
    Ok(Json(move_issue(&state, &issue_id, next).await?))
}

pub async fn select_issue(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
) -> AppResult<Json<Issue>> {
    Ok(Json(move_issue(&state, &issue_id, IssueStatus::Selected).await?))
}

pub async fn delete_issue(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
) -> AppResult<StatusCode> {
    if !state.store().delete(Issue::COLLECTION, &issue_id).await? {
        return Err(AppError::not_found("issue", &issue_id));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn load_issue(state: &AppState, issue_id: &str) -> AppResult<Issue> {
    store::fetch::<Issue>(state.store(), issue_id)
        .await?
        .ok_or_else(|| AppError::not_found("issue", issue_id))
}

async fn move_issue(state: &AppState, issue_id: &str, next: IssueStatus) -> AppResult<Issue> {
    let issue = load_issue(state, issue_id).await?;
    if issue.status == next {
        return Ok(issue);
    }
    if !issue.status.can_transition_to(next) {
        return Err(AppError::invalid_field(
            "status",
            format!("cannot move issue from {} back to {}", issue.status, next),
        ));
    }

    store::update_as::<Issue>(
        state.store(),
        issue_id,
        patch(json!({ "status": next, "updated_at": Utc::now() })),
    )
    .await?
    .ok_or_else(|| AppError::not_found("issue", issue_id))
}

fn parse_status(value: &str) -> AppResult<IssueStatus> {
    IssueStatus::parse(value)
        .ok_or_else(|| AppError::invalid_field("status", format!("unknown issue status: {value}")))
}
