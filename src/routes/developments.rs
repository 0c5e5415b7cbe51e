use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::clients::push_generated_files;
use crate::error::{AppError, AppResult};
use crate::jobs::{enqueue_job, JOB_RUN_DEVELOPMENT};
use crate::models::{
    AgentLogEntry, Development, DevelopmentStatus, LogLevel, DEFAULT_PROJECT_ID,
};
use crate::routes::requirements::load_requirement;
use crate::state::AppState;
use crate::store::{self, patch, Query as StoreQuery, SortDirection};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
const BRANCH_PREFIX: &str = "autodev";

#[derive(Deserialize)]
pub struct ListDevelopmentsParams {
    pub project_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct StartDevelopmentRequest {
    pub requirement_id: String,
    pub project_id: Option<String>,
}

pub async fn list_developments(
    State(state): State<AppState>,
    Query(params): Query<ListDevelopmentsParams>,
) -> AppResult<Json<Vec<Development>>> {
    let status = params
        .status
        .as_deref()
        .map(|value| {
            DevelopmentStatus::parse(value).ok_or_else(|| {
                AppError::invalid_field("status", format!("unknown development status: {value}"))
            })
        })
        .transpose()?;
    let query = StoreQuery::new()
        .filter(
            "project_id",
            params.project_id.as_deref().unwrap_or(DEFAULT_PROJECT_ID),
        )
        .filter_opt("status", status.map(|s| s.as_str()))
        .order_by("created_at", SortDirection::Desc);
    let developments: Vec<Development> = store::list_as(state.store(), &query).await?;
    Ok(Json(developments))
}

pub async fn get_development(
    State(state): State<AppState>,
    Path(development_id): Path<String>,
) -> AppResult<Json<Development>> {
    Ok(Json(load_development(&state, &development_id).await?))
}

pub async fn get_development_logs(
    State(state): State<AppState>,
    Path(development_id): Path<String>,
) -> AppResult<Json<Vec<AgentLogEntry>>> {
    let development = load_development(&state, &development_id).await?;
    Ok(Json(development.agent_logs))
}

pub async fn start_development(
    State(state): State<AppState>,
    Json(payload): Json<StartDevelopmentRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let requirement = load_requirement(&state, &payload.requirement_id).await?;
    let project_id = payload
        .project_id
        .unwrap_or_else(|| requirement.project_id.clone());

    let mut development = Development::new(&project_id, &requirement.id, DEFAULT_MAX_RETRIES);
    development.log("system", LogLevel::Info, "development queued");
    store::save(state.store(), &development).await?;

    let job = enqueue_job(
        state.store(),
        JOB_RUN_DEVELOPMENT,
        json!({ "development_id": development.id }),
        None,
    )
    .await?;

    info!(job_id = %job.id, development_id = %development.id, requirement_id = %requirement.id, "queued development");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "processing",
            "development_id": development.id,
        })),
    ))
}

pub async fn github_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "configured": state.vcs.is_configured(),
        "repo": state.vcs.repo(),
    }))
}

pub async fn create_pull_request(
    State(state): State<AppState>,
    Path(development_id): Path<String>,
) -> AppResult<Json<Value>> {
    let development = load_development(&state, &development_id).await?;
    if !state.vcs.is_configured() {
        return Err(AppError::configuration("GITHUB_TOKEN, GITHUB_REPO"));
    }
    if development.generated_files.is_empty() {
        return Err(AppError::bad_request(
            "development has no generated files to push",
        ));
    }

    let requirement = load_requirement(&state, &development.requirement_id).await?;
    let branch = branch_name(&development.id);
    let base = state.config.github_base_branch.as_str();

    let summary = push_generated_files(
        state.vcs.as_ref(),
        &development.generated_files,
        &branch,
        &format!("feat: {}", requirement.title),
        base,
    )
    .await?;

    let pull = state
        .vcs
        .create_pull_request(
            &format!("[autodev] {}", requirement.title),
            &pull_request_body(&development, &requirement.markdown_content),
            &branch,
            base,
        )
        .await?;

    let mut logs = development.agent_logs.clone();
    logs.push(AgentLogEntry::new(
        "system",
        LogLevel::Info,
        format!("opened pull request #{}", pull.number),
    ));
    store::update_as::<Development>(
        state.store(),
        &development_id,
        patch(json!({
            "github_branch": branch,
            "github_pr_number": pull.number,
            "github_pr_url": pull.url,
            "agent_logs": logs,
            "updated_at": Utc::now(),
        })),
    )
    .await?
    .ok_or_else(|| AppError::not_found("development", &development_id))?;

    info!(development_id = %development_id, branch = %branch, commits = summary.commits.len(), pr = pull.number, "pull request created");
    Ok(Json(json!({
        "status": "created",
        "branch": branch,
        "commits": summary.commits.len(),
        "pr_number": pull.number,
        "pr_url": pull.url,
    })))
}

async fn load_development(state: &AppState, development_id: &str) -> AppResult<Development> {
    store::fetch::<Development>(state.store(), development_id)
        .await?
        .ok_or_else(|| AppError::not_found("development", development_id))
}

fn branch_name(development_id: &str) -> String {
    let short: String = development_id.chars().take(8).collect();
    format!("{BRANCH_PREFIX}/{short}")
}

fn pull_request_body(development: &Development, requirement_markdown: &str) -> String {
    let mut body = format!(
        "## Requirement\n\n{requirement_markdown}\n\n## Generated files\n\n"
    );
    for file in &development.generated_files {
        let passed = development
            .test_results
            .iter()
            .find(|result| result.path == file.path)
            .map(|result| result.success);
        let mark = match passed {
            Some(true) => "passed",
            Some(false) => "failed",
            None => "unchecked",
        };
        body.push_str(&format!("- `{}` ({}, {mark})\n", file.path, file.language));
    }
    body.push_str(&format!(
        "\nDevelopment `{}`: {} retries, {} files with errors.\n",
        development.id, development.retry_count, development.error_count
    ));
    body
}
