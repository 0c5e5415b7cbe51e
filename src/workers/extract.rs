use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    agents::{ExtractedIssue, ExtractorAgent},
    jobs::JOB_EXTRACT_ISSUES,
    models::{new_id, Issue, IssueStatus, Job, Source},
    state::AppState,
    store::{self, patch, Query, Record, StoreError},
};

use super::{JobExecution, JobHandler};

#[derive(Debug, Deserialize)]
struct ExtractPayload {
    project_id: String,
    source_id: String,
    content: String,
    batch_id: String,
}

pub struct ExtractIssuesJob;

impl ExtractIssuesJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExtractIssuesJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for ExtractIssuesJob {
    fn job_type(&self) -> &'static str {
        JOB_EXTRACT_ISSUES
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: ExtractPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid extraction payload: {err}"),
                }
            }
        };

        let source: Source = match store::fetch(state.store(), &payload.source_id).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                return JobExecution::Failed {
                    error: format!("source {} not found", payload.source_id),
                }
            }
            Err(err) => return retry(err),
        };

        let extracted = ExtractorAgent::new(state.model.clone())
            .extract(&payload.content)
            .await;

        match store_issues(&state, &payload, &source, extracted).await {
            Ok(stored) => {
                info!(job_id = %job.id, source_id = %source.id, batch_id = %payload.batch_id, stored, "issues extracted");
                JobExecution::Success
            }
            Err(err) => retry(err),
        }
    }
}

fn retry(err: StoreError) -> JobExecution {
    warn!(error = %err, "extraction job will retry");
    JobExecution::Retry {
        delay: Duration::from_secs(30),
        error: err.to_string(),
    }
}

async fn store_issues(
    state: &AppState,
    payload: &ExtractPayload,
    source: &Source,
    extracted: Vec<ExtractedIssue>,
) -> Result<usize, StoreError> {
    let store = state.store();
    let now = Utc::now();
    let stored = extracted.len();

    for item in extracted {
        let issue = Issue {
            id: new_id(),
            project_id: payload.project_id.clone(),
            source_id: source.id.clone(),
            source_type: source.source_type,
            source_label: source.label.clone(),
            description: item.title.clone(),
            title: item.title,
            category: item.category,
            pain_level: item.pain_level,
            context: item.context,
            tech_approach: item.tech_approach,
            expected_outcome: item.expected_outcome,
            status: IssueStatus::New,
            requirement_id: None,
            extraction_batch_id: payload.batch_id.clone(),
            extracted_at: now,
            created_at: now,
            updated_at: now,
        };
        store::save(store, &issue).await?;
    }

    let issue_count = store
        .count(
            Issue::COLLECTION,
            &Query::new().filter("source_id", source.id.as_str()),
        )
        .await?;
    store
        .update(
            Source::COLLECTION,
            &source.id,
            patch(json!({ "issue_count": issue_count, "updated_at": now })),
        )
        .await?;
    Ok(stored)
}
