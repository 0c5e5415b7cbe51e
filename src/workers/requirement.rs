use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    agents::{RequirementAgent, RequirementInput},
    jobs::JOB_GENERATE_REQUIREMENT,
    models::{Issue, IssueStatus, Job, Requirement, RequirementStatus},
    state::AppState,
    store::{self, patch, Record, StoreError},
};

use super::{JobExecution, JobHandler};

#[derive(Debug, Deserialize)]
struct RequirementPayload {
    project_id: String,
    requirement_id: String,
    issue_ids: Vec<String>,
}

pub struct GenerateRequirementJob;

impl GenerateRequirementJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GenerateRequirementJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for GenerateRequirementJob {
    fn job_type(&self) -> &'static str {
        JOB_GENERATE_REQUIREMENT
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: RequirementPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid requirement payload: {err}"),
                }
            }
        };

        let issues = match load_issues(&state, &payload.issue_ids).await {
            Ok(issues) if issues.is_empty() => {
                return JobExecution::Failed {
                    error: "none of the requested issues exist".to_string(),
                }
            }
            Ok(issues) => issues,
            Err(err) => return retry(err),
        };

        let draft = RequirementAgent::new(state.model.clone())
            .generate(&RequirementInput::from_issues(&issues))
            .await;

        let now = Utc::now();
        let issue_ids: Vec<String> = issues.iter().map(|issue| issue.id.clone()).collect();
        let requirement = Requirement {
            id: payload.requirement_id,
            project_id: payload.project_id,
            issue_id: issue_ids[0].clone(),
            issue_ids,
            title: draft.title,
            background: draft.background,
            problem_statement: draft.problem_statement,
            tech_approach: draft.tech_approach,
            markdown_content: draft.markdown_content,
            status: RequirementStatus::Draft,
            github_issue_number: None,
            github_issue_url: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = store::save(state.store(), &requirement).await {
            return retry(err);
        }
        if let Err(err) = link_issues(&state, &issues, &requirement.id).await {
            return retry(err);
        }

        info!(job_id = %job.id, requirement_id = %requirement.id, issues = issues.len(), "requirement drafted");
        JobExecution::Success
    }
}

fn retry(err: StoreError) -> JobExecution {
    warn!(error = %err, "requirement job will retry");
    JobExecution::Retry {
        delay: Duration::from_secs(30),
        error: err.to_string(),
    }
}

async fn load_issues(state: &AppState, ids: &[String]) -> Result<Vec<Issue>, StoreError> {
    let mut issues = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(issue) = store::fetch::<Issue>(state.store(), id).await? {
            issues.push(issue);
        }
    }
    Ok(issues)
}

async fn link_issues(
    state: &AppState,
    issues: &[Issue],
    requirement_id: &str,
) -> Result<(), StoreError> {
    let now = Utc::now();
    for issue in issues {
        let status = if issue.status.can_transition_to(IssueStatus::InProgress) {
            IssueStatus::InProgress
        } else {
            issue.status
        };
        state
            .store()
            .update(
                Issue::COLLECTION,
                &issue.id,
                patch(json!({
                    "requirement_id": requirement_id,
                    "status": status,
                    "updated_at": now,
                })),
            )
            .await?;
    }
    Ok(())
}
