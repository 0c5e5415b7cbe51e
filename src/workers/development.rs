use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    agents::{CoderAgent, DesignAgent, TesterAgent},
    jobs::JOB_RUN_DEVELOPMENT,
    models::{
        Development, DevelopmentStatus, FileTestResult, Job, LogLevel, Requirement,
    },
    state::AppState,
    store::{self, StoreError},
};

use super::{JobExecution, JobHandler};

#[derive(Debug, Deserialize)]
struct DevelopmentPayload {
    development_id: String,
}

/// Design, code and test one requirement.
pub struct RunDevelopmentJob;

impl RunDevelopmentJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RunDevelopmentJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for RunDevelopmentJob {
    fn job_type(&self) -> &'static str {
        JOB_RUN_DEVELOPMENT
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: DevelopmentPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid development payload: {err}"),
                }
            }
        };

        let development: Development =
            match store::fetch(state.store(), &payload.development_id).await {
                Ok(Some(development)) => development,
                Ok(None) => {
                    return JobExecution::Failed {
                        error: format!("development {} not found", payload.development_id),
                    }
                }
                Err(err) => return retry(err),
            };

        match run_pipeline(&state, development).await {
            Ok(development) => {
                info!(
                    job_id = %job.id,
                    development_id = %development.id,
                    status = %development.status,
                    files = development.generated_files.len(),
                    "development pipeline finished"
                );
                JobExecution::Success
            }
            Err(err) => retry(err),
        }
    }
}

fn retry(err: StoreError) -> JobExecution {
    warn!(error = %err, "development job will retry");
    JobExecution::Retry {
        delay: Duration::from_secs(30),
        error: err.to_string(),
    }
}

async fn persist(state: &AppState, development: &mut Development) -> Result<(), StoreError> {
    development.updated_at = Utc::now();
    store::save(state.store(), development).await
}

async fn run_pipeline(
    state: &AppState,
    mut development: Development,
) -> Result<Development, StoreError> {
    let Some(requirement) =
        store::fetch::<Requirement>(state.store(), &development.requirement_id).await?
    else {
        development.status = DevelopmentStatus::Failed;
        development.log(
            "orchestrator",
            LogLevel::Error,
            format!("requirement {} not found", development.requirement_id),
        );
        persist(state, &mut development).await?;
        return Ok(development);
    };

    development.status = DevelopmentStatus::Designing;
    development.log("designer", LogLevel::Info, "designing file layout");
    persist(state, &mut development).await?;

    let design = DesignAgent::new(state.code_model.clone())
        .design(&requirement.markdown_content)
        .await;
    development.design = serde_json::to_value(&design).ok();
    if design.file_structure.is_empty() {
        development.status = DevelopmentStatus::Failed;
        development.log(
            "designer",
            LogLevel::Error,
            format!("design produced no files: {}", design.notes),
        );
        persist(state, &mut development).await?;
        return Ok(development);
    }
    development.log(
        "designer",
        LogLevel::Info,
        format!(
            "design ready: {} files in {}",
            design.file_structure.len(),
            design.language()
        ),
    );

    development.status = DevelopmentStatus::Coding;
    persist(state, &mut development).await?;
    development.generated_files = CoderAgent::new(state.code_model.clone())
        .generate_all(&design)
        .await;
    development.log(
        "coder",
        LogLevel::Info,
        format!("generated {} files", development.generated_files.len()),
    );

    development.status = DevelopmentStatus::Testing;
    persist(state, &mut development).await?;

    let tester = TesterAgent::new(state.code_model.clone(), state.checker.clone());
    let files = std::mem::take(&mut development.generated_files);
    development.test_results.clear();
    development.error_count = 0;
    for file in files {
        let outcome = tester.test_and_fix(file).await;
        development.retry_count += outcome.retries();
        let level = if outcome.success {
            LogLevel::Info
        } else {
            development.error_count += 1;
            LogLevel::Warning
        };
        development.log(
            "tester",
            level,
            format!("{}: {}", outcome.file.path, outcome.message),
        );
        development.test_results.push(FileTestResult {
            path: outcome.file.path.clone(),
            success: outcome.success,
            message: outcome.message,
            attempts: outcome.attempts,
        });
        development.generated_files.push(outcome.file);
    }

    development.status = if development.error_count == 0 {
        DevelopmentStatus::Review
    } else {
        DevelopmentStatus::Failed
    };
    let summary = format!(
        "{} of {} files passed syntax checks",
        passed_count(&development.test_results),
        development.test_results.len()
    );
    let level = if development.error_count == 0 {
        LogLevel::Info
    } else {
        LogLevel::Error
    };
    development.log("orchestrator", level, summary);
    persist(state, &mut development).await?;
    Ok(development)
}

fn passed_count(results: &[FileTestResult]) -> usize {
    results.iter().filter(|result| result.success).count()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::agents::testing::ScriptedChecker;
    use crate::models::{new_id, JobStatus, RequirementStatus, DEFAULT_PROJECT_ID};
    use crate::workers::testing::state_with;

    const DESIGN: &str = r#"```json
{"project_name": "exporter", "tech_stack": {"language": "python"},
 "file_structure": [{"path": "export.py", "description": "entry", "type": "entrypoint"},
                    {"path": "util.py", "description": "helpers", "type": "utility"}],
 "implementation_order": ["util.py", "export.py"]}
```"#;

    async fn seed(state: &AppState) -> Development {
        let now = Utc::now();
        let requirement = Requirement {
            id: new_id(),
            project_id: DEFAULT_PROJECT_ID.to_string(),
            issue_id: "issue-1".to_string(),
            issue_ids: vec!["issue-1".to_string()],
            title: "Requirements: export".to_string(),
            background: String::new(),
            problem_statement: String::new(),
            tech_approach: String::new(),
            markdown_content: "# Requirements: export".to_string(),
            status: RequirementStatus::Approved,
            github_issue_number: None,
            github_issue_url: None,
            created_at: now,
            updated_at: now,
        };
        store::save(state.store(), &requirement).await.unwrap();
        let development = Development::new(DEFAULT_PROJECT_ID, &requirement.id, 3);
        store::save(state.store(), &development).await.unwrap();
        development
    }

    fn job(development_id: &str) -> Job {
        Job {
            id: new_id(),
            job_type: JOB_RUN_DEVELOPMENT.to_string(),
            payload: json!({ "development_id": development_id }),
            status: JobStatus::Processing,
            attempts: 1,
            run_after: Utc::now(),
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn code(text: &str) -> Result<String, crate::clients::ClientError> {
        Ok(format!("```python\n{text}\n```"))
    }

    #[tokio::test]
    async fn passing_files_end_in_review() {
        let state = state_with(
            vec![],
            vec![Ok(DESIGN.to_string()), code("main()"), code("def helper(): pass")],
            ScriptedChecker::always(true),
        );
        let development = seed(&state).await;

        let result = RunDevelopmentJob::new().handle(state.clone(), job(&development.id)).await;
        assert!(matches!(result, JobExecution::Success));

        let stored: Development = store::fetch(state.store(), &development.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DevelopmentStatus::Review);
        assert_eq!(stored.generated_files.len(), 2);
        assert_eq!(stored.generated_files[0].content, "main()");
        assert_eq!(stored.error_count, 0);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.design.is_some());
        assert!(stored.agent_logs.iter().any(|entry| entry.agent == "tester"));
    }

    #[tokio::test]
    async fn a_file_that_never_passes_fails_the_development() {
        let state = state_with(
            vec![],
            vec![
                Ok(DESIGN.to_string()),
                code("broken("),
                code("def helper(): pass"),
                code("still broken("),
                code("broken again("),
            ],
            ScriptedChecker::new(vec![false, false, false, true]),
        );
        let development = seed(&state).await;

        RunDevelopmentJob::new().handle(state.clone(), job(&development.id)).await;

        let stored: Development = store::fetch(state.store(), &development.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DevelopmentStatus::Failed);
        assert_eq!(stored.error_count, 1);
        assert_eq!(stored.retry_count, 3);
        assert!(!stored.test_results[0].success);
        assert!(stored.test_results[1].success);
    }

    #[tokio::test]
    async fn rerun_ignores_counts_from_an_earlier_attempt() {
        let state = state_with(
            vec![],
            vec![Ok(DESIGN.to_string()), code("main()"), code("def helper(): pass")],
            ScriptedChecker::always(true),
        );
        let mut development = seed(&state).await;
        development.error_count = 5;
        store::save(state.store(), &development).await.unwrap();

        let result = RunDevelopmentJob::new().handle(state.clone(), job(&development.id)).await;
        assert!(matches!(result, JobExecution::Success));

        let stored: Development = store::fetch(state.store(), &development.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DevelopmentStatus::Review);
        assert_eq!(stored.error_count, 0);
        assert!(stored
            .agent_logs
            .iter()
            .any(|entry| entry.message == "2 of 2 files passed syntax checks"));
    }

    #[tokio::test]
    async fn empty_design_fails_the_development() {
        let state = state_with(vec![], vec![Ok("no idea".to_string())], ScriptedChecker::always(true));
        let development = seed(&state).await;

        RunDevelopmentJob::new().handle(state.clone(), job(&development.id)).await;

        let stored: Development = store::fetch(state.store(), &development.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DevelopmentStatus::Failed);
        assert!(stored.generated_files.is_empty());
    }
}
