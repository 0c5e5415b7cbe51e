use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::watch, time::sleep};
use tracing::{error, info, warn};

use crate::{
    jobs::{
        mark_job_failed, mark_job_succeeded, reserve_job, retry_job_after, JobQueueError,
        MAX_ATTEMPTS,
    },
    models::Job,
    state::AppState,
};

pub mod development;
pub mod extract;
pub mod requirement;

pub use development::RunDevelopmentJob;
pub use extract::ExtractIssuesJob;
pub use requirement::GenerateRequirementJob;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

/// Polls the job collection and dispatches each job to the handler for its type.
pub struct Worker {
    state: Arc<AppState>,
    by_type: HashMap<&'static str, Arc<dyn JobHandler>>,
    idle_wait: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        idle_wait: Duration,
    ) -> Self {
        let by_type = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            by_type,
            idle_wait,
        }
    }

    /// Loops until `shutdown` flips to true. A job in flight is finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(job_types = ?self.job_types(), "worker started");
        while !*shutdown.borrow() {
            let wait = match self.tick().await {
                Ok(true) => continue,
                Ok(false) => self.idle_wait,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    self.idle_wait
                }
            };
            tokio::select! {
                _ = sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("worker stopped");
    }

    fn job_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.by_type.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Runs at most one job. Returns whether a job was found.
    pub async fn tick(&self) -> Result<bool, JobQueueError> {
        let job_types = self.job_types();
        if job_types.is_empty() {
            return Ok(false);
        }

        let store = self.state.store();
        let Some(job) = reserve_job(store, &job_types).await? else {
            return Ok(false);
        };

        let Some(handler) = self.by_type.get(job.job_type.as_str()) else {
            error!(job_type = %job.job_type, "no handler registered for job type");
            mark_job_failed(store, &job.id, "no handler registered").await?;
            return Ok(true);
        };

        match handler.handle(self.state.clone(), job.clone()).await {
            JobExecution::Success => {
                mark_job_succeeded(store, &job.id).await?;
                info!(job_id = %job.id, job_type = %job.job_type, "job completed successfully");
            }
            JobExecution::Retry { delay, error } if job.attempts < MAX_ATTEMPTS => {
                warn!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, %error, "job will retry");
                retry_job_after(store, &job.id, delay, &error).await?;
            }
            JobExecution::Retry { error, .. } | JobExecution::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, %error, "job failed");
                mark_job_failed(store, &job.id, &error).await?;
            }
        }
        Ok(true)
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![
        Arc::new(ExtractIssuesJob::new()),
        Arc::new(GenerateRequirementJob::new()),
        Arc::new(RunDevelopmentJob::new()),
    ]
}


#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::agents::testing::ScriptedChecker;
    use crate::jobs::enqueue_job;
    use crate::models::JobStatus;
    use crate::store;

    struct AlwaysRetry;

    #[async_trait]
    impl JobHandler for AlwaysRetry {
        fn job_type(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, _state: Arc<AppState>, _job: Job) -> JobExecution {
            JobExecution::Retry {
                delay: Duration::ZERO,
                error: "try again".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn retries_turn_into_failure_after_max_attempts() {
        let state = testing::state_with(vec![], vec![], ScriptedChecker::always(true));
        let job = enqueue_job(state.store(), "flaky", json!({}), None).await.unwrap();
        let worker = Worker::new(state.clone(), vec![Arc::new(AlwaysRetry)], Duration::ZERO);

        for _ in 0..MAX_ATTEMPTS {
            assert!(worker.tick().await.unwrap());
        }
        assert!(!worker.tick().await.unwrap());

        let stored: Job = store::fetch(state.store(), &job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempts, MAX_ATTEMPTS);
        assert_eq!(stored.last_error.as_deref(), Some("try again"));
    }

    #[tokio::test]
    async fn unknown_job_types_are_left_alone() {
        let state = testing::state_with(vec![], vec![], ScriptedChecker::always(true));
        enqueue_job(state.store(), "something-else", json!({}), None)
            .await
            .unwrap();
        let worker = Worker::new(state, default_handlers(), Duration::ZERO);
        assert!(!worker.tick().await.unwrap());
    }
}
