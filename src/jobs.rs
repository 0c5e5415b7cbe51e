use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::models::{new_id, Job, JobStatus};
use crate::store::{self, patch, DocumentStore, Query, Record, SortDirection, StoreError};

pub const JOB_EXTRACT_ISSUES: &str = "extract-issues";
pub const JOB_GENERATE_REQUIREMENT: &str = "generate-requirement";
pub const JOB_RUN_DEVELOPMENT: &str = "run-development";

/// A job that asks for a retry after this many attempts is failed instead.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

pub async fn enqueue_job(
    store: &dyn DocumentStore,
    job_type: &str,
    payload: Value,
    run_after: Option<DateTime<Utc>>,
) -> JobQueueResult<Job> {
    let now = Utc::now();
    let job = Job {
        id: new_id(),
        job_type: job_type.to_string(),
        payload,
        status: JobStatus::Queued,
        attempts: 0,
        run_after: run_after.unwrap_or(now),
        last_error: None,
        created_at: now,
        updated_at: now,
    };
    store::save(store, &job).await?;
    Ok(job)
}

/// Claims the oldest runnable job of the given types. The claim only lands
/// while the job is still queued, so a job is handed to one worker at most.
pub async fn reserve_job(
    store: &dyn DocumentStore,
    job_types: &[&str],
) -> JobQueueResult<Option<Job>> {
    let now = Utc::now();
    let queued_filter = Query::new().filter("status", JobStatus::Queued.as_str());
    let candidates: Vec<Job> = store::list_as(
        store,
        &queued_filter
            .clone()
            .order_by("run_after", SortDirection::Asc),
    )
    .await?;

    for job in candidates
        .into_iter()
        .filter(|job| job.run_after <= now && job_types.contains(&job.job_type.as_str()))
    {
        let claimed = store
            .update_if(
                Job::COLLECTION,
                &job.id,
                &queued_filter,
                patch(json!({
                    "status": JobStatus::Processing,
                    "attempts": job.attempts + 1,
                    "updated_at": now,
                })),
            )
            .await?;
        if let Some(doc) = claimed {
            return Ok(Some(serde_json::from_value(doc).map_err(StoreError::from)?));
        }
        debug!(job_id = %job.id, "job claimed by another worker");
    }
    Ok(None)
}

pub async fn mark_job_succeeded(store: &dyn DocumentStore, job_id: &str) -> JobQueueResult<()> {
    store
        .update(
            Job::COLLECTION,
            job_id,
            patch(json!({
                "status": JobStatus::Succeeded,
                "last_error": null,
                "updated_at": Utc::now(),
            })),
        )
        .await?;
    Ok(())
}

pub async fn retry_job_after(
    store: &dyn DocumentStore,
    job_id: &str,
    delay: Duration,
    error_message: &str,
) -> JobQueueResult<()> {
    let next_run = Utc::now()
        + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

    store
        .update(
            Job::COLLECTION,
            job_id,
            patch(json!({
                "status": JobStatus::Queued,
                "run_after": next_run,
                "last_error": error_message,
                "updated_at": Utc::now(),
            })),
        )
        .await?;
    Ok(())
}

pub async fn mark_job_failed(
    store: &dyn DocumentStore,
    job_id: &str,
    error_message: &str,
) -> JobQueueResult<()> {
    store
        .update(
            Job::COLLECTION,
            job_id,
            patch(json!({
                "status": JobStatus::Failed,
                "last_error": error_message,
                "updated_at": Utc::now(),
            })),
        )
        .await?;
    Ok(())
}

/// Deletes succeeded and failed jobs, returning how many were removed.
pub async fn purge_finished_jobs(store: &dyn DocumentStore) -> JobQueueResult<usize> {
    let mut removed = 0;
    for status in [JobStatus::Succeeded, JobStatus::Failed] {
        let query = Query::new().filter("status", status.as_str());
        for job in store::list_as::<Job>(store, &query).await? {
            if store.delete(Job::COLLECTION, &job.id).await? {
                removed += 1;
            }
        }
    }
    Ok(removed)
}
