//! Outbound HTTP collaborators: the generative model, the chat platform and
//! the source-control host. Each sits behind a trait so handlers and
//! background loops can be driven by fakes.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use reqwest::{
    header::{HeaderMap, RETRY_AFTER},
    StatusCode,
};
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::models::GeneratedFile;

pub mod chatwork;
pub mod gemini;
pub mod github;

pub use chatwork::{format_messages_for_extraction, ChatworkClient, RawAccount, RawMessage, RoomInfo};
pub use gemini::GeminiClient;
pub use github::{GitHubClient, IssueRef, PullRequestRef, PushSummary};

const USER_AGENT: &str = concat!("autodev/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service} is not configured (set {setting})")]
    NotConfigured {
        service: &'static str,
        setting: &'static str,
    },
    #[error("{service} rate limit reached")]
    RateLimited {
        service: &'static str,
        retry_after: Option<u64>,
    },
    #[error("{service} returned {status}: {message}")]
    Status {
        service: &'static str,
        status: StatusCode,
        message: String,
    },
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{service} returned an unexpected response: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::RateLimited { .. } | ClientError::Transport { .. } => true,
            ClientError::Status { status, .. } => status.is_server_error(),
            ClientError::NotConfigured { .. } | ClientError::InvalidResponse { .. } => false,
        }
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync + 'static {
    async fn generate(&self, prompt: &str) -> Result<String, ClientError>;
}

#[async_trait]
pub trait ChatClient: Send + Sync + 'static {
    fn is_configured(&self) -> bool;

    async fn list_rooms(&self) -> Result<Vec<RoomInfo>, ClientError>;

    async fn get_room_info(&self, room_id: &str) -> Result<RoomInfo, ClientError>;

    /// `force` asks for the latest page instead of only unread messages.
    async fn get_messages(&self, room_id: &str, force: bool)
        -> Result<Vec<RawMessage>, ClientError>;
}

#[async_trait]
pub trait VcsClient: Send + Sync + 'static {
    fn is_configured(&self) -> bool;

    fn repo(&self) -> Option<&str>;

    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<IssueRef, ClientError>;

    async fn create_branch(&self, name: &str, base: &str) -> Result<(), ClientError>;

    /// Returns the sha of the commit that wrote the file.
    async fn create_or_update_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
    ) -> Result<String, ClientError>;

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequestRef, ClientError>;
}

/// Creates `branch` from `base` and commits every file onto it, one commit per file.
pub async fn push_generated_files(
    vcs: &dyn VcsClient,
    files: &[GeneratedFile],
    branch: &str,
    message: &str,
    base: &str,
) -> Result<PushSummary, ClientError> {
    vcs.create_branch(branch, base).await?;

    let mut commits = Vec::with_capacity(files.len());
    for file in files {
        let commit_message = format!("{message}: {}", file.path);
        let sha = vcs
            .create_or_update_file(&file.path, &file.content, &commit_message, branch)
            .await?;
        commits.push(sha);
    }

    Ok(PushSummary {
        branch: branch.to_string(),
        commits,
    })
}

/// Backoff for transient failures of outbound calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_rate_limit_wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(delay) = self.delay_before_retry(&err, attempt) else {
                        return Err(err);
                    };
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient error"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn delay_before_retry(&self, err: &ClientError, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts || !err.is_retryable() {
            return None;
        }
        let backoff = self.backoff(attempt);
        match err {
            ClientError::RateLimited {
                retry_after: Some(seconds),
                ..
            } => {
                let hinted = Duration::from_secs(*seconds);
                (hinted <= self.max_rate_limit_wait).then(|| hinted.max(backoff))
            }
            _ => Some(backoff),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base = self.base_delay.saturating_mul(1u32 << exponent);
        let jitter = rand::thread_rng().gen_range(0.8..=1.2);
        base.mul_f64(jitter)
    }
}

pub(crate) fn build_http_client(
    timeout: Duration,
    headers: HeaderMap,
) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(timeout)
        .build()
}

/// Converts a non-success response into the matching error.
pub(crate) async fn error_for_response(
    service: &'static str,
    response: reqwest::Response,
) -> ClientError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ClientError::RateLimited {
            service,
            retry_after: retry_after_hint(response.headers()),
        };
    }
    let body = response.text().await.unwrap_or_default();
    ClientError::Status {
        service,
        status,
        message: summarize_body(&body),
    }
}

fn retry_after_hint(headers: &HeaderMap) -> Option<u64> {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

    if let Some(seconds) = header(RETRY_AFTER.as_str()).and_then(|v| v.trim().parse().ok()) {
        return Some(seconds);
    }
    header("x-ratelimit-reset")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|reset| u64::try_from(reset - Utc::now().timestamp()).unwrap_or(0))
}

fn summarize_body(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .or_else(|| value.pointer("/error/message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    value
                        .get("errors")
                        .map(|errors| errors.to_string())
                })
        })
        .unwrap_or_else(|| body.trim().to_string());
    message.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

#[cfg(test)]
pub(crate) fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        ..RetryPolicy::default()
    }
}
