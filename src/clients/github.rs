use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Method, StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::{build_http_client, error_for_response, ClientError, RetryPolicy, VcsClient};

const SERVICE: &str = "github";

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueRef {
    pub number: i64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequestRef {
    pub number: i64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushSummary {
    pub branch: String,
    pub commits: Vec<String>,
}

#[derive(Deserialize)]
struct NumberedResource {
    number: i64,
    html_url: String,
}

#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    token: Option<String>,
    repo: Option<String>,
    base_url: String,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new(
        token: Option<String>,
        repo: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = build_http_client(timeout, headers).map_err(|source| {
            ClientError::Transport {
                service: SERVICE,
                source,
            }
        })?;
        Ok(Self {
            http,
            token,
            repo,
            base_url: base_url.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn credentials(&self) -> Result<(&str, &str), ClientError> {
        let token = self.token.as_deref().ok_or(ClientError::NotConfigured {
            service: SERVICE,
            setting: "GITHUB_TOKEN",
        })?;
        let repo = self.repo.as_deref().ok_or(ClientError::NotConfigured {
            service: SERVICE,
            setting: "GITHUB_REPO",
        })?;
        Ok((token, repo))
    }

    fn repo_url(&self, repo: &str, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}",
            self.base_url.trim_end_matches('/'),
            repo,
            suffix.trim_start_matches('/')
        )
    }

    /// Sends one request with retries. Statuses in `tolerated` are returned
    /// to the caller instead of being turned into errors.
    async fn call(
        &self,
        operation: &'static str,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
        tolerated: &[StatusCode],
    ) -> Result<(StatusCode, Value), ClientError> {
        let (token, _) = self.credentials()?;
        let http = &self.http;

        self.retry
            .run(operation, move || {
                let method = method.clone();
                async move {
                    let mut request = http.request(method, url).bearer_auth(token).query(query);
                    if let Some(body) = body {
                        request = request.json(body);
                    }
                    let response = request.send().await.map_err(|source| {
                        ClientError::Transport {
                            service: SERVICE,
                            source,
                        }
                    })?;

                    let status = response.status();
                    if status == StatusCode::FORBIDDEN && rate_limit_exhausted(response.headers()) {
                        return Err(ClientError::RateLimited {
                            service: SERVICE,
                            retry_after: None,
                        });
                    }
                    if !status.is_success() && !tolerated.contains(&status) {
                        return Err(error_for_response(SERVICE, response).await);
                    }
                    let text = response.text().await.map_err(|source| {
                        ClientError::Transport {
                            service: SERVICE,
                            source,
                        }
                    })?;
                    let value = if text.trim().is_empty() {
                        Value::Null
                    } else {
                        serde_json::from_str(&text).map_err(|err| {
                            ClientError::InvalidResponse {
                                service: SERVICE,
                                message: err.to_string(),
                            }
                        })?
                    };
                    Ok((status, value))
                }
            })
            .await
    }

    async fn existing_file_sha(
        &self,
        repo: &str,
        path: &str,
        branch: &str,
    ) -> Result<Option<String>, ClientError> {
        let url = self.repo_url(repo, &format!("contents/{}", encode_path(path)));
        let (status, body) = self
            .call(
                "github.get_contents",
                Method::GET,
                &url,
                &[("ref", branch)],
                None,
                &[StatusCode::NOT_FOUND],
            )
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(body.get("sha").and_then(Value::as_str).map(str::to_string))
    }
}

fn rate_limit_exhausted(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim() == "0")
        .unwrap_or(false)
}

fn encode_path(path: &str) -> String {
    path.trim_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn parse_resource(body: Value) -> Result<NumberedResource, ClientError> {
    serde_json::from_value(body).map_err(|err| ClientError::InvalidResponse {
        service: SERVICE,
        message: err.to_string(),
    })
}

#[async_trait]
impl VcsClient for GitHubClient {
    fn is_configured(&self) -> bool {
        self.token.is_some() && self.repo.is_some()
    }

    fn repo(&self) -> Option<&str> {
        self.repo.as_deref()
    }

    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<IssueRef, ClientError> {
        let (_, repo) = self.credentials()?;
        let url = self.repo_url(repo, "issues");
        let payload = json!({"title": title, "body": body, "labels": labels});
        let (_, response) = self
            .call("github.create_issue", Method::POST, &url, &[], Some(&payload), &[])
            .await?;
        let issue = parse_resource(response)?;
        info!(repo, number = issue.number, "created github issue");
        Ok(IssueRef {
            number: issue.number,
            url: issue.html_url,
        })
    }

    async fn create_branch(&self, name: &str, base: &str) -> Result<(), ClientError> {
        let (_, repo) = self.credentials()?;
        let ref_url = self.repo_url(repo, &format!("git/ref/heads/{}", encode_path(base)));
        let (_, base_ref) = self
            .call("github.get_ref", Method::GET, &ref_url, &[], None, &[])
            .await?;
        let sha = base_ref
            .pointer("/object/sha")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::InvalidResponse {
                service: SERVICE,
                message: format!("missing sha for branch {base}"),
            })?;

        let url = self.repo_url(repo, "git/refs");
        let payload = json!({"ref": format!("refs/heads/{name}"), "sha": sha});
        let (status, body) = self
            .call(
                "github.create_ref",
                Method::POST,
                &url,
                &[],
                Some(&payload),
                &[StatusCode::UNPROCESSABLE_ENTITY],
            )
            .await?;

        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if !message.contains("already exists") {
                return Err(ClientError::Status {
                    service: SERVICE,
                    status,
                    message,
                });
            }
            info!(repo, branch = name, "branch already exists");
        }
        Ok(())
    }

    async fn create_or_update_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
    ) -> Result<String, ClientError> {
        let (_, repo) = self.credentials()?;
        let existing = self.existing_file_sha(repo, path, branch).await?;

        let url = self.repo_url(repo, &format!("contents/{}", encode_path(path)));
        let mut payload = json!({
            "message": message,
            "content": STANDARD.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = existing {
            payload["sha"] = Value::String(sha);
        }

        let (_, response) = self
            .call("github.put_contents", Method::PUT, &url, &[], Some(&payload), &[])
            .await?;
        response
            .pointer("/commit/sha")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::InvalidResponse {
                service: SERVICE,
                message: format!("missing commit sha for {path}"),
            })
    }

    async fn create_pull_request(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequestRef, ClientError> {
        let (_, repo) = self.credentials()?;
        let url = self.repo_url(repo, "pulls");
        let payload = json!({"title": title, "body": body, "head": head, "base": base});
        let (_, response) = self
            .call("github.create_pull", Method::POST, &url, &[], Some(&payload), &[])
            .await?;
        let pull = parse_resource(response)?;
        info!(repo, number = pull.number, "opened pull request");
        Ok(PullRequestRef {
            number: pull.number,
            url: pull.html_url,
        })
    }
}
