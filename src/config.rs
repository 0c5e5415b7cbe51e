use std::{env, time::Duration};

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_CHATWORK_API_URL: &str = "https://api.chatwork.com/v2";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

const PLACEHOLDER_VALUES: &[&str] = &[
    "your_chatwork_api_token_here",
    "your_github_token_here",
    "your_username/your_repo",
    "your_gemini_api_key_here",
];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub cors_allowed_origin: Option<String>,
    pub aws_endpoint_url: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_region: String,
    pub s3_bucket: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_code_model: String,
    pub gemini_api_url: String,
    pub chatwork_api_token: Option<String>,
    pub chatwork_api_url: String,
    pub github_token: Option<String>,
    pub github_repo: Option<String>,
    pub github_api_url: String,
    pub github_base_branch: String,
    pub http_timeout_seconds: u64,
    pub polling_interval_seconds: u64,
    pub polling_autostart: bool,
    pub worker_poll_interval_ms: u64,
    pub python_bin: String,
    pub node_bin: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let aws_endpoint_url = env::var("AWS_ENDPOINT_URL").ok();
        let aws_access_key_id = env::var("AWS_ACCESS_KEY_ID").ok();
        let aws_secret_access_key = env::var("AWS_SECRET_ACCESS_KEY").ok();
        let aws_region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let s3_bucket = env::var("S3_BUCKET")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let gemini_api_key = credential("GEMINI_API_KEY");
        let gemini_model =
            env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        let gemini_code_model =
            env::var("GEMINI_CODE_MODEL").unwrap_or_else(|_| gemini_model.clone());
        let gemini_api_url =
            env::var("GEMINI_API_URL").unwrap_or_else(|_| DEFAULT_GEMINI_API_URL.to_string());
        let chatwork_api_token = credential("CHATWORK_API_TOKEN");
        let chatwork_api_url =
            env::var("CHATWORK_API_URL").unwrap_or_else(|_| DEFAULT_CHATWORK_API_URL.to_string());
        let github_token = credential("GITHUB_TOKEN");
        let github_repo = credential("GITHUB_REPO");
        let github_api_url =
            env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_GITHUB_API_URL.to_string());
        let github_base_branch =
            env::var("GITHUB_BASE_BRANCH").unwrap_or_else(|_| "main".to_string());
        let http_timeout_seconds = env::var("HTTP_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "120".to_string())
            .parse()
            .context("HTTP_TIMEOUT_SECONDS must be an integer")?;
        let polling_interval_seconds = env::var("POLLING_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("POLLING_INTERVAL_SECONDS must be an integer")?;
        let polling_autostart = env::var("POLLING_AUTOSTART")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let worker_poll_interval_ms = env::var("WORKER_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .context("WORKER_POLL_INTERVAL_MS must be an integer")?;
        let python_bin = env::var("PYTHON_BIN").unwrap_or_else(|_| "python3".to_string());
        let node_bin = env::var("NODE_BIN").unwrap_or_else(|_| "node".to_string());

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            cors_allowed_origin,
            aws_endpoint_url,
            aws_access_key_id,
            aws_secret_access_key,
            aws_region,
            s3_bucket,
            gemini_api_key,
            gemini_model,
            gemini_code_model,
            gemini_api_url,
            chatwork_api_token,
            chatwork_api_url,
            github_token,
            github_repo,
            github_api_url,
            github_base_branch,
            http_timeout_seconds,
            polling_interval_seconds,
            polling_autostart,
            worker_poll_interval_ms,
            python_bin,
            node_bin,
        })
    }

    /// Defaults with no database, bucket or credentials: every collaborator
    /// falls back to its in-memory or unconfigured form.
    pub fn offline() -> Self {
        Self {
            database_url: None,
            database_max_pool_size: DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: None,
            gemini_api_key: None,
            gemini_model: "gemini-2.0-flash".to_string(),
            gemini_code_model: "gemini-2.0-flash".to_string(),
            gemini_api_url: DEFAULT_GEMINI_API_URL.to_string(),
            chatwork_api_token: None,
            chatwork_api_url: DEFAULT_CHATWORK_API_URL.to_string(),
            github_token: None,
            github_repo: None,
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            github_base_branch: "main".to_string(),
            http_timeout_seconds: 120,
            polling_interval_seconds: 60,
            polling_autostart: false,
            worker_poll_interval_ms: 1000,
            python_bin: "python3".to_string(),
            node_bin: "node".to_string(),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds.max(1))
    }

    pub fn redacted_database_url(&self) -> String {
        match &self.database_url {
            Some(url) => redact_database_url(url),
            None => "memory".to_string(),
        }
    }
}

fn credential(name: &str) -> Option<String> {
    env::var(name).ok().and_then(|value| sanitize_credential(&value))
}

fn sanitize_credential(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || PLACEHOLDER_VALUES.contains(&trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
