use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{build_http_client, error_for_response, ClientError, ModelClient, RetryPolicy};

const SERVICE: &str = "gemini";

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    retry: RetryPolicy,
}

impl GeminiClient {
    pub fn new(
        api_key: Option<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = build_http_client(timeout, HeaderMap::new())
            .map_err(|source| ClientError::Transport {
                service: SERVICE,
                source,
            })?;
        Ok(Self {
            http,
            api_key,
            model: model.into(),
            base_url: base_url.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content
            .parts
            .into_iter()
            .filter_map(|part| part.text)
            .collect();
        Some(text)
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ClientError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ClientError::NotConfigured {
                service: SERVICE,
                setting: "GEMINI_API_KEY",
            })?;
        let url = self.endpoint();
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let http = &self.http;
        let url = url.as_str();
        let body = &body;
        let response: GenerateResponse = self
            .retry
            .run("gemini.generate", move || async move {
                let response = http
                    .post(url)
                    .header("x-goog-api-key", api_key)
                    .json(body)
                    .send()
                    .await
                    .map_err(|source| ClientError::Transport {
                        service: SERVICE,
                        source,
                    })?;
                if !response.status().is_success() {
                    return Err(error_for_response(SERVICE, response).await);
                }
                response
                    .json::<GenerateResponse>()
                    .await
                    .map_err(|err| ClientError::InvalidResponse {
                        service: SERVICE,
                        message: err.to_string(),
                    })
            })
            .await?;

        let text = response
            .into_text()
            .ok_or_else(|| ClientError::InvalidResponse {
                service: SERVICE,
                message: "no candidates in response".to_string(),
            })?;
        debug!(model = %self.model, chars = text.len(), "model response received");
        Ok(text)
    }
}
