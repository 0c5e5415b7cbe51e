use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header::HeaderMap, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::{build_http_client, error_for_response, ChatClient, ClientError, RetryPolicy};

const SERVICE: &str = "chatwork";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomInfo {
    pub room_id: i64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub room_type: String,
    #[serde(default)]
    pub unread_num: i64,
    #[serde(default)]
    pub message_num: i64,
    #[serde(default)]
    pub icon_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawAccount {
    pub account_id: i64,
    pub name: String,
    #[serde(default)]
    pub avatar_image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawMessage {
    pub message_id: String,
    pub account: RawAccount,
    pub body: String,
    /// Unix seconds.
    pub send_time: i64,
    #[serde(default)]
    pub update_time: i64,
}

impl RawMessage {
    pub fn sent_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.send_time, 0).unwrap_or_default()
    }
}

/// Renders messages as `[YYYY-MM-DD HH:MM] name:` blocks for the extractor prompt.
pub fn format_messages_for_extraction(messages: &[RawMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        out.push_str(&format!(
            "[{}] {}:\n{}\n\n",
            message.sent_at().format("%Y-%m-%d %H:%M"),
            message.account.name,
            message.body
        ));
    }
    out
}

#[derive(Clone)]
pub struct ChatworkClient {
    http: reqwest::Client,
    token: Option<String>,
    base_url: String,
    retry: RetryPolicy,
}

impl ChatworkClient {
    pub fn new(
        token: Option<String>,
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
            token,
            base_url: base_url.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn token(&self) -> Result<&str, ClientError> {
        self.token.as_deref().ok_or(ClientError::NotConfigured {
            service: SERVICE,
            setting: "CHATWORK_API_TOKEN",
        })
    }

    /// GET against the API; a 204 response decodes as `None`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, ClientError> {
        let token = self.token()?;
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let http = &self.http;
        let url = url.as_str();

        self.retry
            .run("chatwork.get", move || async move {
                let response = http
                    .get(url)
                    .header("X-ChatWorkToken", token)
                    .query(query)
                    .send()
                    .await
                    .map_err(|source| ClientError::Transport {
                        service: SERVICE,
                        source,
                    })?;
                let status = response.status();
                if status == StatusCode::NO_CONTENT {
                    return Ok(None);
                }
                if !status.is_success() {
                    return Err(error_for_response(SERVICE, response).await);
                }
                response
                    .json::<T>()
                    .await
                    .map(Some)
                    .map_err(|err| ClientError::InvalidResponse {
                        service: SERVICE,
                        message: err.to_string(),
                    })
            })
            .await
    }
}

#[async_trait]
impl ChatClient for ChatworkClient {
    fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    async fn list_rooms(&self) -> Result<Vec<RoomInfo>, ClientError> {
        Ok(self.get_json("/rooms", &[]).await?.unwrap_or_default())
    }

    async fn get_room_info(&self, room_id: &str) -> Result<RoomInfo, ClientError> {
        self.get_json(&format!("/rooms/{room_id}"), &[])
            .await?
            .ok_or_else(|| ClientError::InvalidResponse {
                service: SERVICE,
                message: format!("empty room info for {room_id}"),
            })
    }

    async fn get_messages(
        &self,
        room_id: &str,
        force: bool,
    ) -> Result<Vec<RawMessage>, ClientError> {
        let force = if force { "1" } else { "0" };
        let messages: Vec<RawMessage> = self
            .get_json(&format!("/rooms/{room_id}/messages"), &[("force", force)])
            .await?
            .unwrap_or_default();
        debug!(room_id, count = messages.len(), "fetched chatwork messages");
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fast_retry;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> ChatworkClient {
        ChatworkClient::new(Some("token-1".into()), base_url, Duration::from_secs(5))
            .unwrap()
            .with_retry_policy(fast_retry())
    }

    fn message_json(id: &str, send_time: i64) -> serde_json::Value {
        json!({
            "message_id": id,
            "account": {"account_id": 42, "name": "Alice", "avatar_image_url": null},
            "body": "exporting reports takes 2 hours manually",
            "send_time": send_time,
            "update_time": 0
        })
    }

    #[tokio::test]
    async fn fetches_latest_messages_with_force() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rooms/123/messages"))
            .and(query_param("force", "1"))
            .and(header("X-ChatWorkToken", "token-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([message_json("m1", 1704103200)])),
            )
            .mount(&server)
            .await;

        let messages = client(&server.uri()).get_messages("123", true).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, "m1");
        assert_eq!(messages[0].account.name, "Alice");
    }

    #[tokio::test]
    async fn no_content_means_no_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rooms/123/messages"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let messages = client(&server.uri()).get_messages("123", false).await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_surfaces_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rooms"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "300"))
            .mount(&server)
            .await;

        let err = client(&server.uri()).list_rooms().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::RateLimited {
                retry_after: Some(300),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rooms/9"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"errors": ["Invalid API token"]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server.uri()).get_room_info("9").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Status {
                status: StatusCode::UNAUTHORIZED,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unconfigured_client_reports_the_setting() {
        let client = ChatworkClient::new(None, "http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        assert!(!client.is_configured());
        let err = client.list_rooms().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::NotConfigured {
                setting: "CHATWORK_API_TOKEN",
                ..
            }
        ));
    }

    #[test]
    fn formats_messages_for_extraction() {
        let messages: Vec<RawMessage> =
            serde_json::from_value(json!([message_json("m1", 1704103200)])).unwrap();
        let formatted = format_messages_for_extraction(&messages);
        assert_eq!(
            formatted,
            "[2024-01-01 10:00] Alice:\nexporting reports takes 2 hours manually\n\n"
        );
    }
}
