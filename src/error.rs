use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fmt::Display;
use tracing::error;

use crate::clients::ClientError;
use crate::jobs::JobQueueError;
use crate::polling::SyncError;
use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

pub const CODE_VALIDATION: &str = "VALIDATION_ERROR";
pub const CODE_NOT_FOUND: &str = "NOT_FOUND";
pub const CODE_EXTERNAL_SERVICE: &str = "EXTERNAL_SERVICE_ERROR";
pub const CODE_CONFIGURATION: &str = "CONFIGURATION_ERROR";
pub const CODE_AI_GENERATION: &str = "AI_GENERATION_ERROR";
pub const CODE_RATE_LIMIT: &str = "RATE_LIMIT_ERROR";
pub const CODE_INTERNAL: &str = "INTERNAL_ERROR";

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Map<String, Value>,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Map::new(),
        }
    }

    fn with_detail(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, CODE_VALIDATION, message)
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::bad_request(message).with_detail("field", json!(field))
    }

    pub fn not_found(resource: &str, id: impl Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            CODE_NOT_FOUND,
            format!("{resource} not found: {id}"),
        )
        .with_detail("resource", json!(resource))
        .with_detail("id", json!(id.to_string()))
    }

    pub fn external_service(service: &str, message: impl Display, retryable: bool) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            CODE_EXTERNAL_SERVICE,
            format!("{service} error: {message}"),
        )
        .with_detail("service", json!(service))
        .with_detail("retryable", json!(retryable))
    }

    pub fn configuration(setting: &str) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            CODE_CONFIGURATION,
            format!("configuration required: {setting}"),
        )
        .with_detail("setting", json!(setting))
    }

    pub fn ai_generation(agent: &str, message: impl Display) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            CODE_AI_GENERATION,
            format!("AI generation failed ({agent}): {message}"),
        )
        .with_detail("agent", json!(agent))
    }

    pub fn rate_limited(service: &str, retry_after: Option<u64>) -> Self {
        let err = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            CODE_RATE_LIMIT,
            format!("{service} rate limit reached"),
        )
        .with_detail("service", json!(service));
        match retry_after {
            Some(seconds) => err.with_detail("retry_after", json!(seconds)),
            None => err,
        }
    }

    /// Logs the underlying error and hides it from the caller.
    pub fn internal<E: Display>(error: E) -> Self {
        error!(error = %error, "internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            CODE_INTERNAL,
            "internal server error",
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            error_code: self.code,
            details: self.details,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    error_code: &'static str,
    details: Map<String, Value>,
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        AppError::internal(value)
    }
}

impl From<ClientError> for AppError {
    fn from(value: ClientError) -> Self {
        match value {
            ClientError::NotConfigured { setting, .. } => AppError::configuration(setting),
            ClientError::RateLimited {
                service,
                retry_after,
            } => AppError::rate_limited(service, retry_after),
            ClientError::Status {
                service,
                status,
                message,
            } => AppError::external_service(
                service,
                format!("{status}: {message}"),
                status.is_server_error(),
            ),
            ClientError::Transport { service, source } => {
                AppError::external_service(service, source, true)
            }
            ClientError::InvalidResponse { service, message } => {
                AppError::external_service(service, message, false)
            }
        }
    }
}

impl From<JobQueueError> for AppError {
    fn from(value: JobQueueError) -> Self {
        match value {
            JobQueueError::Store(err) => err.into(),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(value: SyncError) -> Self {
        match value {
            SyncError::Chat(err) => err.into(),
            SyncError::Store(err) => err.into(),
            SyncError::MissingRoom(source_id) => {
                AppError::bad_request(format!("source {source_id} has no chat room attached"))
            }
            SyncError::SourceNotFound(source_id) => AppError::not_found("source", source_id),
            SyncError::NotChatRoom(source_id) => AppError::invalid_field(
                "source_id",
                format!("source {source_id} is not a chat room"),
            ),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(format!("{value:#}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}
