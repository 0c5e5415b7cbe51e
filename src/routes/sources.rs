use std::time::Duration;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::clients::{format_messages_for_extraction, RoomInfo};
use crate::error::{AppError, AppResult};
use crate::models::{
    new_id, ChatworkInfo, FileInfo, Message, Source, SourceType, SyncStatus, DEFAULT_PROJECT_ID,
};
use crate::state::AppState;
use crate::storage::{sha256_hex, source_object_key};
use crate::store::{self, Query as StoreQuery, Record, SortDirection};

const DEFAULT_MESSAGE_LIMIT: usize = 100;
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Deserialize)]
pub struct ListSourcesParams {
    pub project_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ManualSourceRequest {
    pub label: String,
    pub content: String,
    pub project_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatworkConnectRequest {
    pub room_id: String,
    pub room_name: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Deserialize)]
pub struct MessagesParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Serialize)]
pub struct MessagesResponse {
    pub source_id: String,
    pub message_count: usize,
    pub messages: Vec<Message>,
    pub content: String,
}

#[derive(Serialize)]
pub struct SourceContentResponse {
    pub source_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

pub async fn list_sources(
    State(state): State<AppState>,
    Query(params): Query<ListSourcesParams>,
) -> AppResult<Json<Vec<Source>>> {
    let project_id = params.project_id.as_deref().unwrap_or(DEFAULT_PROJECT_ID);
    let query = StoreQuery::new()
        .filter("project_id", project_id)
        .order_by("created_at", SortDirection::Desc);
    let sources: Vec<Source> = store::list_as(state.store(), &query).await?;
    Ok(Json(sources))
}

pub async fn get_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> AppResult<Json<Source>> {
    Ok(Json(load_source(&state, &source_id).await?))
}

pub async fn upload_source(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Source>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut label: Option<String> = None;
    let mut project_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(|n| n.to_string());
                content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some(key @ ("label" | "project_id")) => {
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid {key} field: {err}"))
                })?;
                let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
                if key == "label" {
                    label = value;
                } else {
                    project_id = value;
                }
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| AppError::invalid_field("file", "file field is required"))?;
    let file_name = file_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "upload.txt".to_string());
    let content_type = content_type.unwrap_or_else(|| {
        mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .to_string()
    });
    let file_type = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_else(|| "txt".to_string());

    let source_id = new_id();
    let storage_key = source_object_key(&source_id, &file_name);
    let line_count = String::from_utf8_lossy(&bytes).lines().count() as u64;
    let file = FileInfo {
        file_name: file_name.clone(),
        file_type,
        file_size: bytes.len() as u64,
        storage_key: storage_key.clone(),
        checksum: sha256_hex(&bytes),
    };

    state
        .storage
        .put_object(&storage_key, bytes, &content_type)
        .await?;

    let project_id = project_id.unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string());
    let mut source = Source::uploaded_file(
        source_id,
        &project_id,
        label.unwrap_or_else(|| file_name.clone()),
        file,
    );
    source.message_count = line_count;
    store::save(state.store(), &source).await?;

    info!(source_id = %source.id, file_name = %file_name, "uploaded source file");
    Ok((StatusCode::CREATED, Json(source)))
}

pub async fn create_manual_source(
    State(state): State<AppState>,
    Json(payload): Json<ManualSourceRequest>,
) -> AppResult<(StatusCode, Json<Source>)> {
    let label = payload.label.trim();
    if label.is_empty() {
        return Err(AppError::invalid_field("label", "label must not be empty"));
    }
    if payload.content.trim().is_empty() {
        return Err(AppError::invalid_field("content", "content must not be empty"));
    }

    let project_id = payload.project_id.as_deref().unwrap_or(DEFAULT_PROJECT_ID);
    let mut source = Source::manual(project_id, label.to_string());
    source.message_count = payload.content.lines().count() as u64;
    if let Some(key) = source.content_key() {
        state
            .storage
            .put_object(&key, payload.content.into_bytes(), TEXT_CONTENT_TYPE)
            .await?;
    }
    store::save(state.store(), &source).await?;

    Ok((StatusCode::CREATED, Json(source)))
}

pub async fn connect_chatwork_room(
    State(state): State<AppState>,
    Json(payload): Json<ChatworkConnectRequest>,
) -> AppResult<(StatusCode, Json<Source>)> {
    let room_id = payload.room_id.trim().to_string();
    if room_id.is_empty() {
        return Err(AppError::invalid_field("room_id", "room_id must not be empty"));
    }

    let mut room_name = payload.room_name.filter(|name| !name.trim().is_empty());
    let mut room_type = "group".to_string();
    if state.chat.is_configured() {
        match state.chat.get_room_info(&room_id).await {
            Ok(info) => {
                room_name = Some(info.name);
                if !info.room_type.is_empty() {
                    room_type = info.room_type;
                }
            }
            Err(err) => warn!(room_id = %room_id, error = %err, "room lookup failed"),
        }
    }

    let project_id = payload.project_id.as_deref().unwrap_or(DEFAULT_PROJECT_ID);
    let source = Source::chatwork_room(
        project_id,
        ChatworkInfo {
            room_name: room_name.unwrap_or_else(|| format!("Chatwork room {room_id}")),
            room_id,
            room_type,
        },
    );
    store::save(state.store(), &source).await?;

    info!(source_id = %source.id, room_id = ?source.room_id(), "connected chat room");
    Ok((StatusCode::CREATED, Json(source)))
}

pub async fn chatwork_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "configured": state.chat.is_configured() }))
}

pub async fn list_chatwork_rooms(State(state): State<AppState>) -> AppResult<Json<Value>> {
    if !state.chat.is_configured() {
        return Err(AppError::configuration("CHATWORK_API_TOKEN"));
    }
    let rooms: Vec<RoomInfo> = state.chat.list_rooms().await?;
    Ok(Json(json!({ "rooms": rooms })))
}

pub async fn list_source_messages(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
    Query(params): Query<MessagesParams>,
) -> AppResult<Json<MessagesResponse>> {
    let source = load_source(&state, &source_id).await?;
    if source.source_type != SourceType::ChatworkRoom {
        return Err(AppError::bad_request("this source is not a chat room"));
    }

    if params.refresh {
        if !state.chat.is_configured() {
            return Err(AppError::configuration("CHATWORK_API_TOKEN"));
        }
        let report = state.polling.sync_now(Some(&source_id)).await?;
        if let Some(err) = report.sources.iter().find_map(|result| result.error.as_deref()) {
            warn!(source_id = %source_id, error = err, "refresh before listing messages failed");
        }
    }

    let by_source = StoreQuery::new().filter("source_id", source_id.as_str());
    let message_count = state.store().count(Message::COLLECTION, &by_source).await?;
    let page = by_source
        .order_by("send_time", SortDirection::Desc)
        .limit(params.limit.unwrap_or(DEFAULT_MESSAGE_LIMIT))
        .offset(params.offset.unwrap_or(0));
    let messages: Vec<Message> = store::list_as(state.store(), &page).await?;

    Ok(Json(MessagesResponse {
        source_id,
        message_count,
        content: render_messages(&messages),
        messages,
    }))
}

pub async fn get_source_content(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> AppResult<Json<SourceContentResponse>> {
    let source = load_source(&state, &source_id).await?;
    let content = source_content(&state, &source).await?;

    let download_url = match &source.file {
        Some(file) => Some(
            state
                .storage
                .presign_get_object(&file.storage_key, DOWNLOAD_URL_TTL)
                .await?,
        ),
        None => None,
    };

    Ok(Json(SourceContentResponse {
        source_id,
        content,
        download_url,
    }))
}

pub async fn delete_source(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> AppResult<StatusCode> {
    let source = load_source(&state, &source_id).await?;

    if let Some(key) = source.content_key() {
        if let Err(err) = state.storage.delete_object(&key).await {
            warn!(source_id = %source_id, key = %key, error = %err, "failed to delete stored source content");
        }
    }
    state
        .store()
        .delete(SyncStatus::COLLECTION, &source_id)
        .await?;
    state.store().delete(Source::COLLECTION, &source_id).await?;

    info!(source_id = %source_id, "deleted source");
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn load_source(state: &AppState, source_id: &str) -> AppResult<Source> {
    store::fetch::<Source>(state.store(), source_id)
        .await?
        .ok_or_else(|| AppError::not_found("source", source_id))
}

/// The text a source contributes to issue extraction: stored chat messages
/// oldest first, or the uploaded or pasted text.
pub(crate) async fn source_content(state: &AppState, source: &Source) -> AppResult<String> {
    match source.content_key() {
        Some(key) => {
            let bytes = state.storage.get_object(&key).await?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        None => {
            let query = StoreQuery::new()
                .filter("source_id", source.id.as_str())
                .order_by("send_time", SortDirection::Desc)
                .limit(DEFAULT_MESSAGE_LIMIT);
            let mut messages: Vec<Message> = store::list_as(state.store(), &query).await?;
            messages.reverse();
            Ok(render_messages(&messages))
        }
    }
}

fn render_messages(messages: &[Message]) -> String {
    let raw: Vec<_> = messages.iter().map(Message::to_raw).collect();
    format_messages_for_extraction(&raw)
}
