use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::models::{Source, SourceType, SyncStatus};
use crate::polling::SyncReport;
use crate::routes::sources::load_source;
use crate::state::AppState;
use crate::store::{self, Query, SortDirection};

#[derive(Deserialize)]
pub struct PollingConfigRequest {
    pub interval_seconds: u64,
}

#[derive(Deserialize, Default)]
pub struct SyncRequest {
    pub source_id: Option<String>,
}

#[derive(Serialize)]
pub struct SourceSyncState {
    pub source_id: String,
    pub label: String,
    pub room_id: Option<String>,
    pub sync_status: Option<SyncStatus>,
}

#[derive(Serialize)]
pub struct SyncResponse {
    pub message: &'static str,
    pub source_id: Option<String>,
    pub report: SyncReport,
}

pub async fn polling_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "chatwork_configured": state.chat.is_configured(),
        "polling": state.polling.status(),
    }))
}

pub async fn start_polling(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let started = state.polling.start()?;
    let message = if started {
        "polling started"
    } else {
        "polling is already running"
    };
    Ok(Json(json!({ "message": message, "status": state.polling.status() })))
}

pub async fn stop_polling(State(state): State<AppState>) -> Json<Value> {
    let message = if state.polling.stop().await {
        "polling stopped"
    } else {
        "polling is not running"
    };
    Json(json!({ "message": message, "status": state.polling.status() }))
}

pub async fn configure_polling(
    State(state): State<AppState>,
    Json(payload): Json<PollingConfigRequest>,
) -> Json<Value> {
    let effective = state.polling.set_interval(payload.interval_seconds);
    Json(json!({
        "message": format!("polling interval set to {effective} seconds"),
        "status": state.polling.status(),
    }))
}

/// Runs one cycle whether or not the periodic loop is on.
pub async fn sync_now(
    State(state): State<AppState>,
    payload: Option<Json<SyncRequest>>,
) -> AppResult<Json<SyncResponse>> {
    if !state.chat.is_configured() {
        return Err(AppError::configuration("CHATWORK_API_TOKEN"));
    }
    let Json(request) = payload.unwrap_or_default();
    let report = state.polling.sync_now(request.source_id.as_deref()).await?;
    Ok(Json(SyncResponse {
        message: "sync completed",
        source_id: request.source_id,
        report,
    }))
}

pub async fn list_sync_status(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let query = Query::new()
        .filter("type", SourceType::ChatworkRoom.as_str())
        .order_by("created_at", SortDirection::Asc);
    let sources: Vec<Source> = store::list_as(state.store(), &query).await?;

    let mut result = Vec::with_capacity(sources.len());
    for source in sources {
        result.push(sync_state(&state, source).await?);
    }
    Ok(Json(json!({ "sources": result })))
}

pub async fn get_sync_status(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> AppResult<Json<SourceSyncState>> {
    let source = load_source(&state, &source_id).await?;
    Ok(Json(sync_state(&state, source).await?))
}

async fn sync_state(state: &AppState, source: Source) -> AppResult<SourceSyncState> {
    let sync_status = store::fetch::<SyncStatus>(state.store(), &source.id).await?;
    Ok(SourceSyncState {
        room_id: source.room_id().map(str::to_string),
        source_id: source.id,
        label: source.label,
        sync_status,
    })
}
