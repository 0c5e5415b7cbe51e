//! Timer-driven ingestion of chat-room messages into the document store.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};

use crate::clients::{ChatClient, ClientError};
use crate::models::{Message, Source, SourceType, SyncStatus};
use crate::store::{self, patch, DocumentStore, Query, Record, SortDirection, StoreError};

pub const MIN_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Chat(#[from] ClientError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("source {0} has no chat room attached")]
    MissingRoom(String),
    #[error("source {0} not found")]
    SourceNotFound(String),
    #[error("source {0} is not a chat room")]
    NotChatRoom(String),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PollingStatus {
    pub is_running: bool,
    pub interval_seconds: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub poll_count: u64,
    pub error_count: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceSyncResult {
    pub source_id: String,
    pub room_id: Option<String>,
    pub saved: usize,
    pub total_messages: u64,
    pub error: Option<String>,
}

impl SourceSyncResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SyncReport {
    pub sources: Vec<SourceSyncResult>,
}

impl SyncReport {
    pub fn saved(&self) -> usize {
        self.sources.iter().map(|result| result.saved).sum()
    }

    pub fn failed(&self) -> usize {
        self.sources.iter().filter(|result| !result.succeeded()).count()
    }
}

#[derive(Default)]
struct LoopState {
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
    last_poll_at: Option<DateTime<Utc>>,
    poll_count: u64,
    error_count: u64,
}

pub struct PollingService {
    store: Arc<dyn DocumentStore>,
    chat: Arc<dyn ChatClient>,
    interval_secs: AtomicU64,
    state: Mutex<LoopState>,
}

impl PollingService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        chat: Arc<dyn ChatClient>,
        interval_secs: u64,
    ) -> Self {
        Self {
            store,
            chat,
            interval_secs: AtomicU64::new(interval_secs.max(MIN_INTERVAL_SECS)),
            state: Mutex::new(LoopState::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().stop_tx.is_some()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.load(Ordering::Relaxed))
    }

    /// Takes effect at the next cycle boundary. Returns the effective interval.
    pub fn set_interval(&self, seconds: u64) -> u64 {
        let effective = seconds.max(MIN_INTERVAL_SECS);
        self.interval_secs.store(effective, Ordering::Relaxed);
        info!(interval_seconds = effective, "polling interval updated");
        effective
    }

    pub fn status(&self) -> PollingStatus {
        let state = self.lock_state();
        PollingStatus {
            is_running: state.stop_tx.is_some(),
            interval_seconds: self.interval_secs.load(Ordering::Relaxed),
            last_poll_at: state.last_poll_at,
            poll_count: state.poll_count,
            error_count: state.error_count,
        }
    }

    /// Returns `Ok(false)` when the loop was already running.
    pub fn start(self: &Arc<Self>) -> Result<bool, ClientError> {
        if !self.chat.is_configured() {
            return Err(ClientError::NotConfigured {
                service: "chatwork",
                setting: "CHATWORK_API_TOKEN",
            });
        }

        let mut state = self.lock_state();
        if state.stop_tx.is_some() {
            warn!("polling is already running");
            return Ok(false);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let service = Arc::clone(self);
        state.handle = Some(tokio::spawn(async move { service.run_loop(stop_rx).await }));
        state.stop_tx = Some(stop_tx);
        info!(interval_seconds = self.interval().as_secs(), "polling started");
        Ok(true)
    }

    /// Signals the loop and waits for it to finish the request it is in.
    /// Returns `false` when nothing was running.
    pub async fn stop(&self) -> bool {
        let (stop_tx, handle) = {
            let mut state = self.lock_state();
            (state.stop_tx.take(), state.handle.take())
        };
        let Some(stop_tx) = stop_tx else {
            return false;
        };

        let _ = stop_tx.send(true);
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "polling task ended abnormally");
            }
        }
        info!("polling stopped");
        true
    }

    /// One cycle right now, independent of the periodic loop.
    pub async fn sync_now(&self, source_id: Option<&str>) -> Result<SyncReport, SyncError> {
        match source_id {
            Some(id) => {
                let source: Source = store::fetch(self.store.as_ref(), id)
                    .await?
                    .ok_or_else(|| SyncError::SourceNotFound(id.to_string()))?;
                if source.source_type != SourceType::ChatworkRoom {
                    return Err(SyncError::NotChatRoom(source.id));
                }
                Ok(SyncReport {
                    sources: vec![self.sync_source(&source).await],
                })
            }
            None => self.sync_all(None).await,
        }
    }

    async fn run_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        loop {
            let failed = match self.sync_all(Some(&stop_rx)).await {
                Ok(report) => report.failed() > 0,
                Err(err) => {
                    error!(error = %err, "polling cycle failed");
                    true
                }
            };
            self.record_cycle(failed);

            if *stop_rx.borrow() {
                break;
            }
            let wait = self.interval();
            tokio::select! {
                _ = sleep(wait) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("polling loop exited");
    }

    async fn sync_all(
        &self,
        stop_rx: Option<&watch::Receiver<bool>>,
    ) -> Result<SyncReport, SyncError> {
        let query = Query::new().filter("type", SourceType::ChatworkRoom.as_str());
        let sources: Vec<Source> = store::list_as(self.store.as_ref(), &query).await?;
        if sources.is_empty() {
            debug!("no chat-room sources registered");
            return Ok(SyncReport::default());
        }

        info!(sources = sources.len(), "syncing chat rooms");
        let mut report = SyncReport::default();
        for source in &sources {
            if stop_rx.is_some_and(|rx| *rx.borrow()) {
                break;
            }
            report.sources.push(self.sync_source(source).await);
        }
        Ok(report)
    }

    /// Never fails: errors are recorded on the source's sync status.
    async fn sync_source(&self, source: &Source) -> SourceSyncResult {
        let room_id = source.room_id().map(str::to_string);
        match self.try_sync_source(source).await {
            Ok((saved, total_messages)) => SourceSyncResult {
                source_id: source.id.clone(),
                room_id,
                saved,
                total_messages,
                error: None,
            },
            Err(err) => {
                let message = err.to_string();
                error!(source_id = %source.id, error = %message, "source sync failed");
                let recorded = self
                    .store
                    .merge(
                        SyncStatus::COLLECTION,
                        &source.id,
                        patch(json!({
                            "source_id": source.id,
                            "room_id": room_id.clone().unwrap_or_default(),
                            "is_syncing": false,
                            "error": message,
                        })),
                    )
                    .await;
                if let Err(store_err) = recorded {
                    error!(source_id = %source.id, error = %store_err, "could not record sync error");
                }
                SourceSyncResult {
                    source_id: source.id.clone(),
                    room_id,
                    saved: 0,
                    total_messages: 0,
                    error: Some(message),
                }
            }
        }
    }

    async fn try_sync_source(&self, source: &Source) -> Result<(usize, u64), SyncError> {
        let room_id = source
            .room_id()
            .ok_or_else(|| SyncError::MissingRoom(source.id.clone()))?;
        let store = self.store.as_ref();

        store
            .merge(
                SyncStatus::COLLECTION,
                &source.id,
                patch(json!({
                    "source_id": source.id,
                    "room_id": room_id,
                    "is_syncing": true,
                })),
            )
            .await?;

        let raw_messages = self.chat.get_messages(room_id, true).await?;

        let mut saved = 0;
        for raw in &raw_messages {
            let message = Message::from_raw(raw, &source.id, room_id);
            if store::save_if_absent(store, &message).await? {
                saved += 1;
            }
        }

        let by_source = Query::new().filter("source_id", source.id.as_str());
        let total_messages = store.count(Message::COLLECTION, &by_source).await? as u64;
        let latest = by_source
            .order_by("send_time", SortDirection::Desc)
            .limit(1);
        let last_message_id = store::list_as::<Message>(store, &latest)
            .await?
            .into_iter()
            .next()
            .map(|message| message.id);

        let now = Utc::now();
        store
            .merge(
                SyncStatus::COLLECTION,
                &source.id,
                patch(json!({
                    "source_id": source.id,
                    "room_id": room_id,
                    "last_message_id": last_message_id,
                    "last_sync_at": now,
                    "total_messages": total_messages,
                    "is_syncing": false,
                    "error": null,
                })),
            )
            .await?;
        store
            .update(
                Source::COLLECTION,
                &source.id,
                patch(json!({
                    "message_count": total_messages,
                    "last_sync_at": now,
                    "updated_at": now,
                })),
            )
            .await?;

        info!(source_id = %source.id, room_id, saved, total_messages, "room synced");
        Ok((saved, total_messages))
    }

    fn record_cycle(&self, failed: bool) {
        let mut state = self.lock_state();
        state.poll_count += 1;
        state.last_poll_at = Some(Utc::now());
        if failed {
            state.error_count += 1;
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
