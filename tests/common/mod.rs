use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use autodev::agents::{CheckOutcome, SyntaxChecker};
use autodev::clients::{
    ChatClient, ClientError, IssueRef, ModelClient, PullRequestRef, RawAccount, RawMessage,
    RoomInfo, VcsClient,
};
use autodev::config::AppConfig;
use autodev::models::GeneratedFile;
use autodev::routes;
use autodev::state::{AppState, Clients};
use autodev::storage::MemoryStorage;
use autodev::store::MemoryDocumentStore;
use autodev::{default_handlers, Worker};
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use http_body_util::BodyExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

/// Answers prompts from a queue; an empty queue is a model failure.
#[derive(Default)]
pub struct FakeModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeModel {
    pub async fn push(&self, response: impl Into<String>) {
        self.responses.lock().await.push_back(response.into());
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait]
impl ModelClient for FakeModel {
    async fn generate(&self, prompt: &str) -> Result<String, ClientError> {
        self.prompts.lock().await.push(prompt.to_string());
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ClientError::InvalidResponse {
                service: "fake-model",
                message: "no scripted response left".to_string(),
            })
    }
}

pub struct FakeChat {
    configured: bool,
    rooms: Mutex<HashMap<String, Vec<RawMessage>>>,
}

#[allow(dead_code)]
impl FakeChat {
    pub fn new(configured: bool) -> Self {
        Self {
            configured,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub async fn set_messages(&self, room_id: &str, messages: Vec<RawMessage>) {
        self.rooms
            .lock()
            .await
            .insert(room_id.to_string(), messages);
    }
}

#[async_trait]
impl ChatClient for FakeChat {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn list_rooms(&self) -> Result<Vec<RoomInfo>, ClientError> {
        let rooms = self.rooms.lock().await;
        let mut ids: Vec<&String> = rooms.keys().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|id| room(id, rooms.get(id).map_or(0, Vec::len)))
            .collect())
    }

    async fn get_room_info(&self, room_id: &str) -> Result<RoomInfo, ClientError> {
        let rooms = self.rooms.lock().await;
        rooms
            .get(room_id)
            .map(|messages| room(room_id, messages.len()))
            .ok_or_else(|| ClientError::Status {
                service: "chatwork",
                status: reqwest::StatusCode::NOT_FOUND,
                message: format!("room {room_id} not found"),
            })
    }

    async fn get_messages(
        &self,
        room_id: &str,
        _force: bool,
    ) -> Result<Vec<RawMessage>, ClientError> {
        Ok(self
            .rooms
            .lock()
            .await
            .get(room_id)
            .cloned()
            .unwrap_or_default())
    }
}

fn room(room_id: &str, messages: usize) -> RoomInfo {
    RoomInfo {
        room_id: room_id.parse().unwrap_or_default(),
        name: format!("Room {room_id}"),
        room_type: "group".to_string(),
        unread_num: 0,
        message_num: messages as i64,
        icon_path: None,
    }
}

#[allow(dead_code)]
pub fn chat_message(id: &str, author: &str, body: &str, send_time: i64) -> RawMessage {
    RawMessage {
        message_id: id.to_string(),
        account: RawAccount {
            account_id: 42,
            name: author.to_string(),
            avatar_image_url: None,
        },
        body: body.to_string(),
        send_time,
        update_time: 0,
    }
}

#[derive(Default)]
pub struct VcsCalls {
    pub issues: Vec<String>,
    pub branches: Vec<(String, String)>,
    pub files: Vec<(String, String)>,
    pub pulls: Vec<(String, String)>,
}

pub struct FakeVcs {
    configured: bool,
    pub calls: Mutex<VcsCalls>,
}

#[async_trait]
impl VcsClient for FakeVcs {
    fn is_configured(&self) -> bool {
        self.configured
    }

    fn repo(&self) -> Option<&str> {
        self.configured.then_some("acme/autodev-output")
    }

    async fn create_issue(
        &self,
        title: &str,
        _body: &str,
        _labels: &[String],
    ) -> Result<IssueRef, ClientError> {
        let mut calls = self.calls.lock().await;
        calls.issues.push(title.to_string());
        let number = calls.issues.len() as i64;
        Ok(IssueRef {
            number,
            url: format!("https://github.com/acme/autodev-output/issues/{number}"),
        })
    }

    async fn create_branch(&self, name: &str, base: &str) -> Result<(), ClientError> {
        self.calls
            .lock()
            .await
            .branches
            .push((name.to_string(), base.to_string()));
        Ok(())
    }

    async fn create_or_update_file(
        &self,
        path: &str,
        _content: &str,
        _message: &str,
        branch: &str,
    ) -> Result<String, ClientError> {
        let mut calls = self.calls.lock().await;
        calls.files.push((path.to_string(), branch.to_string()));
        Ok(format!("sha-{}", calls.files.len()))
    }

    async fn create_pull_request(
        &self,
        _title: &str,
        _body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequestRef, ClientError> {
        let mut calls = self.calls.lock().await;
        calls.pulls.push((head.to_string(), base.to_string()));
        let number = calls.pulls.len() as i64;
        Ok(PullRequestRef {
            number,
            url: format!("https://github.com/acme/autodev-output/pull/{number}"),
        })
    }
}

pub struct PassingChecker;

#[async_trait]
impl SyntaxChecker for PassingChecker {
    async fn check(&self, _file: &GeneratedFile) -> CheckOutcome {
        CheckOutcome::pass("ok")
    }
}

#[derive(Clone, Copy)]
pub struct Integrations {
    pub chat: bool,
    pub vcs: bool,
}

pub struct TestApp {
    pub state: AppState,
    pub model: Arc<FakeModel>,
    pub code_model: Arc<FakeModel>,
    pub chat: Arc<FakeChat>,
    pub vcs: Arc<FakeVcs>,
    router: Router,
    worker: Worker,
}

#[allow(dead_code)]
impl TestApp {
    /// Every integration configured.
    pub fn new() -> Self {
        Self::with_integrations(Integrations {
            chat: true,
            vcs: true,
        })
    }

    pub fn with_integrations(integrations: Integrations) -> Self {
        let model = Arc::new(FakeModel::default());
        let code_model = Arc::new(FakeModel::default());
        let chat = Arc::new(FakeChat::new(integrations.chat));
        let vcs = Arc::new(FakeVcs {
            configured: integrations.vcs,
            calls: Mutex::new(VcsCalls::default()),
        });

        let state = AppState::new(
            AppConfig::offline(),
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryStorage::new()),
            Clients {
                model: model.clone(),
                code_model: code_model.clone(),
                chat: chat.clone(),
                vcs: vcs.clone(),
                checker: Arc::new(PassingChecker),
            },
        );
        let router = routes::create_router(state.clone());
        let worker = Worker::new(Arc::new(state.clone()), default_handlers(), Duration::ZERO);

        Self {
            state,
            model,
            code_model,
            chat,
            vcs,
            router,
            worker,
        }
    }

    /// Runs queued jobs until none is left; returns how many ran.
    pub async fn run_jobs(&self) -> Result<usize> {
        let mut ran = 0;
        while self
            .worker
            .tick()
            .await
            .map_err(|err| anyhow!("worker tick failed: {err}"))?
        {
            ran += 1;
        }
        Ok(ran)
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload).await
    }

    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload).await
    }

    pub async fn post_empty(&self, path: &str) -> Result<hyper::Response<Body>> {
        self.send(Method::POST, path).await
    }

    pub async fn get(&self, path: &str) -> Result<hyper::Response<Body>> {
        self.send(Method::GET, path).await
    }

    pub async fn delete(&self, path: &str) -> Result<hyper::Response<Body>> {
        self.send(Method::DELETE, path).await
    }

    pub async fn upload_source(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        label: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n")
                .as_bytes(),
        );
        body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend(data);
        body.extend(b"\r\n");

        if let Some(label) = label {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(b"Content-Disposition: form-data; name=\"label\"\r\n\r\n");
            body.extend(label.as_bytes());
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/sources/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn send(&self, method: Method, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_json(response: hyper::Response<Body>) -> Result<serde_json::Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
