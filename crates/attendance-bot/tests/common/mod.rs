//! Shared fakes for integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use attendance_bot::error::{LedgerError, SlackError};
use attendance_bot::sheets::Ledger;
use attendance_bot::slack::{ChatClient, ChatMessage};
use attendance_core::{ActorProfile, AttendanceEvent, LedgerRow};
use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
};
use futures::{SinkExt, StreamExt};
use reqwest::StatusCode as ReqwestStatus;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

pub const PRIVATE_KEY: &str = include_str!("../fixtures/service_account_key.pem");
pub const PUBLIC_KEY: &str = include_str!("../fixtures/service_account_pub.pem");
pub const CLIENT_EMAIL: &str = "attendance@test-project.iam.gserviceaccount.com";
pub const SPREADSHEET_ID: &str = "sheet-1";
pub const CHANNEL: &str = "C_ATTEND";

/// 2024-03-01T08:30:00Z
pub const MORNING_TS: &str = "1709281800.000200";
/// 2024-03-01T17:45:00Z
pub const EVENING_TS: &str = "1709315100.000000";
/// 2024-03-01T22:00:00Z
pub const LATE_TS: &str = "1709330400.000000";

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Polls `check` until it returns true or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub fn message(text: &str, ts: &str) -> ChatMessage {
    ChatMessage {
        channel: CHANNEL.to_string(),
        text: text.to_string(),
        user: "U1".to_string(),
        ts: ts.to_string(),
    }
}

// ---------------------------------------------------------------------------
// In-memory collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub channel: String,
    pub thread_ts: String,
    pub text: String,
}

/// Chat client with canned profiles that records replies.
#[derive(Default)]
pub struct FakeChat {
    pub profiles: Mutex<HashMap<String, ActorProfile>>,
    pub replies: Mutex<Vec<Reply>>,
    pub fail_replies: Mutex<bool>,
}

impl FakeChat {
    pub fn with_user(id: &str, name: &str, real_name: Option<&str>) -> Arc<Self> {
        let chat = Self::default();
        chat.profiles.lock().unwrap().insert(
            id.to_string(),
            ActorProfile {
                id: id.to_string(),
                name: name.to_string(),
                real_name: real_name.map(str::to_string),
            },
        );
        Arc::new(chat)
    }

    pub fn replies(&self) -> Vec<Reply> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for FakeChat {
    async fn user_profile(&self, user_id: &str) -> Result<ActorProfile, SlackError> {
        self.profiles
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .ok_or_else(|| SlackError::Api {
                method: "users.info",
                code: "user_not_found".to_string(),
            })
    }

    async fn reply_in_thread(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<(), SlackError> {
        if *self.fail_replies.lock().unwrap() {
            return Err(SlackError::Api {
                method: "chat.postMessage",
                code: "channel_not_found".to_string(),
            });
        }
        self.replies.lock().unwrap().push(Reply {
            channel: channel.to_string(),
            thread_ts: thread_ts.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Ledger that keeps rows in memory and can fail a number of times first.
#[derive(Default)]
pub struct MemoryLedger {
    pub rows: Mutex<Vec<LedgerRow>>,
    pub failures_left: Mutex<u32>,
    pub calls: Mutex<u32>,
    /// Time each append takes.
    pub delay: Mutex<Duration>,
}

impl MemoryLedger {
    pub fn failing(times: u32) -> Arc<Self> {
        let ledger = Self::default();
        *ledger.failures_left.lock().unwrap() = times;
        Arc::new(ledger)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        let ledger = Self::default();
        *ledger.delay.lock().unwrap() = delay;
        Arc::new(ledger)
    }

    pub fn rows(&self) -> Vec<LedgerRow> {
        self.rows.lock().unwrap().clone()
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record_attendance(
        &self,
        event: &AttendanceEvent,
        display_name: &str,
    ) -> Result<(), LedgerError> {
        *self.calls.lock().unwrap() += 1;
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut failures = self.failures_left.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(LedgerError::Api {
                status: ReqwestStatus::SERVICE_UNAVAILABLE,
                body: "backend unavailable".to_string(),
            });
        }

        self.rows
            .lock()
            .unwrap()
            .push(LedgerRow::new(event, display_name));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fake Google endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Value,
}

/// In-memory spreadsheet plus OAuth token endpoint.
#[derive(Default)]
pub struct FakeGoogle {
    pub sheets: Mutex<Vec<(String, Vec<Vec<String>>)>>,
    pub issued_tokens: Mutex<Vec<String>>,
    pub revoked: Mutex<Vec<String>>,
    pub assertions: Mutex<Vec<String>>,
    pub requests: Mutex<Vec<RecordedRequest>>,
    pub fail_appends: Mutex<bool>,
}

impl FakeGoogle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pre-creates a sheet with the given rows.
    pub fn with_sheet(self: Arc<Self>, title: &str, rows: Vec<Vec<&str>>) -> Arc<Self> {
        self.sheets.lock().unwrap().push((
            title.to_string(),
            rows.into_iter()
                .map(|r| r.into_iter().map(str::to_string).collect())
                .collect(),
        ));
        self
    }

    pub fn rows(&self, title: &str) -> Option<Vec<Vec<String>>> {
        self.sheets
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| t == title)
            .map(|(_, rows)| rows.clone())
    }

    pub fn token_requests(&self) -> usize {
        self.issued_tokens.lock().unwrap().len()
    }

    /// Makes every token issued so far invalid.
    pub fn revoke_all(&self) {
        let issued = self.issued_tokens.lock().unwrap().clone();
        self.revoked.lock().unwrap().extend(issued);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn start(self: &Arc<Self>) -> String {
        serve(
            Router::new()
                .route("/token", post(token_handler))
                .fallback(google_handler)
                .with_state(self.clone()),
        )
        .await
    }
}

fn decode_path(uri: &Uri) -> String {
    uri.path().replace("%21", "!").replace("%3A", ":").replace("%27", "'")
}

async fn token_handler(
    State(google): State<Arc<FakeGoogle>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if form.get("grant_type").map(String::as_str)
        != Some("urn:ietf:params:oauth:grant-type:jwt-bearer")
    {
        return (StatusCode::BAD_REQUEST, "bad grant").into_response();
    }
    google
        .assertions
        .lock()
        .unwrap()
        .push(form.get("assertion").cloned().unwrap_or_default());
    let mut issued = google.issued_tokens.lock().unwrap();
    let token = format!("tok-{}", issued.len() + 1);
    issued.push(token.clone());
    Json(json!({
        "access_token": token,
        "expires_in": 3599,
        "token_type": "Bearer"
    }))
    .into_response()
}

async fn google_handler(
    State(google): State<Arc<FakeGoogle>>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = decode_path(&uri);

    let bearer = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);
    let authorized = match &bearer {
        Some(token) => {
            google.issued_tokens.lock().unwrap().contains(token)
                && !google.revoked.lock().unwrap().contains(token)
        }
        None => false,
    };
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
    }

    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    google.requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        query: query.clone(),
        body: body.clone(),
    });

    let base = format!("/v4/spreadsheets/{SPREADSHEET_ID}");
    let Some(rest) = path.strip_prefix(&base) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut sheets = google.sheets.lock().unwrap();
    match (method, rest) {
        (Method::GET, "") => {
            let sheets: Vec<Value> = sheets
                .iter()
                .enumerate()
                .map(|(i, (title, _))| json!({ "properties": { "sheetId": i, "title": title } }))
                .collect();
            Json(json!({ "sheets": sheets })).into_response()
        }
        (Method::POST, ":batchUpdate") => {
            let title = body["requests"][0]["addSheet"]["properties"]["title"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            if sheets.iter().any(|(t, _)| *t == title) {
                return (StatusCode::BAD_REQUEST, "sheet already exists").into_response();
            }
            sheets.push((title, Vec::new()));
            Json(json!({ "replies": [{ "addSheet": {} }] })).into_response()
        }
        (method, rest) => {
            let Some(range) = rest.strip_prefix("/values/") else {
                return StatusCode::NOT_FOUND.into_response();
            };
            let (range, append) = match range.strip_suffix(":append") {
                Some(r) => (r, true),
                None => (range, false),
            };
            let Some((title, cells)) = range.split_once('!') else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            let Some((_, rows)) = sheets.iter_mut().find(|(t, _)| t == title) else {
                return (StatusCode::BAD_REQUEST, "Unable to parse range").into_response();
            };
            let incoming: Vec<Vec<String>> = body["values"]
                .as_array()
                .map(|rows| {
                    rows.iter()
                        .map(|row| {
                            row.as_array()
                                .map(|cells| {
                                    cells
                                        .iter()
                                        .map(|c| c.as_str().unwrap_or_default().to_string())
                                        .collect()
                                })
                                .unwrap_or_default()
                        })
                        .collect()
                })
                .unwrap_or_default();

            match (method, append, cells) {
                (Method::GET, false, "1:1") => match rows.first() {
                    Some(header) => Json(json!({
                        "range": format!("{title}!A1:Z1"),
                        "majorDimension": "ROWS",
                        "values": [header]
                    }))
                    .into_response(),
                    None => Json(json!({
                        "range": format!("{title}!A1:Z1"),
                        "majorDimension": "ROWS"
                    }))
                    .into_response(),
                },
                (Method::PUT, false, "A1") => {
                    if rows.is_empty() {
                        rows.push(Vec::new());
                    }
                    rows[0] = incoming.into_iter().next().unwrap_or_default();
                    Json(json!({ "updatedRows": 1 })).into_response()
                }
                (Method::POST, true, "A1") => {
                    if *google.fail_appends.lock().unwrap() {
                        return (StatusCode::SERVICE_UNAVAILABLE, "backend unavailable")
                            .into_response();
                    }
                    let count = incoming.len();
                    rows.extend(incoming);
                    Json(json!({ "updates": { "updatedRows": count } })).into_response()
                }
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fake Slack Web API
// ---------------------------------------------------------------------------

/// Slack Web API stand-in serving `users.info` and `chat.postMessage`.
#[derive(Default)]
pub struct FakeSlack {
    pub users: Mutex<HashMap<String, Value>>,
    pub posted: Mutex<Vec<Value>>,
    pub auth_headers: Mutex<Vec<String>>,
}

impl FakeSlack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_user(self: Arc<Self>, id: &str, user: Value) -> Arc<Self> {
        self.users.lock().unwrap().insert(id.to_string(), user);
        self
    }

    pub fn posted(&self) -> Vec<Value> {
        self.posted.lock().unwrap().clone()
    }

    pub async fn start(self: &Arc<Self>) -> String {
        serve(Router::new().fallback(slack_handler).with_state(self.clone())).await
    }
}

async fn slack_handler(
    State(slack): State<Arc<FakeSlack>>,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(auth) = headers.get("authorization").and_then(|h| h.to_str().ok()) {
        slack.auth_headers.lock().unwrap().push(auth.to_string());
    }

    match uri.path() {
        "/users.info" => {
            let id = query.get("user").cloned().unwrap_or_default();
            match slack.users.lock().unwrap().get(&id) {
                Some(user) => Json(json!({ "ok": true, "user": user })).into_response(),
                None => Json(json!({ "ok": false, "error": "user_not_found" })).into_response(),
            }
        }
        "/chat.postMessage" => {
            let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            if payload["channel"].as_str() == Some("C_MISSING") {
                return Json(json!({ "ok": false, "error": "channel_not_found" })).into_response();
            }
            slack.posted.lock().unwrap().push(payload);
            Json(json!({ "ok": true, "ts": "1709281801.000100" })).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Fake Socket Mode endpoint
// ---------------------------------------------------------------------------

pub const APP_TOKEN: &str = "xapp-test";

/// `apps.connections.open` plus a WebSocket server that plays one scripted
/// list of frames per connection and records what the client sends back.
///
/// A connection with no scripted frames is dropped before the handshake.
#[derive(Default)]
pub struct FakeSocketSlack {
    pub sessions: Mutex<VecDeque<Vec<Value>>>,
    pub opens: Mutex<u32>,
    pub received: Mutex<Vec<Value>>,
    ws_url: Mutex<String>,
}

impl FakeSocketSlack {
    pub fn new(sessions: Vec<Vec<Value>>) -> Arc<Self> {
        let fake = Self::default();
        *fake.sessions.lock().unwrap() = sessions.into();
        Arc::new(fake)
    }

    pub fn opens(&self) -> u32 {
        *self.opens.lock().unwrap()
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub async fn start(self: &Arc<Self>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        *self.ws_url.lock().unwrap() = format!("ws://{}/link", listener.local_addr().unwrap());

        let fake = self.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let frames = fake.sessions.lock().unwrap().pop_front().unwrap_or_default();
                tokio::spawn(fake.clone().play(stream, frames));
            }
        });

        serve(Router::new().fallback(socket_open_handler).with_state(self.clone())).await
    }

    async fn play(self: Arc<Self>, stream: TcpStream, frames: Vec<Value>) {
        if frames.is_empty() {
            return;
        }
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        for frame in frames {
            let disconnect = frame["type"] == "disconnect";
            socket.send(Message::text(frame.to_string())).await.unwrap();
            if disconnect {
                let _ = socket.close(None).await;
                return;
            }
        }
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Text(text) = message {
                let value = serde_json::from_str(text.as_str()).unwrap();
                self.received.lock().unwrap().push(value);
            }
        }
    }
}

async fn socket_open_handler(
    State(fake): State<Arc<FakeSocketSlack>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if uri.path() != "/apps.connections.open" {
        return StatusCode::NOT_FOUND.into_response();
    }
    let bearer = headers.get("authorization").and_then(|h| h.to_str().ok());
    if bearer != Some(format!("Bearer {APP_TOKEN}").as_str()) {
        return Json(json!({ "ok": false, "error": "invalid_auth" })).into_response();
    }

    *fake.opens.lock().unwrap() += 1;
    let url = fake.ws_url.lock().unwrap().clone();
    Json(json!({ "ok": true, "url": url })).into_response()
}
