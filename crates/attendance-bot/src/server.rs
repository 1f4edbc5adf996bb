//! Slack Events API receiver.
//!
//! Requests are authenticated with the signing secret, acknowledged at once,
//! and message events are handled on their own task so Slack's three-second
//! acknowledgement deadline never waits on the sheet.

use crate::dispatcher::Dispatcher;
use crate::slack::Envelope;
use crate::slack::signature::{self, SignatureError};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Path Slack posts events to.
pub const EVENTS_PATH: &str = "/slack/events";

/// Shared application state.
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub signing_secret: String,
    /// Dispatch tasks started by the receiver.
    pub tasks: TaskTracker,
}

/// Builds the receiver's router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(EVENTS_PATH, post(handle_events))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Handles one Events API request.
async fn handle_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| headers.get(name).and_then(|h| h.to_str().ok());

    if let Err(e) = signature::verify(
        &state.signing_secret,
        header("x-slack-request-timestamp"),
        header("x-slack-signature"),
        &body,
        unix_now(),
    ) {
        warn!(reason = %e, "rejected unsigned slack request");
        let message = match e {
            SignatureError::MissingHeaders => "Missing signature",
            _ => "Invalid signature",
        };
        return (StatusCode::UNAUTHORIZED, message).into_response();
    }

    let envelope: Envelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "malformed slack event payload");
            return (StatusCode::BAD_REQUEST, "Malformed payload").into_response();
        }
    };

    if let Envelope::UrlVerification { challenge } = envelope {
        info!("answered slack url verification");
        return Json(json!({ "challenge": challenge })).into_response();
    }

    if let Some(retry) = header("x-slack-retry-num") {
        debug!(retry, "slack redelivered event");
    }
    if let Some(message) = envelope.into_chat_message() {
        state.dispatcher.spawn(&state.tasks, message);
    }
    StatusCode::OK.into_response()
}

/// Serves `router` on `listener` until `shutdown` is cancelled, then waits
/// for every dispatch task in `tasks` to finish.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    tasks: TaskTracker,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;

    tasks.close();
    if !tasks.is_empty() {
        info!(pending = tasks.len(), "waiting for in-flight messages");
    }
    tasks.wait().await;
    result
}
