//! Slack Socket Mode receiver.
//!
//! The app-level token opens a WebSocket through `apps.connections.open`.
//! Each `events_api` envelope is acknowledged by id before its message is
//! dispatched. Slack recycles sockets every few hours, so the receiver
//! reconnects until it is shut down.

use crate::dispatcher::Dispatcher;
use crate::error::SlackError;
use crate::slack::Envelope;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const OPEN_METHOD: &str = "apps.connections.open";

/// Cap on the reconnect delay, in multiples of the base delay.
const MAX_BACKOFF_STEPS: u32 = 30;

#[derive(Debug, Deserialize)]
struct OpenResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Frame pushed by Slack over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketFrame {
    Hello,
    Disconnect {
        #[serde(default)]
        reason: Option<String>,
    },
    EventsApi {
        envelope_id: String,
        payload: Envelope,
    },
    #[serde(other)]
    Other,
}

enum SessionEnd {
    Reconnect,
    Shutdown,
}

/// Receives events over Socket Mode, so no public URL is needed.
pub struct SocketModeReceiver {
    http: Client,
    app_token: String,
    api_base: String,
    reconnect_delay: Duration,
}

impl SocketModeReceiver {
    pub fn new(http: Client, app_token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            http,
            app_token: app_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            reconnect_delay: Duration::from_secs(1),
        }
    }

    /// Base delay before reconnecting after a failed connection.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Asks Slack for a fresh WebSocket URL.
    pub async fn open_connection(&self) -> Result<String, SlackError> {
        let response = self
            .http
            .post(format!("{}/{OPEN_METHOD}", self.api_base))
            .bearer_auth(&self.app_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SlackError::Status {
                method: OPEN_METHOD,
                status,
            });
        }

        let body: OpenResponse = response.json().await?;
        if !body.ok {
            return Err(SlackError::Api {
                method: OPEN_METHOD,
                code: body.error.unwrap_or_else(|| "unknown_error".to_string()),
            });
        }

        body.url.ok_or_else(|| SlackError::Api {
            method: OPEN_METHOD,
            code: "missing_url".to_string(),
        })
    }

    /// Dispatches message events until `shutdown` is cancelled.
    ///
    /// Dispatch tasks are spawned on `tasks`; waiting for them is left to
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns [`SlackError::Api`] when Slack refuses to open a connection,
    /// e.g. for a revoked app token. Transport failures are retried.
    pub async fn run(
        &self,
        dispatcher: Arc<Dispatcher>,
        tasks: TaskTracker,
        shutdown: CancellationToken,
    ) -> Result<(), SlackError> {
        let mut failures: u32 = 0;

        while !shutdown.is_cancelled() {
            match self.session(&dispatcher, &tasks, &shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Reconnect) => failures = 0,
                Err(e @ SlackError::Api { .. }) => return Err(e),
                Err(e) => {
                    failures += 1;
                    let delay = self.reconnect_delay * failures.min(MAX_BACKOFF_STEPS);
                    warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "socket mode connection lost"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("socket mode receiver stopped");
        Ok(())
    }

    async fn session(
        &self,
        dispatcher: &Arc<Dispatcher>,
        tasks: &TaskTracker,
        shutdown: &CancellationToken,
    ) -> Result<SessionEnd, SlackError> {
        let url = self.open_connection().await?;
        let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!("socket mode connected");

        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Err(e) = socket.close(None).await {
                        debug!(error = %e, "socket mode close failed");
                    }
                    return Ok(SessionEnd::Shutdown);
                }
                frame = socket.next() => frame,
            };

            let text = match frame {
                None | Some(Ok(Message::Close(_))) => return Ok(SessionEnd::Reconnect),
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };

            match serde_json::from_str::<SocketFrame>(text.as_str()) {
                Ok(SocketFrame::Hello) => info!("socket mode session ready"),
                Ok(SocketFrame::Disconnect { reason }) => {
                    info!(reason = reason.as_deref(), "slack requested a reconnect");
                    return Ok(SessionEnd::Reconnect);
                }
                Ok(SocketFrame::EventsApi {
                    envelope_id,
                    payload,
                }) => {
                    let ack = json!({ "envelope_id": envelope_id });
                    socket.send(Message::text(ack.to_string())).await?;
                    if let Some(message) = payload.into_chat_message() {
                        dispatcher.spawn(tasks, message);
                    }
                }
                Ok(SocketFrame::Other) => debug!("ignored socket mode frame"),
                Err(e) => warn!(error = %e, "malformed socket mode frame"),
            }
        }
    }
}
