//! Slack Web API client.

use crate::error::SlackError;
use async_trait::async_trait;
use attendance_core::ActorProfile;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Chat platform calls made while handling a message.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Looks up the author of a message.
    async fn user_profile(&self, user_id: &str) -> Result<ActorProfile, SlackError>;

    /// Posts `text` as a threaded reply to the message `thread_ts`.
    async fn reply_in_thread(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<(), SlackError>;
}

#[derive(Debug, Deserialize)]
struct UsersInfoResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    user: Option<ActorProfile>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Bot-token client for `users.info` and `chat.postMessage`.
#[derive(Clone)]
pub struct SlackClient {
    http: Client,
    token: String,
    api_base: String,
}

impl SlackClient {
    pub fn new(http: Client, token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    async fn user_profile(&self, user_id: &str) -> Result<ActorProfile, SlackError> {
        const METHOD: &str = "users.info";

        let response = self
            .http
            .get(self.method_url(METHOD))
            .bearer_auth(&self.token)
            .query(&[("user", user_id)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SlackError::Status {
                method: METHOD,
                status,
            });
        }

        let body: UsersInfoResponse = response.json().await?;
        if !body.ok {
            return Err(SlackError::Api {
                method: METHOD,
                code: body.error.unwrap_or_else(|| "unknown_error".to_string()),
            });
        }

        body.user
            .ok_or_else(|| SlackError::MissingUser(user_id.to_string()))
    }

    async fn reply_in_thread(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<(), SlackError> {
        const METHOD: &str = "chat.postMessage";

        let response = self
            .http
            .post(self.method_url(METHOD))
            .bearer_auth(&self.token)
            .json(&json!({
                "channel": channel,
                "thread_ts": thread_ts,
                "text": text,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SlackError::Status {
                method: METHOD,
                status,
            });
        }

        let body: PostMessageResponse = response.json().await?;
        if !body.ok {
            return Err(SlackError::Api {
                method: METHOD,
                code: body.error.unwrap_or_else(|| "unknown_error".to_string()),
            });
        }

        Ok(())
    }
}
