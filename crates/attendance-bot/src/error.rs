//! Error types for the attendance bot.

use attendance_core::ParseError;
use reqwest::StatusCode;

/// Failures talking to the Slack Web API.
#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("slack request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("slack answered {status} for {method}")]
    Status { method: &'static str, status: StatusCode },

    #[error("slack {method} returned error: {code}")]
    Api { method: &'static str, code: String },

    #[error("slack users.info returned no user for {0}")]
    MissingUser(String),

    #[error("socket mode connection failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Failures writing to the attendance sheet.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid service account key: {0}")]
    Key(#[source] jsonwebtoken::errors::Error),

    #[error("failed to sign token request: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    #[error("sheets request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint answered {status}: {body}")]
    Auth { status: StatusCode, body: String },

    #[error("sheets API answered {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("unexpected sheets response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("sheet {0:?} has no header row")]
    MissingHeader(String),
}

/// Failures while handling one attendance message.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to look up user: {0}")]
    Profile(#[source] SlackError),

    #[error("failed to parse message: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to record attendance after {attempts} attempt(s): {source}")]
    Ledger {
        attempts: u32,
        #[source]
        source: LedgerError,
    },

    #[error("attendance recorded but confirmation failed: {0}")]
    Reply(#[source] SlackError),
}

impl DispatchError {
    /// True when the ledger row was written despite the error.
    pub fn is_recorded(&self) -> bool {
        matches!(self, DispatchError::Reply(_))
    }
}

/// Invalid configuration values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid UTC offset {0:?}, expected +HH:MM or -HH:MM")]
    UtcOffset(String),
}
