//! Process configuration.
//!
//! Every setting comes from a flag or its environment variable; there is no
//! config file.

use crate::dispatcher::{FailurePolicy, ReferenceZone};
use crate::error::ConfigError;
use crate::sheets::ServiceAccount;
use chrono::FixedOffset;
use clap::Parser;
use std::time::Duration;

/// Slack attendance logger.
#[derive(Parser, Debug, Clone)]
#[command(name = "attendance-bot")]
#[command(about = "Records clock-in and clock-out messages from Slack in a Google Sheet")]
#[command(version)]
pub struct Config {
    /// Slack bot token.
    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    pub bot_token: String,

    /// Slack signing secret used to authenticate event requests.
    #[arg(long, env = "SLACK_SIGNING_SECRET", hide_env_values = true)]
    pub signing_secret: String,

    /// Slack app-level token. When set, events arrive over Socket Mode instead of HTTP.
    #[arg(long, env = "SLACK_APP_TOKEN", hide_env_values = true)]
    pub app_token: Option<String>,

    /// Channel whose messages are recorded.
    #[arg(short, long, env = "ATTENDANCE_CHANNEL_ID")]
    pub channel: String,

    /// Spreadsheet that holds the attendance sheet.
    #[arg(long, env = "GOOGLE_SHEET_ID")]
    pub sheet_id: String,

    /// Service account email.
    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_EMAIL")]
    pub service_account_email: String,

    /// Service account private key (PEM, `\n` escapes allowed).
    #[arg(long, env = "GOOGLE_PRIVATE_KEY", hide_env_values = true, allow_hyphen_values = true)]
    pub private_key: String,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Host to bind to.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Fixed UTC offset for dates and times, e.g. +09:00. Host local time if unset.
    #[arg(
        long,
        env = "ATTENDANCE_UTC_OFFSET",
        value_parser = parse_utc_offset,
        allow_hyphen_values = true
    )]
    pub utc_offset: Option<FixedOffset>,

    /// Extra attempts when appending to the sheet fails.
    #[arg(short, long, env = "ATTENDANCE_RETRIES", default_value = "0")]
    pub retries: u32,

    /// Base delay between append attempts in milliseconds.
    #[arg(long, env = "ATTENDANCE_RETRY_BACKOFF_MS", default_value = "500")]
    pub retry_backoff_ms: u64,

    /// Reply in the thread when a message could not be recorded.
    #[arg(long, env = "ATTENDANCE_NOTIFY_ON_FAILURE")]
    pub notify_on_failure: bool,

    /// Slack Web API base URL.
    #[arg(long, env = "SLACK_API_BASE", default_value = "https://slack.com/api")]
    pub slack_api_base: String,

    /// Google Sheets API base URL.
    #[arg(long, env = "GOOGLE_SHEETS_API_BASE", default_value = "https://sheets.googleapis.com")]
    pub sheets_api_base: String,

    /// OAuth token endpoint for the service account.
    #[arg(long, env = "GOOGLE_TOKEN_URI", default_value = "https://oauth2.googleapis.com/token")]
    pub token_uri: String,

    /// HTTP timeout for outbound calls in seconds.
    #[arg(short, long, env = "ATTENDANCE_HTTP_TIMEOUT", default_value = "30")]
    pub timeout: u64,
}

impl Config {
    pub fn reference_zone(&self) -> ReferenceZone {
        match self.utc_offset {
            Some(offset) => ReferenceZone::Fixed(offset),
            None => ReferenceZone::Local,
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy {
            retries: self.retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
            notify_user: self.notify_on_failure,
        }
    }

    pub fn service_account(&self) -> ServiceAccount {
        ServiceAccount::new(&self.service_account_email, &self.private_key)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Parses `+HH:MM`, `-HH:MM`, `+HHMM`, `+HH` or `Z`.
pub fn parse_utc_offset(value: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || ConfigError::UtcOffset(value.to_string());
    let trimmed = value.trim();

    if trimmed.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };

    if hours.is_empty() || hours.len() > 2 || minutes.is_empty() || minutes.len() > 2 {
        return Err(invalid());
    }
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
