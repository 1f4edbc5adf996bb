//! Message handling pipeline.
//!
//! channel filter -> classifier -> profile lookup -> extraction -> ledger
//! append -> threaded confirmation.
//!
//! Each call runs to completion on its own; concurrent calls are not
//! coordinated, so two messages may append in either order.

use crate::error::DispatchError;
use crate::sheets::Ledger;
use crate::slack::{ChatClient, ChatMessage};
use attendance_core::{AttendanceEvent, ParseError, is_attendance_message, parse_attendance_message};
use chrono::{FixedOffset, Local, Offset, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Reply posted when recording fails and users are to be told.
pub const FAILURE_NOTICE: &str = "Attendance could not be recorded, please try again later.";

/// Timezone used for dates, fallback times and the time-of-day rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceZone {
    /// The host's local zone.
    Local,
    Fixed(FixedOffset),
}

impl ReferenceZone {
    pub fn utc() -> Self {
        ReferenceZone::Fixed(Utc.fix())
    }

    fn parse(&self, message: &ChatMessage) -> Result<AttendanceEvent, ParseError> {
        match self {
            ReferenceZone::Local => {
                parse_attendance_message(&message.text, &message.user, &message.ts, &Local)
            }
            ReferenceZone::Fixed(offset) => {
                parse_attendance_message(&message.text, &message.user, &message.ts, offset)
            }
        }
    }
}

/// What to do when a message cannot be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Extra ledger attempts after the first failure.
    pub retries: u32,
    /// Delay before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
    /// Post [`FAILURE_NOTICE`] in the thread on failure.
    pub notify_user: bool,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            backoff: Duration::from_millis(500),
            notify_user: false,
        }
    }
}

/// Why a message was not recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OtherChannel,
    NotAttendance,
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ignored(IgnoreReason),
    Recorded(AttendanceEvent),
}

/// Wires the classifier and extractor to the chat platform and ledger.
pub struct Dispatcher {
    chat: Arc<dyn ChatClient>,
    ledger: Arc<dyn Ledger>,
    channel_id: String,
    zone: ReferenceZone,
    policy: FailurePolicy,
}

/// Confirmation text for a recorded event.
pub fn confirmation(event: &AttendanceEvent) -> String {
    format!(
        "Attendance recorded: {} at {}",
        event.direction().label(),
        event.time()
    )
}

impl Dispatcher {
    pub fn new(
        chat: Arc<dyn ChatClient>,
        ledger: Arc<dyn Ledger>,
        channel_id: impl Into<String>,
        zone: ReferenceZone,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            chat,
            ledger,
            channel_id: channel_id.into(),
            zone,
            policy,
        }
    }

    /// Handles one chat message.
    ///
    /// # Errors
    ///
    /// Any failed step is returned; nothing is swallowed. With
    /// `notify_user` set, a failure notice is also posted in the thread
    /// unless the row was already written.
    pub async fn handle_message(&self, message: &ChatMessage) -> Result<Outcome, DispatchError> {
        if message.channel != self.channel_id {
            return Ok(Outcome::Ignored(IgnoreReason::OtherChannel));
        }
        if !is_attendance_message(&message.text) {
            debug!(ts = %message.ts, "message is not about attendance");
            return Ok(Outcome::Ignored(IgnoreReason::NotAttendance));
        }

        match self.record(message).await {
            Ok(event) => Ok(Outcome::Recorded(event)),
            Err(e) => {
                if self.policy.notify_user && !e.is_recorded() {
                    self.notify_failure(message).await;
                }
                Err(e)
            }
        }
    }

    /// Handles `message` on a task tracked by `tasks` and logs the result.
    ///
    /// Closing and waiting on `tasks` lets in-flight messages finish.
    pub fn spawn(self: &Arc<Self>, tasks: &TaskTracker, message: ChatMessage) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tasks.spawn(async move {
            match dispatcher.handle_message(&message).await {
                Ok(Outcome::Recorded(event)) => debug!(
                    ts = %message.ts,
                    direction = %event.direction(),
                    "message recorded"
                ),
                Ok(Outcome::Ignored(reason)) => {
                    debug!(ts = %message.ts, ?reason, "message ignored")
                }
                Err(e) => error!(
                    error = %e,
                    recorded = e.is_recorded(),
                    channel = %message.channel,
                    user = %message.user,
                    ts = %message.ts,
                    text = %message.text,
                    "failed to process attendance message"
                ),
            }
        })
    }

    async fn record(&self, message: &ChatMessage) -> Result<AttendanceEvent, DispatchError> {
        let profile = self
            .chat
            .user_profile(&message.user)
            .await
            .map_err(DispatchError::Profile)?;

        let event = self.zone.parse(message)?;

        self.append_with_retry(&event, profile.display_name()).await?;

        self.chat
            .reply_in_thread(&message.channel, &message.ts, &confirmation(&event))
            .await
            .map_err(DispatchError::Reply)?;

        info!(
            user = %message.user,
            direction = %event.direction(),
            time = event.time(),
            date = event.date(),
            "attendance confirmed"
        );
        Ok(event)
    }

    async fn append_with_retry(
        &self,
        event: &AttendanceEvent,
        display_name: &str,
    ) -> Result<(), DispatchError> {
        let max_attempts = self.policy.retries + 1;
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.ledger.record_attendance(event, display_name).await {
                Ok(()) => return Ok(()),
                Err(e) if attempts < max_attempts => {
                    warn!(
                        error = %e,
                        attempt = attempts,
                        max_attempts,
                        "ledger append failed, retrying"
                    );
                    tokio::time::sleep(self.policy.backoff * attempts).await;
                }
                Err(source) => return Err(DispatchError::Ledger { attempts, source }),
            }
        }
    }

    async fn notify_failure(&self, message: &ChatMessage) {
        if let Err(e) = self
            .chat
            .reply_in_thread(&message.channel, &message.ts, FAILURE_NOTICE)
            .await
        {
            error!(error = %e, ts = %message.ts, "failed to post failure notice");
        }
    }
}
