//! Attendance value types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Column titles of the ledger sheet, in order.
///
/// Existing sheets are read by these names, so they must not change.
pub const LEDGER_HEADER: [&str; 6] = ["Date", "User", "Time", "Type", "Datetime", "User ID"];

/// Whether an attendance event opens or closes a working period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Lower-case form stored in the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    /// Upper-case form used in confirmations.
    pub fn label(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One clock-in or clock-out extracted from a chat message.
///
/// Built by [`parse_attendance_message`](crate::parse_attendance_message)
/// and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceEvent {
    date: String,
    time: String,
    direction: Direction,
    timestamp: String,
    datetime: String,
    actor_id: String,
}

impl AttendanceEvent {
    pub(crate) fn new(
        date: String,
        time: String,
        direction: Direction,
        timestamp: String,
        datetime: String,
        actor_id: String,
    ) -> Self {
        Self {
            date,
            time,
            direction,
            timestamp,
            datetime,
            actor_id,
        }
    }

    /// Calendar date in the reference zone, `YYYY-MM-DD`.
    pub fn date(&self) -> &str {
        &self.date
    }

    /// Time quoted in the message, or the message time as `HH:MM`.
    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The platform timestamp the event was derived from, as received.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// ISO-8601 rendering of the message time with offset.
    pub fn datetime(&self) -> &str {
        &self.datetime
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }
}

/// Author details looked up from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActorProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
}

impl ActorProfile {
    /// Real name when set and non-empty, account name otherwise.
    pub fn display_name(&self) -> &str {
        match self.real_name.as_deref() {
            Some(real) if !real.is_empty() => real,
            _ => &self.name,
        }
    }
}

/// Flat ledger projection of an event and its author's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerRow {
    pub date: String,
    pub user: String,
    pub time: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub datetime: String,
    pub user_id: String,
}

impl LedgerRow {
    pub fn new(event: &AttendanceEvent, display_name: &str) -> Self {
        Self {
            date: event.date.clone(),
            user: display_name.to_string(),
            time: event.time.clone(),
            kind: event.direction.as_str().to_string(),
            datetime: event.datetime.clone(),
            user_id: event.actor_id.clone(),
        }
    }

    /// Value for a ledger column title, if the row has one.
    pub fn value(&self, column: &str) -> Option<&str> {
        match column {
            "Date" => Some(&self.date),
            "User" => Some(&self.user),
            "Time" => Some(&self.time),
            "Type" => Some(&self.kind),
            "Datetime" => Some(&self.datetime),
            "User ID" => Some(&self.user_id),
            _ => None,
        }
    }

    /// Cells in the order of `header`. Unknown columns are left empty.
    pub fn project(&self, header: &[String]) -> Vec<String> {
        header
            .iter()
            .map(|column| self.value(column.trim()).unwrap_or_default().to_string())
            .collect()
    }
}
