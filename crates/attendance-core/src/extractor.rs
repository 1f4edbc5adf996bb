//! Attendance extraction.
//!
//! Turns a classified message into an [`AttendanceEvent`]. The direction
//! follows a fixed precedence:
//!
//! 1. check-in vocabulary anywhere in the text means IN;
//! 2. no check-out vocabulary and a local hour before 21 means IN;
//! 3. anything else is OUT.
//!
//! A message with no keywords at all sent at 22:00 is therefore OUT.

use crate::classifier::{mentions_check_in, mentions_check_out};
use crate::event::{AttendanceEvent, Direction};
use chrono::{DateTime, TimeZone, Timelike, Utc};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Local hour from which keyword-free messages count as check-outs.
pub const CHECK_OUT_CUTOFF_HOUR: u32 = 21;

static TIME_TOKEN: LazyLock<Regex> = LazyLock::new(time_token);

#[allow(clippy::expect_used)]
fn time_token() -> Regex {
    // ASCII word boundaries: a letter such as `é` or `в` does not join the token.
    Regex::new(r"(?i)(?-u:\b)([0-9]{1,2}:[0-9]{2})\s*(am|pm)?(?-u:\b)")
        .expect("time token is a valid regex")
}

/// Errors raised while extracting an event.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid message timestamp: {0:?}")]
    InvalidTimestamp(String),
}

/// Parses the platform's `seconds[.fraction]` timestamp.
fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>, ParseError> {
    let invalid = || ParseError::InvalidTimestamp(ts.to_string());
    let trimmed = ts.trim();
    let (whole, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));

    let digits = whole.strip_prefix('-').unwrap_or(whole);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let secs: i64 = whole.parse().map_err(|_| invalid())?;

    // Sub-nanosecond digits are dropped.
    let mut nanos: u32 = 0;
    for (place, digit) in fraction.bytes().take(9).enumerate() {
        nanos += u32::from(digit - b'0') * 10u32.pow(8 - place as u32);
    }

    // A negative timestamp's fraction counts towards the epoch.
    let (secs, nanos) = if whole.starts_with('-') && nanos > 0 {
        (secs.checked_sub(1).ok_or_else(invalid)?, 1_000_000_000 - nanos)
    } else {
        (secs, nanos)
    };

    Utc.timestamp_opt(secs, nanos).single().ok_or_else(invalid)
}

/// Builds an [`AttendanceEvent`] from message text.
///
/// `ts` is the chat platform's message timestamp (decimal seconds since the
/// Unix epoch). Date, fallback time and the time-of-day rule are evaluated
/// in `zone`.
///
/// # Errors
///
/// Returns [`ParseError::InvalidTimestamp`] if `ts` is not a representable
/// Unix timestamp. Text and actor are not validated.
pub fn parse_attendance_message<Tz>(
    text: &str,
    actor_id: &str,
    ts: &str,
    zone: &Tz,
) -> Result<AttendanceEvent, ParseError>
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let reference = parse_timestamp(ts)?.with_timezone(zone);

    let time = match TIME_TOKEN.captures(text).and_then(|c| c.get(1)) {
        Some(quoted) => quoted.as_str().to_string(),
        None => reference.format("%H:%M").to_string(),
    };

    let direction = if mentions_check_in(text)
        || (!mentions_check_out(text) && reference.hour() < CHECK_OUT_CUTOFF_HOUR)
    {
        Direction::In
    } else {
        Direction::Out
    };

    Ok(AttendanceEvent::new(
        reference.format("%Y-%m-%d").to_string(),
        time,
        direction,
        ts.to_string(),
        reference.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
        actor_id.to_string(),
    ))
}
