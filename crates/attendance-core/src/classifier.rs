//! Attendance message classifier.
//!
//! Matching is case-insensitive substring matching without word boundaries,
//! so "in" also matches inside "Minutes". Callers rely on that breadth.

use regex::Regex;
use std::sync::LazyLock;

static CHECK_IN: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)(in|clockin|checkin|arriving|starting|beginning)"));

static CHECK_OUT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)(out|clockout|checkout|leaving|ending)"));

static CLOCK_TIME: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)[0-9]{1,2}:[0-9]{2}\s*(am|pm)?"));

static ATTENDANCE_WORD: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)attendance"));

/// Compiles one of the literal patterns above.
#[allow(clippy::expect_used)]
fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("attendance pattern is a valid regex")
}

/// Returns true if the text contains check-in vocabulary.
pub fn mentions_check_in(text: &str) -> bool {
    CHECK_IN.is_match(text)
}

/// Returns true if the text contains check-out vocabulary.
pub fn mentions_check_out(text: &str) -> bool {
    CHECK_OUT.is_match(text)
}

/// Returns true if the text looks like an attendance message.
///
/// Any one of check-in vocabulary, check-out vocabulary, a clock time such
/// as `9:05` or `17:45pm`, or the word "attendance" is enough.
pub fn is_attendance_message(text: &str) -> bool {
    mentions_check_in(text)
        || mentions_check_out(text)
        || CLOCK_TIME.is_match(text)
        || ATTENDANCE_WORD.is_match(text)
}
