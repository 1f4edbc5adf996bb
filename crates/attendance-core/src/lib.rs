//! Attendance Core - Message Classification and Extraction
//!
//! Decides whether a chat message is about attendance and turns it into a
//! structured [`AttendanceEvent`]. Everything in this crate is pure: no I/O,
//! no clocks, no shared state beyond the compiled patterns.
//!
//! # Usage
//!
//! ```
//! use attendance_core::{Direction, is_attendance_message, parse_attendance_message};
//! use chrono::Utc;
//!
//! let text = "Clocking in, starting work";
//! assert!(is_attendance_message(text));
//!
//! let event = parse_attendance_message(text, "U123", "1709281800.000200", &Utc)?;
//! assert_eq!(event.date(), "2024-03-01");
//! assert_eq!(event.time(), "08:30");
//! assert_eq!(event.direction(), Direction::In);
//! # Ok::<(), attendance_core::ParseError>(())
//! ```

pub mod classifier;
pub mod event;
pub mod extractor;

pub use classifier::{is_attendance_message, mentions_check_in, mentions_check_out};
pub use event::{ActorProfile, AttendanceEvent, Direction, LEDGER_HEADER, LedgerRow};
pub use extractor::{CHECK_OUT_CUTOFF_HOUR, ParseError, parse_attendance_message};
