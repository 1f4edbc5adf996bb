//! Google Sheets ledger.

mod auth;
mod ledger;

pub use auth::{SHEETS_SCOPE, ServiceAccount, SheetsSession};
pub use ledger::{ATTENDANCE_SHEET, Ledger, SheetsLedger};
