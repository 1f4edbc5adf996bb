//! Google Sheets attendance ledger.

use super::auth::SheetsSession;
use crate::error::LedgerError;
use async_trait::async_trait;
use attendance_core::{AttendanceEvent, LEDGER_HEADER, LedgerRow};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

/// Title of the sheet that receives attendance rows.
pub const ATTENDANCE_SHEET: &str = "Attendance";

/// Append-only attendance store.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Appends one row for `event`. Calling twice appends twice.
    async fn record_attendance(
        &self,
        event: &AttendanceEvent,
        display_name: &str,
    ) -> Result<(), LedgerError>;
}

#[derive(Debug, Deserialize)]
struct SpreadsheetInfo {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Ledger writing to the `Attendance` sheet of one spreadsheet.
pub struct SheetsLedger {
    http: Client,
    session: SheetsSession,
    api_base: String,
    spreadsheet_id: String,
}

impl SheetsLedger {
    pub fn new(
        http: Client,
        session: SheetsSession,
        api_base: impl Into<String>,
        spreadsheet_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            session,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.into(),
        }
    }

    fn spreadsheet_url(&self, suffix: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}{}",
            self.api_base, self.spreadsheet_id, suffix
        )
    }

    /// Sends an authenticated request and decodes the JSON answer.
    ///
    /// A 401 drops the cached token and retries once with a fresh one.
    async fn call<F>(&self, build: F) -> Result<Value, LedgerError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut reauthenticated = false;

        loop {
            let token = self.session.bearer().await?;
            let response = build(&self.http).bearer_auth(token).send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !reauthenticated {
                debug!("sheets token rejected, re-authenticating");
                self.session.invalidate().await;
                reauthenticated = true;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(LedgerError::Api { status, body });
            }

            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_slice(&bytes)?);
        }
    }

    async fn sheet_titles(&self) -> Result<Vec<String>, LedgerError> {
        let url = self.spreadsheet_url("");
        let info = self
            .call(|http| {
                http.request(Method::GET, url.as_str())
                    .query(&[("fields", "sheets.properties")])
            })
            .await?;

        let info: SpreadsheetInfo = serde_json::from_value(info)?;
        Ok(info
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties.title)
            .collect())
    }

    async fn create_sheet(&self) -> Result<(), LedgerError> {
        let url = self.spreadsheet_url(":batchUpdate");
        let body = json!({
            "requests": [{
                "addSheet": {
                    "properties": {
                        "title": ATTENDANCE_SHEET,
                        "gridProperties": { "frozenRowCount": 1 }
                    }
                }
            }]
        });
        self.call(|http| http.post(url.as_str()).json(&body)).await?;

        let url = self.spreadsheet_url(&format!("/values/{ATTENDANCE_SHEET}!A1"));
        let body = json!({ "values": [LEDGER_HEADER] });
        self.call(|http| {
            http.put(url.as_str())
                .query(&[("valueInputOption", "RAW")])
                .json(&body)
        })
        .await?;

        info!(sheet = ATTENDANCE_SHEET, "created attendance sheet");
        Ok(())
    }

    /// Finds the attendance sheet, creating it with the ledger header if absent.
    async fn ensure_sheet(&self) -> Result<(), LedgerError> {
        let titles = self.sheet_titles().await?;
        if titles.iter().any(|title| title == ATTENDANCE_SHEET) {
            return Ok(());
        }
        self.create_sheet().await
    }

    async fn header_row(&self) -> Result<Vec<String>, LedgerError> {
        let url = self.spreadsheet_url(&format!("/values/{ATTENDANCE_SHEET}!1:1"));
        let range = self.call(|http| http.get(url.as_str())).await?;
        let range: ValueRange = serde_json::from_value(range)?;

        let header: Vec<String> = range
            .values
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|cell| match cell {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect();

        if header.iter().all(|column| column.trim().is_empty()) {
            return Err(LedgerError::MissingHeader(ATTENDANCE_SHEET.to_string()));
        }
        Ok(header)
    }
}

#[async_trait]
impl Ledger for SheetsLedger {
    async fn record_attendance(
        &self,
        event: &AttendanceEvent,
        display_name: &str,
    ) -> Result<(), LedgerError> {
        self.ensure_sheet().await?;
        let header = self.header_row().await?;
        let row = LedgerRow::new(event, display_name).project(&header);

        let url = self.spreadsheet_url(&format!("/values/{ATTENDANCE_SHEET}!A1:append"));
        let body = json!({ "values": [row] });
        self.call(|http| {
            http.post(url.as_str())
                .query(&[
                    ("valueInputOption", "USER_ENTERED"),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .json(&body)
        })
        .await?;

        info!(
            direction = %event.direction(),
            user = display_name,
            time = event.time(),
            "attendance recorded"
        );
        Ok(())
    }
}
