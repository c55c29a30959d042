/*!
Spreadsheet-append handler.

The production destination is a hosted script that appends rows to a Google
Sheet. This module reproduces its observable behaviour against an in-memory
sheet so the proxy and the relay can be run and tested locally:

- `POST` appends one eight-column row (header row first if the sheet is empty)
  and answers with `{ success, message, row, timestamp }`
- `GET` is a health probe answering `{ status: "OK", message, timestamp, version }`

Like the hosted platform, every answer is sent with HTTP 200; failures are only
visible in the `success` flag of the body.
*/

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};

use crate::error::ValidationError;
use crate::submission::{Submission, now_iso};

/// Column titles written as the first row
pub const HEADERS: [&str; 8] = [
    "Timestamp",
    "Name",
    "Email",
    "Phone",
    "Company",
    "Message",
    "User Agent",
    "IP Address",
];

pub const VERSION: &str = "1.0.0";

pub type Row = [String; 8];

/// Append-only sheet. Row numbers are 1-based like a spreadsheet's.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    rows: Vec<Row>,
}

impl Sheet {
    pub fn new() -> Self {
        Sheet { rows: Vec::new() }
    }

    /// Clear everything and write the header row
    pub fn setup(&mut self) {
        self.rows.clear();
        self.rows.push(HEADERS.map(str::to_string));
    }

    /// Number of the last non-empty row, 0 for an empty sheet
    pub fn last_row(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Data rows only, without the header
    pub fn records(&self) -> &[Row] {
        if self.rows.is_empty() {
            &self.rows
        } else {
            &self.rows[1..]
        }
    }

    /// Append one row, writing the header first on an empty sheet.
    ///
    /// # Returns
    /// * `usize` - The row number the data landed on
    pub fn append(&mut self, row: Row) -> usize {
        if self.rows.is_empty() {
            self.setup();
        }
        self.rows.push(row);
        self.last_row()
    }

    /// Export the sheet as CSV
    ///
    /// Fields containing commas, quotes or line breaks are quoted, with inner
    /// quotes doubled.
    pub fn to_csv(&self) -> String {
        let mut csv_content = String::new();

        for row in &self.rows {
            for (c, value) in row.iter().enumerate() {
                if c > 0 {
                    csv_content.push(',');
                }
                if value.contains(',')
                    || value.contains('"')
                    || value.contains('\n')
                    || value.contains('\r')
                {
                    let escaped = value.replace('"', "\"\"");
                    csv_content.push_str(&format!("\"{}\"", escaped));
                } else {
                    csv_content.push_str(value);
                }
            }
            csv_content.push('\n');
        }

        csv_content
    }
}

/// Decode a request body the way the hosted script does: JSON when the
/// content type says so, form parameters otherwise.
pub fn parse_payload(content_type: Option<&str>, body: &[u8]) -> Result<Submission, String> {
    let is_json = content_type
        .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_slice(body).map_err(|e| format!("Invalid JSON payload: {e}"))
    } else {
        serde_urlencoded::from_bytes(body).map_err(|e| format!("Invalid form payload: {e}"))
    }
}

/// Resolve the row timestamp: the supplied one if present, now otherwise
fn resolve_timestamp(submission: &Submission) -> Result<String, String> {
    match submission.timestamp.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => DateTime::parse_from_rfc3339(raw)
            .map(|t| {
                t.with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
            })
            .map_err(|e| format!("Invalid timestamp {raw:?}: {e}")),
        _ => Ok(now_iso()),
    }
}

/// Handle an append request and build the acknowledgment body.
///
/// Only presence of name, email and message is checked here; email format is
/// the sender's business.
pub fn handle_post(sheet: &mut Sheet, content_type: Option<&str>, body: &[u8]) -> Value {
    let submission = match parse_payload(content_type, body) {
        Ok(submission) => submission,
        Err(error) => return failure(error),
    };

    let missing = [&submission.name, &submission.email, &submission.message]
        .iter()
        .any(|field| field.is_empty());
    if missing {
        return json!({
            "success": false,
            "error": ValidationError::MissingFields.to_string(),
        });
    }

    let timestamp = match resolve_timestamp(&submission) {
        Ok(timestamp) => timestamp,
        Err(error) => return failure(error),
    };

    let row = sheet.append([
        timestamp.clone(),
        submission.name,
        submission.email,
        submission.phone,
        submission.company,
        submission.message,
        submission.user_agent.unwrap_or_default(),
        submission.ip.unwrap_or_default(),
    ]);

    json!({
        "success": true,
        "message": "Form submitted successfully",
        "row": row,
        "timestamp": timestamp,
    })
}

fn failure(error: String) -> Value {
    log::error!("Error processing form submission: {error}");
    json!({
        "success": false,
        "error": error,
        "message": "Failed to process form submission",
    })
}

/// Health probe body
pub fn handle_get() -> Value {
    json!({
        "status": "OK",
        "message": "Form handler is running",
        "timestamp": now_iso(),
        "version": VERSION,
    })
}

#[cfg(feature = "web")]
pub use web::{SheetState, router};

#[cfg(feature = "web")]
mod web {
    use std::path::PathBuf;
    use std::sync::Arc;

    use axum::{
        Json, Router,
        body::Bytes,
        extract::State,
        http::{HeaderMap, header},
        response::IntoResponse,
        routing::get,
    };
    use log::{info, warn};
    use serde_json::Value;
    use tokio::sync::Mutex;

    use super::{Row, Sheet, handle_get, handle_post};

    /// Shared sheet plus an optional CSV mirror rewritten after every append
    pub struct SheetState {
        pub sheet: Mutex<Sheet>,
        pub csv_path: Option<PathBuf>,
    }

    impl SheetState {
        pub fn new(csv_path: Option<PathBuf>) -> Arc<Self> {
            Arc::new(SheetState {
                sheet: Mutex::new(Sheet::new()),
                csv_path,
            })
        }

        /// Copy of the data rows
        pub async fn records(&self) -> Vec<Row> {
            self.sheet.lock().await.records().to_vec()
        }
    }

    /// Routes of the local destination. The script endpoint is served both at
    /// `/` and at `/exec` so deployment-style URLs work unchanged.
    pub fn router(state: Arc<SheetState>) -> Router {
        Router::new()
            .route("/", get(probe).post(append))
            .route("/exec", get(probe).post(append))
            .route("/export.csv", get(export_csv))
            .with_state(state)
    }

    async fn probe() -> Json<Value> {
        Json(handle_get())
    }

    async fn append(
        State(state): State<Arc<SheetState>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Json<Value> {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());

        let mut sheet = state.sheet.lock().await;
        let ack = handle_post(&mut sheet, content_type, &body);

        if ack["success"] == true {
            info!("Appended row {}", ack["row"]);
            if let Some(path) = &state.csv_path {
                if let Err(e) = tokio::fs::write(path, sheet.to_csv()).await {
                    warn!("Failed to write CSV mirror {}: {e}", path.display());
                }
            }
        }

        Json(ack)
    }

    async fn export_csv(State(state): State<Arc<SheetState>>) -> impl IntoResponse {
        let sheet = state.sheet.lock().await;
        ([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], sheet.to_csv())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: Option<&str> = Some("application/json");

    #[test]
    fn first_append_writes_the_header() {
        let mut sheet = Sheet::new();
        let ack = handle_post(
            &mut sheet,
            JSON,
            br#"{"name":"Jane","email":"jane@x.com","message":"hi"}"#,
        );

        assert_eq!(ack["success"], true);
        assert_eq!(ack["row"], 2);
        assert_eq!(sheet.rows()[0], HEADERS.map(str::to_string));

        let record = &sheet.records()[0];
        assert_eq!(record[1], "Jane");
        assert_eq!(record[2], "jane@x.com");
        assert_eq!(record[3], "");
        assert_eq!(record[4], "");
        assert_eq!(record[5], "hi");
    }

    #[test]
    fn form_encoded_payloads_are_accepted() {
        let mut sheet = Sheet::new();
        let ack = handle_post(
            &mut sheet,
            Some("application/x-www-form-urlencoded"),
            b"name=Jane&email=jane%40x.com&message=hello+there&company=Acme",
        );

        assert_eq!(ack["success"], true);
        let record = &sheet.records()[0];
        assert_eq!(record[2], "jane@x.com");
        assert_eq!(record[4], "Acme");
        assert_eq!(record[5], "hello there");
    }

    #[test]
    fn missing_fields_append_nothing() {
        let mut sheet = Sheet::new();
        let ack = handle_post(&mut sheet, JSON, br#"{"name":"Jane","message":"hi"}"#);

        assert_eq!(ack["success"], false);
        assert_eq!(
            ack["error"],
            "Missing required fields: name, email, and message are required"
        );
        assert_eq!(sheet.last_row(), 0);
    }

    #[test]
    fn supplied_timestamp_is_normalised() {
        let mut sheet = Sheet::new();
        let ack = handle_post(
            &mut sheet,
            JSON,
            br#"{"name":"Jane","email":"jane@x.com","message":"hi","timestamp":"2024-05-01T12:00:00+02:00"}"#,
        );
        assert_eq!(ack["timestamp"], "2024-05-01T10:00:00.000Z");
        assert_eq!(sheet.records()[0][0], "2024-05-01T10:00:00.000Z");
    }

    #[test]
    fn unparseable_timestamp_is_a_failure() {
        let mut sheet = Sheet::new();
        let ack = handle_post(
            &mut sheet,
            JSON,
            br#"{"name":"Jane","email":"jane@x.com","message":"hi","timestamp":"yesterday"}"#,
        );
        assert_eq!(ack["success"], false);
        assert_eq!(ack["message"], "Failed to process form submission");
        assert_eq!(sheet.last_row(), 0);
    }

    #[test]
    fn identical_submissions_make_distinct_rows() {
        let mut sheet = Sheet::new();
        let body = br#"{"name":"Jane","email":"jane@x.com","message":"hi"}"#;
        assert_eq!(handle_post(&mut sheet, JSON, body)["row"], 2);
        assert_eq!(handle_post(&mut sheet, JSON, body)["row"], 3);
        assert_eq!(sheet.records().len(), 2);
    }

    #[test]
    fn csv_quotes_awkward_values() {
        let mut sheet = Sheet::new();
        sheet.append([
            "2024-05-01T10:00:00.000Z".to_string(),
            "Doe, Jane".to_string(),
            "jane@x.com".to_string(),
            String::new(),
            String::new(),
            "say \"hi\"\nbye".to_string(),
            String::new(),
            String::new(),
        ]);

        let csv = sheet.to_csv();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Timestamp,Name,Email,Phone,Company,Message,User Agent,IP Address")
        );
        assert!(csv.contains("\"Doe, Jane\""));
        assert!(csv.contains("\"say \"\"hi\"\"\nbye\""));
    }

    #[test]
    fn probe_reports_version() {
        let probe = handle_get();
        assert_eq!(probe["status"], "OK");
        assert_eq!(probe["version"], VERSION);
    }
}
