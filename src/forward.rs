use std::time::Duration;

use log::{debug, info};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ForwardError;
use crate::submission::Submission;

/// What a connectivity test observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    /// The destination answered with a 2xx status
    pub success: bool,
    pub status: u16,
    pub status_text: String,

    /// Parsed JSON body, or the raw text when it is not JSON
    pub data: Value,
}

/// Outbound side of the proxy: talks to the destination on behalf of callers.
///
/// Holds a single pooled [`Client`]; timeouts are applied per request so the
/// submission and connectivity-test paths can use different bounds.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    submit_timeout: Duration,
    test_timeout: Duration,
}

impl Forwarder {
    pub fn new(submit_timeout: Duration, test_timeout: Duration) -> Self {
        Forwarder {
            client: Client::new(),
            submit_timeout,
            test_timeout,
        }
    }

    /// POST a submission to the destination as JSON and normalise the answer
    pub async fn forward_json(
        &self,
        url: &str,
        submission: &Submission,
    ) -> Result<Value, ForwardError> {
        debug!("Forwarding submission to {url} as JSON");

        let response = self
            .client
            .post(url)
            .json(submission)
            .timeout(self.submit_timeout)
            .send()
            .await
            .map_err(|e| ForwardError::from_reqwest(e, self.submit_timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ForwardError::from_reqwest(e, self.submit_timeout))?;

        let result = normalize(status, &body)?;
        info!("Destination response: {result}");
        Ok(result)
    }

    /// POST a submission to the destination form-encoded.
    ///
    /// The body is not interpreted; an OK status is the acknowledgment.
    pub async fn forward_form(
        &self,
        url: &str,
        submission: &Submission,
    ) -> Result<(), ForwardError> {
        debug!("Forwarding submission to {url} form-encoded");

        let response = self
            .client
            .post(url)
            .form(&submission.form_fields())
            .timeout(self.submit_timeout)
            .send()
            .await
            .map_err(|e| ForwardError::from_reqwest(e, self.submit_timeout))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error(status))
        }
    }

    /// GET the candidate destination and report what came back
    pub async fn test_connection(&self, url: &str) -> Result<ConnectionReport, ForwardError> {
        debug!("Testing connection to {url}");

        let response = self
            .client
            .get(url)
            .timeout(self.test_timeout)
            .send()
            .await
            .map_err(|e| ForwardError::from_reqwest(e, self.test_timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ForwardError::from_reqwest(e, self.test_timeout))?;

        Ok(ConnectionReport {
            success: status.is_success(),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            data: serde_json::from_str(&text).unwrap_or(Value::String(text)),
        })
    }
}

fn status_error(status: StatusCode) -> ForwardError {
    ForwardError::Status {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
    }
}

/// Turn a destination answer into the value handed back to the caller.
///
/// - OK with a JSON body: the body, unless it explicitly says `success: false`
/// - OK with an empty or non-JSON body: an implied success
/// - non-OK: an error, using the body's `error` field when there is one
pub fn normalize(status: StatusCode, body: &str) -> Result<Value, ForwardError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if !status.is_success() {
        return Err(match parsed.as_ref().and_then(|v| v.get("error")) {
            Some(Value::String(error)) => ForwardError::Destination(error.clone()),
            _ => status_error(status),
        });
    }

    match parsed {
        Some(value) if value.get("success") == Some(&Value::Bool(false)) => {
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            Err(ForwardError::Destination(error.to_string()))
        }
        Some(value) => Ok(value),
        None => Ok(json!({
            "success": true,
            "message": "Form submitted successfully",
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_body_is_passed_through() {
        let value = normalize(StatusCode::OK, r#"{"success":true,"row":7}"#).unwrap();
        assert_eq!(value["row"], 7);
    }

    #[test]
    fn empty_or_text_body_is_an_implied_success() {
        for body in ["", "<html>Moved</html>"] {
            let value = normalize(StatusCode::OK, body).unwrap();
            assert_eq!(value["success"], true);
            assert_eq!(value["message"], "Form submitted successfully");
        }
    }

    #[test]
    fn explicit_failure_is_an_error() {
        let err = normalize(
            StatusCode::OK,
            r#"{"success":false,"error":"Missing required fields"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ForwardError::Destination(e) if e == "Missing required fields"));
    }

    #[test]
    fn non_ok_status_is_an_error() {
        let err = normalize(StatusCode::BAD_GATEWAY, "upstream down").unwrap_err();
        assert!(matches!(err, ForwardError::Status { status: 502, .. }));
        assert_eq!(err.to_string(), "Destination returned 502: Bad Gateway");

        let err = normalize(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"quota"}"#).unwrap_err();
        assert_eq!(err.to_string(), "Destination error: quota");
    }
}
