use std::time::Duration;

use thiserror::Error;

/// Presence and format checks on a submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required fields: name, email, and message are required")]
    MissingFields,

    #[error("Invalid email format")]
    InvalidEmail,
}

/// Why the client relay could not deliver a submission
#[derive(Error, Debug)]
pub enum RelayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("No destination URL configured; set one before submitting")]
    NotConfigured,

    #[error("Destination rejected the submission: {0}")]
    Rejected(String),

    #[error("All transports failed; last error: {0}")]
    Exhausted(String),
}

/// Failure talking to the destination from the proxy
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Request to destination failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Destination did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Destination returned {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("Destination error: {0}")]
    Destination(String),
}

impl ForwardError {
    /// Classify a reqwest failure, keeping timeouts distinct
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ForwardError::Timeout(timeout)
        } else {
            ForwardError::Request(err)
        }
    }
}

/// Problems reading or writing the client settings file
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "web")]
pub use api::ApiError;

#[cfg(feature = "web")]
mod api {
    use axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    use serde::Serialize;
    use thiserror::Error;

    use super::ValidationError;

    /// Errors returned by the proxy's HTTP handlers, rendered as the JSON envelope
    /// `{ success: false, error, details? }`.
    ///
    /// `details` is only ever populated by handlers running in development mode.
    #[derive(Error, Debug)]
    pub enum ApiError {
        #[error("{0}")]
        BadRequest(String),

        #[error(transparent)]
        Validation(#[from] ValidationError),

        #[error("Destination URL is not configured")]
        NotConfigured,

        #[error("Failed to submit form. Please try again later.")]
        Forwarding { details: Option<String> },

        #[error("Connection test failed")]
        ConnectionTest { details: Option<String> },

        #[error("Endpoint not found")]
        NotFound,
    }

    #[derive(Serialize)]
    struct ErrorEnvelope {
        success: bool,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    }

    impl ApiError {
        pub fn status(&self) -> StatusCode {
            match self {
                ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
                ApiError::NotFound => StatusCode::NOT_FOUND,
                ApiError::NotConfigured
                | ApiError::Forwarding { .. }
                | ApiError::ConnectionTest { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            let status = self.status();
            let error = self.to_string();
            let details = match self {
                ApiError::Forwarding { details } | ApiError::ConnectionTest { details } => details,
                _ => None,
            };

            (
                status,
                Json(ErrorEnvelope {
                    success: false,
                    error,
                    details,
                }),
            )
                .into_response()
        }
    }
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use axum::{body::to_bytes, http::StatusCode, response::IntoResponse};
    use serde_json::Value;

    use super::*;

    async fn envelope(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn validation_errors_are_bad_requests() {
        let (status, body) = envelope(ValidationError::InvalidEmail.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Invalid email format");
    }

    #[tokio::test]
    async fn forwarding_details_are_omitted_when_absent() {
        let (status, body) = envelope(ApiError::Forwarding { details: None }).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to submit form. Please try again later.");
        assert!(body.get("details").is_none());

        let (_, body) = envelope(ApiError::Forwarding {
            details: Some("connection refused".to_string()),
        })
        .await;
        assert_eq!(body["details"], "connection refused");
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let (status, body) = envelope(ApiError::NotFound).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Endpoint not found");
    }
}
