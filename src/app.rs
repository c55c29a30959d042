use axum::{
    Form, Json, Router,
    extract::{
        ConnectInfo, State,
        rejection::{FormRejection, JsonRejection},
    },
    http::{HeaderMap, HeaderValue, Method, header},
    response::IntoResponse,
    routing::{get, post},
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{ApiError, ForwardError};
use crate::forward::{ConnectionReport, Forwarder};
use crate::submission::{Submission, now_iso};

pub struct AppState {
    pub config: Config,
    pub forwarder: Forwarder,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let forwarder = Forwarder::new(config.forward_timeout, config.test_timeout);
        Arc::new(AppState { config, forwarder })
    }

    /// Wrap a forwarding failure, keeping the raw text only in development
    fn details(&self, err: &ForwardError) -> Option<String> {
        self.config.exposes_details().then(|| err.to_string())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    #[serde(flatten)]
    submission: Submission,

    /// Per-request destination override
    #[serde(default)]
    script_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestConnectionRequest {
    #[serde(default)]
    script_url: Option<String>,
}

#[derive(Serialize)]
struct SubmitResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    environment: String,
}

/// Build the proxy router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins(&state.config.cors_origins)))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health))
        .route("/api/submit", post(submit))
        .route("/api/submit-form", post(submit_form))
        .route("/api/test-connection", post(test_connection))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Origins usable together with credentialed CORS.
///
/// A wildcard cannot be combined with credentials, so `*` is dropped along
/// with anything that is not a valid header value.
fn allowed_origins(configured: &[String]) -> Vec<HeaderValue> {
    configured
        .iter()
        .filter_map(|origin| {
            if origin.trim() == "*" {
                warn!("Ignoring wildcard CORS origin, list the allowed origins explicitly");
                return None;
            }
            match HeaderValue::from_str(origin.trim()) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin {origin:?}");
                    None
                }
            }
        })
        .collect()
}

/// Start the proxy relay server and serve until Ctrl+C / SIGTERM
///
/// # Arguments
/// * `config` - Server configuration, usually from [`Config::load`]
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Error if binding or serving fails
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let address = config.address();

    info!("Environment: {}", config.environment);
    match &config.destination_url {
        Some(url) => info!("Default destination: {url}"),
        None => warn!("GOOGLE_SCRIPT_URL not set, submissions must carry a scriptUrl"),
    }

    let app = router(AppState::new(config));

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on http://{address}");
    info!("Health: http://{address}/health");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        timestamp: now_iso(),
        environment: state.config.environment.to_string(),
    })
}

/// Submitter details as seen by the server
fn observe(
    headers: &HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> (Option<String>, Option<String>) {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string);

    let ip = forwarded.or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()));

    (user_agent, ip)
}

fn destination_for(state: &AppState, requested: Option<&str>) -> Result<String, ApiError> {
    requested
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .or(state.config.destination_url.as_deref())
        .map(str::to_string)
        .ok_or(ApiError::NotConfigured)
}

async fn submit(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    request.submission.validate()?;

    let url = destination_for(&state, request.script_url.as_deref())?;
    let (user_agent, ip) = observe(&headers, peer);
    let submission = request.submission.stamped().observed(user_agent, ip);

    info!(
        "Received form submission from {} <{}>",
        submission.name, submission.email
    );

    match state.forwarder.forward_json(&url, &submission).await {
        Ok(data) => Ok(Json(SubmitResponse {
            success: true,
            message: "Form submitted successfully".to_string(),
            data: Some(data),
        })),
        Err(e) => {
            error!("Error submitting to destination: {e}");
            Err(ApiError::Forwarding {
                details: state.details(&e),
            })
        }
    }
}

async fn submit_form(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Form<Submission>, FormRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Form(submission) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    submission.validate()?;

    let url = destination_for(&state, None)?;
    let (user_agent, ip) = observe(&headers, peer);
    // the form endpoint always stamps with the server's clock
    let submission = Submission {
        timestamp: Some(now_iso()),
        ..submission
    }
    .observed(user_agent, ip);

    info!(
        "Received form submission (URL-encoded) from {} <{}>",
        submission.name, submission.email
    );

    match state.forwarder.forward_form(&url, &submission).await {
        Ok(()) => Ok(Json(SubmitResponse {
            success: true,
            message: "Form submitted successfully".to_string(),
            data: None,
        })),
        Err(e) => {
            error!("Error submitting form data: {e}");
            Err(ApiError::Forwarding {
                details: state.details(&e),
            })
        }
    }
}

async fn test_connection(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TestConnectionRequest>, JsonRejection>,
) -> Result<Json<ConnectionReport>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let url = request
        .script_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ApiError::BadRequest("scriptUrl is required".to_string()))?;

    info!("Testing connection to {url}");

    state
        .forwarder
        .test_connection(url)
        .await
        .map(Json)
        .map_err(|e| {
            error!("Connection test failed: {e}");
            ApiError::ConnectionTest {
                details: state.details(&e),
            }
        })
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        router(AppState::new(Config::default()))
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_environment() {
        let (status, body) = call(app(), Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "OK");
        assert_eq!(body["environment"], "development");
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_before_forwarding() {
        let (status, body) = call(app(), post_json("/api/submit", r#"{"name":"Jane"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(
            body["error"],
            "Missing required fields: name, email, and message are required"
        );
    }

    #[tokio::test]
    async fn bad_email_is_rejected() {
        let (status, body) = call(
            app(),
            post_json(
                "/api/submit",
                r#"{"name":"Jane","email":"not-an-email","message":"hi"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid email format");
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let (status, body) = call(app(), post_json("/api/submit", "{name:")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn no_destination_is_a_configuration_error() {
        let (status, body) = call(
            app(),
            post_json(
                "/api/submit",
                r#"{"name":"Jane","email":"jane@x.com","message":"hi"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Destination URL is not configured");
    }

    #[tokio::test]
    async fn test_connection_requires_a_url() {
        let (status, body) = call(app(), post_json("/api/test-connection", "{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "scriptUrl is required");
    }

    #[tokio::test]
    async fn unknown_route_is_a_json_404() {
        let (status, body) = call(app(), Request::get("/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Endpoint not found");
    }

    #[tokio::test]
    async fn wildcard_origin_is_dropped_instead_of_panicking() {
        let origins = vec![
            "*".to_string(),
            "http://localhost:5500".to_string(),
            "bad\norigin".to_string(),
        ];
        assert_eq!(
            allowed_origins(&origins),
            [HeaderValue::from_static("http://localhost:5500")]
        );

        let config = Config {
            cors_origins: vec!["*".to_string()],
            ..Config::default()
        };
        let (status, _) = call(
            router(AppState::new(config)),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn numeric_optional_fields_are_accepted() {
        let (status, body) = call(
            app(),
            post_json(
                "/api/submit",
                r#"{"name":"Jane","email":"jane@x.com","message":"hi","phone":5550100}"#,
            ),
        )
        .await;
        // validation passed; only the missing destination stops it
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Destination URL is not configured");
    }

    #[test]
    fn forwarded_for_wins_over_peer_address() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static("curl/8"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let peer = || Some(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000))));

        let (user_agent, ip) = observe(&headers, peer());
        assert_eq!(user_agent.as_deref(), Some("curl/8"));
        assert_eq!(ip.as_deref(), Some("203.0.113.9"));

        let (_, ip) = observe(&HeaderMap::new(), peer());
        assert_eq!(ip.as_deref(), Some("127.0.0.1"));
    }
}
