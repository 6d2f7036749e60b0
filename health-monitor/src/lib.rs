//! Health Monitor - ingests device telemetry and serves the current record
//!
//! A NATS subscriber and the `POST /update` endpoint both merge partial
//! records into one shared [`TelemetryState`]; `GET /get_data` and the status
//! page read it.

pub mod config;
pub mod page;
pub mod routes;
pub mod subscriber;

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use telemetry_store::{RecordError, TelemetryState};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use page::StatusPage;
pub use subscriber::{connect_nats, InboundMessage, IngestError, TelemetrySource, TelemetrySubscriber};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub telemetry: Arc<TelemetryState>,
    pub page: Arc<StatusPage>,
    pub liveness_threshold: Duration,
}

impl AppState {
    pub fn new(telemetry: Arc<TelemetryState>, liveness_threshold: Duration) -> Result<Self> {
        let page = StatusPage::new().context("Failed to load status page template")?;
        Ok(Self {
            telemetry,
            page: Arc::new(page),
            liveness_threshold,
        })
    }
}

/// Error response rendered as `{"error": message}`
#[derive(Debug)]
pub struct ApiError {
    pub status_code: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status_code: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    /// Internal faults never expose details to the client.
    pub fn server_error() -> Self {
        ApiError {
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Server error".to_string(),
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Empty => ApiError::bad_request("No data provided"),
            RecordError::Malformed { .. } | RecordError::NotAnObject => {
                ApiError::bad_request("Invalid JSON")
            }
            RecordError::NonNumericField { .. } => ApiError::bad_request(err.to_string()),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code, Json(json!({ "error": self.message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, ApiError>;

/// Health check endpoint
async fn healthz() -> impl IntoResponse {
    "OK"
}

/// Create the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/get_data", get(routes::get_data))
        .route("/update", post(routes::update))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
