//! HTTP route handlers for the health monitor API

use crate::{ApiError, AppResult, AppState};
use axum::{
    body::Bytes,
    extract::State,
    response::{Html, Json},
};
use chrono::Utc;
use serde_json::{json, Value};
use telemetry_store::{ConnectionStatus, PartialRecord};
use tracing::{debug, error, warn};

/// GET / - Status page with the latest readings and connection status
pub async fn index(State(state): State<AppState>) -> AppResult<Html<String>> {
    let record = state.telemetry.snapshot().await;
    let status = ConnectionStatus::evaluate(&record, Utc::now(), state.liveness_threshold);
    debug!(status = %status, "Rendering status page");

    let html = state
        .page
        .render(&record, status, state.liveness_threshold)
        .map_err(|e| {
            error!(error = %e, "Failed to render status page");
            ApiError::server_error()
        })?;
    Ok(Html(html))
}

/// GET /get_data - Current merged telemetry record
pub async fn get_data(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let record = state.telemetry.snapshot().await;

    serde_json::to_value(&record).map(Json).map_err(|e| {
        error!(error = %e, "Failed to serialize telemetry record");
        ApiError::server_error()
    })
}

/// POST /update - Merge a pushed partial record
///
/// The raw body is decoded here so an empty body, a non-object and a
/// malformed document each get their own rejection.
pub async fn update(State(state): State<AppState>, body: Bytes) -> AppResult<Json<Value>> {
    let partial = PartialRecord::from_slice(&body).map_err(|e| {
        debug!(error = %e, "Rejected telemetry update");
        ApiError::from(e)
    })?;

    if let Err(e) = state.telemetry.merge(&partial).await {
        warn!(error = %e, "Telemetry update applied in memory only");
    }

    Ok(Json(json!({ "status": "success" })))
}
