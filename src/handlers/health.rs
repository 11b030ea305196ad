//! Health check endpoint
//!
//! Provides a simple health check for monitoring and load balancers.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;
use crate::metrics::names;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Metric recording status: "operational" or "degraded"
    pub metrics_status: &'static str,
    /// Total metric recording failures since startup
    pub recording_failures: f64,
}

/// Health check handler
///
/// Returns 200 OK with service status and metric recording status.
///
/// Metric recording status is "degraded" if any lazy meter registration has
/// failed on the call path, otherwise "operational".
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let failures_name = names::join(&state.config().metrics.prefix, names::METRICS_RECORDING_FAILURES);
    let recording_failures: f64 = state
        .registry()
        .meters()
        .iter()
        .filter(|(id, _)| id.name() == failures_name)
        .filter_map(|(_, meter)| meter.value())
        .sum();

    let metrics_status = if recording_failures > 0.0 {
        "degraded"
    } else {
        "operational"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            metrics_status,
            recording_failures,
        }),
    )
}
