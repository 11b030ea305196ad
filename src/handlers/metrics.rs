//! Prometheus metrics endpoint
//!
//! Exposes every registered meter in Prometheus text format for scraping.

use axum::{extract::State, http::StatusCode};

use crate::handlers::AppState;

/// Metrics handler for Prometheus scraping
///
/// Returns metrics in Prometheus text format.
///
/// # Response
///
/// - `200 OK` with metrics in Prometheus text format
/// - `500 Internal Server Error` if metrics collection fails
///
/// # Example
///
/// ```bash
/// curl http://localhost:9464/metrics
/// # HELP callmeter_calls_started callmeter.calls.started
/// # TYPE callmeter_calls_started counter
/// callmeter_calls_started 42
/// ```
pub async fn handler(State(state): State<AppState>) -> (StatusCode, String) {
    match state.registry().gather() {
        Ok(output) => (StatusCode::OK, output),
        Err(e) => {
            tracing::error!(
                error = %e,
                "Failed to gather metrics for Prometheus scraping"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::Tags;
    use std::sync::Arc;

    fn create_test_state() -> AppState {
        AppState::new(Arc::new(Config::default())).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_handler_returns_prometheus_format() {
        let state = create_test_state();
        state
            .registry()
            .counter("callmeter.calls.started", &Tags::empty())
            .unwrap()
            .inc();

        let (status, body) = handler(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("# HELP callmeter_calls_started callmeter.calls.started"));
        assert!(body.contains("# TYPE callmeter_calls_started counter"));
        assert!(body.contains("callmeter_calls_started 1"));
    }

    #[tokio::test]
    async fn test_concurrent_metrics_scraping() {
        let state = create_test_state();
        let mut handles = vec![];
        for _ in 0..10 {
            let state = state.clone();
            handles.push(tokio::spawn(async move { handler(State(state)).await }));
        }

        let results = futures::future::join_all(handles).await;
        let first_body = &results[0].as_ref().unwrap().1;
        for (idx, result) in results.iter().enumerate() {
            let (status, body) = result.as_ref().unwrap();
            assert_eq!(*status, StatusCode::OK, "request {idx} should succeed");
            assert_eq!(body, first_body, "scrape {idx} should be deterministic");
        }
    }

    #[tokio::test]
    async fn test_metrics_output_valid_prometheus_format() {
        let state = create_test_state();
        let (status, body) = handler(State(state)).await;
        assert_eq!(status, StatusCode::OK);

        let metric_lines: Vec<&str> = body
            .lines()
            .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
            .collect();
        assert!(!metric_lines.is_empty(), "client meters are registered at startup");

        let mut seen = std::collections::HashSet::new();
        for line in metric_lines {
            assert!(line.starts_with("callmeter_"), "unexpected line: {line}");

            let last_token = line.split_whitespace().last().unwrap();
            assert!(
                last_token.parse::<f64>().is_ok() || last_token == "+Inf" || last_token == "NaN",
                "line should end with a number: {line}"
            );

            let series = line.split_whitespace().next().unwrap();
            assert!(seen.insert(series.to_string()), "duplicate series: {series}");
        }
    }
}
