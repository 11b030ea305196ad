//! Integration tests for the read endpoints
//!
//! Drives traffic through the client owned by `AppState` and reads it back
//! through the router: `/actuator/callmeter`, `/metrics` and `/health`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use callmeter::config::Config;
use callmeter::handlers::{AppState, router};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_config() -> Config {
    let toml = r#"
[metrics]
prefix = "svc.http"

[metrics.extra_tags]
app = "billing"
"#;
    toml::from_str(toml).expect("should parse config")
}

async fn get_body(state: &AppState, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router(state.clone())
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("should read body");
    (status, body.to_vec())
}

#[tokio::test]
async fn test_snapshot_reflects_client_traffic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let state = AppState::new(Arc::new(create_test_config())).expect("should create state");
    let client = state.client();
    for _ in 0..2 {
        let response = client
            .send(client.get(format!("{}/ping", server.uri())))
            .await
            .expect("request should succeed");
        response.bytes().await.expect("body should read");
    }

    let (status, body) = get_body(&state, "/actuator/callmeter").await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_slice(&body).expect("should be JSON");
    assert_eq!(json["client"], "reqwest");
    assert_eq!(json["prefix"], "svc.http");

    let metrics = &json["metrics"];
    assert_eq!(metrics["svc.http.network.requests.submitted"], 2.0);
    assert_eq!(metrics["svc.http.network.requests.completed"], 2.0);
    assert_eq!(metrics["svc.http.network.requests.running"], 0.0);
    assert_eq!(metrics["svc.http.calls.started"], 2.0);
    assert_eq!(metrics["svc.http.calls.duration.count"], 2.0);
    assert_eq!(metrics["svc.http.responses.body.bytes.sum"], 8.0);
    assert_eq!(metrics["svc.http.pool.dispatcher.running.calls.count"], 0.0);
    assert!(metrics["svc.http.calls.duration.percentile.0.99"].is_number());
    assert!(
        metrics
            .as_object()
            .unwrap()
            .keys()
            .all(|key| key.starts_with("svc.http")),
        "only meters under the configured prefix are exported"
    );
}

#[tokio::test]
async fn test_prometheus_scrape_carries_extra_tags() {
    let state = AppState::new(Arc::new(create_test_config())).expect("should create state");

    let (status, body) = get_body(&state, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body).expect("should be UTF-8");
    assert!(text.contains("# TYPE svc_http_calls_started counter"));
    assert!(text.contains("svc_http_calls_started{app=\"billing\"} 0"));
    assert!(text.contains("svc_http_network_requests_duration_bucket"));
}

#[tokio::test]
async fn test_health_reports_operational() {
    let state = AppState::new(Arc::new(create_test_config())).expect("should create state");

    let (status, body) = get_body(&state, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "OK");
    assert_eq!(json["metrics_status"], "operational");
}
