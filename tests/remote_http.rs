//! # HTTP transport against a mock backend
//!
//! Exercises [`HttpTransport`] + [`RemoteAnalysisClient`] over real HTTP
//! using `wiremock`, including the router's fallback when the backend
//! misbehaves.

use std::sync::Arc;
use std::time::Duration;

use hybrid_query_router::{
    HttpTransport, Query, QueryContext, QueryRouter, RemoteAnalysisClient, RemoteFailure,
    RouterConfig, ServedBy,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COMPLEX: &str = "correlation between income and age with confidence interval";

fn query() -> Query {
    Query::new(COMPLEX, QueryContext::new("county:27053", "scatter")).expect("test: query")
}

fn client(server: &MockServer) -> RemoteAnalysisClient {
    let transport = HttpTransport::new(server.uri()).expect("test: transport");
    RemoteAnalysisClient::new(Arc::new(transport))
}

const TIMEOUT: Duration = Duration::from_millis(500);

#[tokio::test]
async fn success_body_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/analyze"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "query": COMPLEX,
            "context": { "geo_scope": "county:27053", "analysis_hint": "scatter" },
            "requested_timeout_ms": 500
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "r": 0.42, "ci": [0.31, 0.53] },
            "model_metadata": { "model": "pearson-v2" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server)
        .analyze(&query(), TIMEOUT)
        .await
        .expect("test: success");
    assert_eq!(result.payload["r"], 0.42);
    assert_eq!(result.model_metadata, Some(json!({ "model": "pearson-v2" })));
}

#[tokio::test]
async fn slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/analyze"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "result": {} }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .analyze(&query(), Duration::from_millis(100))
        .await
        .expect_err("test: timeout");
    assert!(err.is_timeout(), "got {err:?}");
}

#[tokio::test]
async fn status_codes_map_to_failures() {
    let cases = [
        (429, json!({}), "rate_limited"),
        (503, json!({}), "unavailable"),
        (502, json!({}), "unavailable"),
        (500, json!({ "kind": "unavailable", "message": "warming up" }), "unavailable"),
        (400, json!({ "kind": "bad_request", "message": "nope" }), "invalid_response"),
        (418, json!("teapot"), "invalid_response"),
    ];
    for (status, body, kind) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/analyze"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;

        let err = client(&server)
            .analyze(&query(), TIMEOUT)
            .await
            .expect_err("test: failure");
        assert_eq!(err.kind(), kind, "status {status}");
    }
}

#[tokio::test]
async fn retry_after_header_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/analyze"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
        .mount(&server)
        .await;

    let err = client(&server)
        .analyze(&query(), TIMEOUT)
        .await
        .expect_err("test: rate limited");
    assert_eq!(
        err,
        RemoteFailure::RateLimited {
            retry_after_secs: Some(12)
        }
    );
}

#[tokio::test]
async fn malformed_success_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/analyze"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .analyze(&query(), TIMEOUT)
        .await
        .expect_err("test: invalid");
    assert!(matches!(err, RemoteFailure::InvalidResponse(_)));
}

#[tokio::test]
async fn unreachable_backend_is_unavailable() {
    // bind and drop to get a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("test: bind");
        listener.local_addr().expect("test: addr").port()
    };
    let transport = HttpTransport::new(format!("http://127.0.0.1:{port}")).expect("test: transport");
    let err = RemoteAnalysisClient::new(Arc::new(transport))
        .analyze(&query(), TIMEOUT)
        .await
        .expect_err("test: unreachable");
    assert_eq!(err.kind(), "unavailable");
}

#[tokio::test]
async fn router_from_config_uses_http_backend_and_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/analyze"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = RouterConfig {
        remote_base_url: Some(server.uri()),
        remote_timeout_ms: 500,
        ..RouterConfig::default()
    };
    let router = QueryRouter::from_config(&cfg).expect("test: router");
    let out = router
        .process(COMPLEX, QueryContext::new("county:27053", "scatter"))
        .await
        .expect("test: fallback answers");
    assert_eq!(out.served_by, ServedBy::RemoteFailedThenRuleBased);
}
