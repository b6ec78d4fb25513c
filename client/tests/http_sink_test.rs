//! Integration tests for the HTTP sink against a mock ingestion endpoint.

use std::time::Duration;

use astronomer_client::config::Settings;
use astronomer_client::sink::{AnalyticsSink, HttpSink, HttpSinkConfig, SinkError};
use astronomer_client::types::{MessageKind, Properties, Traits};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Test Helpers
// =============================================================================

fn create_test_sink(server_url: &str) -> HttpSink {
    let sink = HttpSink::new(HttpSinkConfig::new(server_url)).unwrap();
    sink.initialize(&Settings::new("app-1"));
    sink
}

/// Waits until the mock server has seen `count` requests.
async fn wait_for_requests(server: &MockServer, count: usize) -> Vec<wiremock::Request> {
    for _ in 0..100 {
        let requests = server.received_requests().await.unwrap_or_default();
        if requests.len() >= count {
            return requests;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {count} requests");
}

// =============================================================================
// Delivery Tests
// =============================================================================

#[tokio::test]
async fn test_send_posts_track_with_app_id_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/track"))
        .and(header("X-Astronomer-App-Id", "app-1"))
        .and(body_partial_json(json!({
            "type": "track",
            "appId": "app-1",
            "event": "Called foo Method"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sink = create_test_sink(&mock_server.uri());
    let message = sink
        .message(MessageKind::Track {
            event: "Called foo Method".to_string(),
            properties: Properties::new(),
        })
        .unwrap();

    let result = sink.send(&message).await;
    assert!(result.is_ok(), "Send should succeed: {:?}", result);
}

#[tokio::test]
async fn test_server_error_is_reported_with_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/page"))
        .respond_with(ResponseTemplate::new(500).set_body_string("ingestion down"))
        .mount(&mock_server)
        .await;

    let sink = create_test_sink(&mock_server.uri());
    let message = sink
        .message(MessageKind::Page {
            name: "Home".to_string(),
            properties: Properties::new(),
        })
        .unwrap();

    match sink.send(&message).await {
        Err(SinkError::ServerError { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "ingestion down");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_message_before_initialize_is_rejected() {
    let sink = HttpSink::new(HttpSinkConfig::new("http://127.0.0.1:9")).unwrap();
    let result = sink.message(MessageKind::Track {
        event: "x".to_string(),
        properties: Properties::new(),
    });
    assert!(matches!(result, Err(SinkError::NotInitialized)));
}

#[tokio::test]
async fn test_trait_calls_are_dispatched_in_background() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let sink = create_test_sink(&format!("{}/", mock_server.uri()));
    sink.identify(Some("u1"), &Traits::with_email("a@b.c"));

    let requests = wait_for_requests(&mock_server, 1).await;
    assert_eq!(requests[0].url.path(), "/v1/identify");

    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["type"], "identify");
    assert_eq!(body["userId"], "u1");
    assert_eq!(body["traits"], json!({ "email": "a@b.c" }));
    assert!(body["messageId"].is_string());
}

#[test]
fn test_dispatch_without_runtime_drops_silently() {
    let sink = create_test_sink("http://127.0.0.1:9");
    sink.track("Called foo Method", &Properties::new());
}
