//! Wiremock integration tests for ApiClient.
//!
//! These tests verify credential handling, request shaping and response
//! classification against mocked responses.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use restash::client::token_fn;
use restash::{ApiClient, ApiResponse, ClientConfig, RequestInit, RestashError, StaticToken};
use serde_json::json;
use wiremock::matchers::{any, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(
        ClientConfig::new(server.uri()),
        Arc::new(StaticToken::new("test_token")),
    )
    .unwrap()
}

/// Test that every request carries the bearer credential and JSON content type.
#[tokio::test]
async fn test_request_sends_bearer_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/agents"))
        .and(header("Authorization", "Bearer test_token"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a1"}])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = client(&mock_server)
        .request("/agents", RequestInit::get())
        .await
        .expect("request should succeed");
    assert_eq!(response, ApiResponse::Json(json!([{"id": "a1"}])));
}

/// Test that a missing credential fails before any network I/O.
#[tokio::test]
async fn test_missing_token_sends_nothing() {
    let mock_server = MockServer::start().await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = ApiClient::new(
        ClientConfig::new(mock_server.uri()),
        Arc::new(StaticToken::none()),
    )
    .unwrap();
    let err = client
        .request("/agents", RequestInit::get())
        .await
        .unwrap_err();
    assert_eq!(err, RestashError::Auth);
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

/// Test that the token provider is consulted on every request.
#[tokio::test]
async fn test_token_is_fetched_per_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("Authorization", "Bearer token-0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(0)))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(header("Authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(1)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let client = ApiClient::new(
        ClientConfig::new(mock_server.uri()),
        Arc::new(token_fn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Some(format!("token-{n}")) }
        })),
    )
    .unwrap();

    let first: u32 = client.get_json("/x").await.unwrap();
    let second: u32 = client.get_json("/x").await.unwrap();
    assert_eq!((first, second), (0, 1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Test that a non-2xx response becomes HttpStatus with the body text.
#[tokio::test]
async fn test_error_status_carries_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/agents/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server)
        .request("/agents/missing", RequestInit::get())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RestashError::HttpStatus {
            status: 404,
            body: "not found".into()
        }
    );
    assert!(!err.is_transient());
}

/// Test that server errors are classified as transient.
#[tokio::test]
async fn test_server_error_is_transient() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server)
        .request("/agents", RequestInit::get())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(err.is_transient());
}

/// Test that 204 No Content yields an empty response.
#[tokio::test]
async fn test_no_content() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/agents/a1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let response = client(&mock_server)
        .request("/agents/a1", RequestInit::delete())
        .await
        .unwrap();
    assert_eq!(response, ApiResponse::Empty);
}

/// Test that non-JSON bodies are returned as text.
#[tokio::test]
async fn test_text_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let response = client(&mock_server)
        .request("/health", RequestInit::get())
        .await
        .unwrap();
    assert_eq!(response, ApiResponse::Text("ok".into()));
}

/// Test that a malformed JSON body is a decode error.
#[tokio::test]
async fn test_malformed_json_is_decode_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("{not json", "application/json"))
        .mount(&mock_server)
        .await;

    let err = client(&mock_server)
        .request("/agents", RequestInit::get())
        .await
        .unwrap_err();
    assert!(matches!(err, RestashError::Decode(_)));
}

/// Test that query parameters and JSON bodies are sent.
#[tokio::test]
async fn test_query_and_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/agents"))
        .and(query_param("dry_run", "true"))
        .and(body_json(json!({"name": "scout"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "a1", "name": "scout"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = client(&mock_server)
        .request(
            "/agents",
            RequestInit::post(json!({"name": "scout"})).query("dry_run", "true"),
        )
        .await
        .unwrap();
    assert_eq!(response, ApiResponse::Json(json!({"id": "a1", "name": "scout"})));
}

/// Test that an explicit Content-Type replaces the JSON default.
#[tokio::test]
async fn test_content_type_override() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(header("Content-Type", "application/merge-patch+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "a1"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    client(&mock_server)
        .request(
            "/agents/a1",
            RequestInit::patch(json!({"name": "renamed"}))
                .header("Content-Type", "application/merge-patch+json"),
        )
        .await
        .unwrap();
}

/// Test that an unreachable server is a network error.
#[tokio::test]
async fn test_unreachable_server() {
    let client = ApiClient::new(
        ClientConfig::new("http://127.0.0.1:1"),
        Arc::new(StaticToken::new("t")),
    )
    .unwrap();
    let err = client
        .request("/agents", RequestInit::get())
        .await
        .unwrap_err();
    assert!(matches!(err, RestashError::Network(_)));
    assert!(err.is_transient());
}
