//! Request Router Validation Tests
//!
//! Drives the router in-process (no listener) and checks the
//! authorization and malformed-request paths:
//! - Wrong content type is a 400 with the JSON error body.
//! - Unknown and inactive api keys are 401.
//! - Sanitization rejections are 401.
//! - Success bodies carry the `<request_type>-response` key.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::Value;
use stormcloud::server::{api_routes, AppState, Catalog, StorageLayout};
use tempfile::TempDir;
use tower::ServiceExt;

fn test_state(dir: &TempDir) -> Arc<AppState> {
    let catalog = Catalog::open_in_memory().unwrap();
    catalog.seed_api_key("live-key", 1, true).unwrap();
    catalog.seed_api_key("lapsed-key", 2, false).unwrap();

    Arc::new(AppState {
        catalog,
        storage: StorageLayout::new(dir.path().join("storage"), 3),
        max_restore_bytes: 300 * 1024 * 1024,
    })
}

async fn post_json(state: Arc<AppState>, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = api_routes(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_hello_success_body() {
    let dir = TempDir::new().unwrap();
    let (status, body) = post_json(
        test_state(&dir),
        "/api/hello",
        serde_json::json!({"request_type": "hello"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hello-response"], "Goodbye");
}

#[tokio::test]
async fn test_wrong_content_type_is_400() {
    let dir = TempDir::new().unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/api/keepalive")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("request_type=keepalive"))
        .unwrap();

    let response = api_routes(test_state(&dir)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "Request must be JSON.");
}

#[tokio::test]
async fn test_unknown_api_key_is_401() {
    let dir = TempDir::new().unwrap();
    let (status, body) = post_json(
        test_state(&dir),
        "/api/validate-api-key",
        serde_json::json!({"request_type": "validate_api_key", "api_key": "ghost"}),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_inactive_api_key_is_401_with_reason() {
    let dir = TempDir::new().unwrap();
    let (status, body) = post_json(
        test_state(&dir),
        "/api/validate-api-key",
        serde_json::json!({"request_type": "validate_api_key", "api_key": "lapsed-key"}),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "API key is not active.");
}

#[tokio::test]
async fn test_valid_api_key_accepted() {
    let dir = TempDir::new().unwrap();
    let (status, body) = post_json(
        test_state(&dir),
        "/api/validate-api-key",
        serde_json::json!({"request_type": "validate_api_key", "api_key": "live-key"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["validate_api_key-response"], "Valid API key.");
}

#[tokio::test]
async fn test_sanitize_rejects_sql_characters() {
    let dir = TempDir::new().unwrap();
    let (status, _body) = post_json(
        test_state(&dir),
        "/api/keepalive",
        serde_json::json!({
            "request_type": "keepalive",
            "api_key": "x\" OR 1=1 --",
            "agent_id": "agent",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_keepalive_for_unknown_device_is_401() {
    let dir = TempDir::new().unwrap();
    let (status, _body) = post_json(
        test_state(&dir),
        "/api/keepalive",
        serde_json::json!({
            "request_type": "keepalive",
            "api_key": "live-key",
            "agent_id": "never-registered",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_envelope_is_400() {
    let dir = TempDir::new().unwrap();
    let (status, body) = post_json(
        test_state(&dir),
        "/api/keepalive",
        serde_json::json!({"request_type": "keepalive"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Bad request.");
}

#[tokio::test]
async fn test_device_status_reports_silent_devices() {
    let dir = TempDir::new().unwrap();
    let catalog = Catalog::open(&dir.path().join("catalog.db")).unwrap();
    catalog.seed_api_key("live-key", 1, true).unwrap();
    let device = catalog
        .register_device(1, "laptop", "10.0.0.2", "workstation", "linux", 0)
        .unwrap();

    // Registration counts as a callback, so the fleet starts online.
    let state = Arc::new(AppState {
        catalog,
        storage: StorageLayout::new(dir.path().join("storage"), 3),
        max_restore_bytes: 300 * 1024 * 1024,
    });
    let (status, body) = post_json(
        state.clone(),
        "/api/device-status",
        serde_json::json!({"request_type": "device_status", "api_key": "live-key"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["offline_agents"], serde_json::json!([]));

    // Two days of silence: rewind last_callback through a second handle.
    {
        let conn = rusqlite::Connection::open(dir.path().join("catalog.db")).unwrap();
        let stale = (chrono::Utc::now() - chrono::Duration::hours(48)).to_rfc3339();
        conn.execute(
            "UPDATE devices SET last_callback = ?1 WHERE device_id = ?2",
            rusqlite::params![stale, device.device_id],
        )
        .unwrap();
    }

    let (status, body) = post_json(
        state,
        "/api/device-status",
        serde_json::json!({"request_type": "device_status", "api_key": "live-key"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["offline_agents"][0], device.agent_id);
}

#[tokio::test]
async fn test_device_status_requires_valid_api_key() {
    let dir = TempDir::new().unwrap();
    let (status, _body) = post_json(
        test_state(&dir),
        "/api/device-status",
        serde_json::json!({"request_type": "device_status", "api_key": "ghost"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_restore_unknown_file_is_400() {
    let dir = TempDir::new().unwrap();
    let state = test_state(&dir);
    let device = state
        .catalog
        .register_device(1, "box", "10.0.0.9", "server", "linux", 0)
        .unwrap();

    let encoded_path = {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode("/no/such/file.txt")
    };
    let (status, _body) = post_json(
        state,
        "/api/restore-file",
        serde_json::json!({
            "request_type": "restore_file",
            "api_key": "live-key",
            "agent_id": device.agent_id,
            "file_path": encoded_path,
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
