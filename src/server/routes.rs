//! Request router
//!
//! One handler per request type. Every handler follows the same shape:
//! enforce the content type, parse the typed envelope, run the sanitize
//! filter and credential checks, then dispatch to storage/catalog.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::observability::Logger;
use crate::protocol::request::{
    BackupFileEnvelope, DeviceStatusRequest, FileMetadataRequest, HelloRequest, KeepaliveRequest,
    MarkFileRestoredRequest, QueueFileForRestoreRequest, RegisterNewDeviceRequest, RequestType,
    RestoreFileInfoRequest, RestoreFileRequest, ValidateApiKeyRequest,
};
use crate::protocol::response::{success_body, ErrorResponse};
use crate::protocol::ClientPath;
use crate::transport::STREAM_THRESHOLD_BYTES;

use super::auth::{require_customer, require_device, require_request_type, sanitize_fields};
use super::catalog::{Catalog, Device};
use super::errors::{ServerError, ServerResult};
use super::storage::StorageLayout;

/// Shared state for all handlers.
pub struct AppState {
    pub catalog: Catalog,
    pub storage: StorageLayout,
    /// Largest body the non-chunked restore path will serve.
    pub max_restore_bytes: u64,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: ServerError) -> ApiError {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse { error: e.to_string() }))
}

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: message.to_string() }),
    )
}

/// Build the API router.
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/hello", post(hello_handler))
        .route("/api/validate-api-key", post(validate_api_key_handler))
        .route("/api/register-new-device", post(register_new_device_handler))
        .route(
            "/api/backup-file",
            post(backup_file_handler).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/backup-file-stream",
            post(backup_file_stream_handler).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/keepalive", post(keepalive_handler))
        .route("/api/queue-file-for-restore", post(queue_file_for_restore_handler))
        .route("/api/restore-file", post(restore_file_handler))
        .route("/api/restore-file-info", post(restore_file_info_handler))
        .route("/api/file-metadata", post(file_metadata_handler))
        .route("/api/mark-file-restored", post(mark_file_restored_handler))
        .route("/api/device-status", post(device_status_handler))
        .with_state(state)
}

/// Parse a JSON request body, enforcing the content type the way the
/// endpoints always have: wrong content type is a 400, not a 415.
fn parse_json<T: DeserializeOwned>(headers: &HeaderMap, body: &[u8]) -> Result<T, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("application/json") {
        return Err(bad_request("Request must be JSON."));
    }
    serde_json::from_slice(body).map_err(|_| bad_request("Bad request."))
}

// ---- control endpoints ----

async fn hello_handler(headers: HeaderMap, body: Bytes) -> Result<Json<Value>, ApiError> {
    let request: HelloRequest = parse_json(&headers, &body)?;
    if let Some(api_key) = &request.api_key {
        sanitize_fields(&[("api_key", api_key)]).map_err(api_error)?;
    }
    Ok(Json(success_body(RequestType::Hello, "Goodbye")))
}

async fn validate_api_key_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: ValidateApiKeyRequest = parse_json(&headers, &body)?;
    sanitize_fields(&[("api_key", &request.api_key)]).map_err(api_error)?;
    require_customer(&state.catalog, &request.api_key).map_err(api_error)?;
    Ok(Json(success_body(RequestType::ValidateApiKey, "Valid API key.")))
}

async fn register_new_device_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: RegisterNewDeviceRequest = parse_json(&headers, &body)?;
    sanitize_fields(&[
        ("api_key", &request.api_key),
        ("device_name", &request.survey.device_name),
        ("ip_address", &request.survey.ip_address),
        ("device_type", &request.survey.device_type),
        ("operating_system", &request.survey.operating_system),
    ])
    .map_err(api_error)?;

    let customer_id = require_customer(&state.catalog, &request.api_key).map_err(api_error)?;
    let device = state
        .catalog
        .register_device(
            customer_id,
            &request.survey.device_name,
            &request.survey.ip_address,
            &request.survey.device_type,
            &request.survey.operating_system,
            request.survey.device_status,
        )
        .map_err(api_error)?;

    // Per-device key material: issued at registration, carried by the
    // client, not used on the data path (TLS protects the wire).
    let mut key_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key_bytes);
    let secret_key = BASE64.encode(key_bytes);

    Logger::info(
        "device_registered",
        &[
            ("agent_id", &device.agent_id),
            ("customer_id", &customer_id.to_string()),
        ],
    );

    let mut response = success_body(RequestType::RegisterNewDevice, "thanks for the device");
    response["secret_key"] = Value::String(secret_key);
    response["agent_id"] = Value::String(device.agent_id);
    Ok(Json(response))
}

async fn keepalive_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: KeepaliveRequest = parse_json(&headers, &body)?;
    require_request_type(RequestType::Keepalive, request.request_type).map_err(api_error)?;
    sanitize_fields(&[("api_key", &request.api_key), ("agent_id", &request.agent_id)])
        .map_err(api_error)?;

    let device =
        require_device(&state.catalog, &request.api_key, &request.agent_id).map_err(api_error)?;
    state.catalog.record_keepalive(device.device_id).map_err(api_error)?;
    let pending = state.catalog.pending_restores(device.device_id).map_err(api_error)?;

    let mut response = success_body(RequestType::Keepalive, "ok");
    response["restore_queue"] = serde_json::to_value(pending).unwrap_or_default();
    Ok(Json(response))
}

// ---- uploads ----

async fn backup_file_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut envelope: Option<BackupFileEnvelope> = None;
    let mut content: Option<Vec<u8>> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| bad_request("Request must be multipart/form-data."))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "json" => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| bad_request("Bad request."))?;
                envelope =
                    Some(serde_json::from_str(&text).map_err(|_| bad_request("Bad request."))?);
            }
            "file_content" => {
                let mut buf = Vec::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|_| bad_request("Bad request."))?
                {
                    buf.extend_from_slice(&chunk);
                    if buf.len() as u64 > STREAM_THRESHOLD_BYTES {
                        return Err(api_error(ServerError::FileTooLarge(
                            buf.len() as u64,
                            STREAM_THRESHOLD_BYTES,
                        )));
                    }
                }
                content = Some(buf);
            }
            _ => {}
        }
    }

    let envelope = envelope.ok_or_else(|| bad_request("Bad request."))?;
    let content = content.ok_or_else(|| bad_request("Bad request."))?;

    let device = authorize_upload(&state, &envelope).map_err(api_error)?;
    let client_path =
        ClientPath::from_base64(&envelope.file_path).map_err(|_| bad_request("Bad request."))?;

    let canonical = state
        .storage
        .server_path(device.customer_id, device.device_id, &client_path);
    let written = state
        .storage
        .write_file(&canonical, &content)
        .map_err(api_error)?;
    state
        .catalog
        .upsert_file(
            device.device_id,
            client_path.raw(),
            &client_path.as_posix(),
            &canonical.display().to_string(),
            written,
        )
        .map_err(api_error)?;

    Logger::info(
        "file_stored",
        &[
            ("agent_id", &device.agent_id),
            ("path", &client_path.as_posix()),
            ("bytes", &written.to_string()),
        ],
    );

    Ok(Json(success_body(RequestType::BackupFile, "Received file successfully.")))
}

async fn backup_file_stream_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut fields: HashMap<String, String> = HashMap::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| bad_request("Request must be multipart/form-data."))?
    {
        let name = field.name().unwrap_or("").to_string();

        if name != "file_content" {
            let text = field.text().await.map_err(|_| bad_request("Bad request."))?;
            fields.insert(name, text);
            continue;
        }

        // All scalar fields precede the body; authorize before accepting
        // the first byte.
        let envelope = envelope_from_fields(&fields)?;
        let device = authorize_upload(&state, &envelope).map_err(api_error)?;
        let client_path = ClientPath::from_base64(&envelope.file_path)
            .map_err(|_| bad_request("Bad request."))?;

        let canonical = state
            .storage
            .server_path(device.customer_id, device.device_id, &client_path);
        let mut pending = state.storage.begin_write(&canonical).map_err(api_error)?;

        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(e) = pending.append(&chunk) {
                        pending.abort();
                        return Err(api_error(e));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    pending.abort();
                    return Err(bad_request("Bad request."));
                }
            }
        }

        let written = pending.commit().map_err(api_error)?;
        state
            .catalog
            .upsert_file(
                device.device_id,
                client_path.raw(),
                &client_path.as_posix(),
                &canonical.display().to_string(),
                written,
            )
            .map_err(api_error)?;

        Logger::info(
            "file_stored_stream",
            &[
                ("agent_id", &device.agent_id),
                ("path", &client_path.as_posix()),
                ("bytes", &written.to_string()),
            ],
        );

        return Ok(Json(success_body(
            RequestType::BackupFileStream,
            "Received file successfully.",
        )));
    }

    Err(bad_request("Bad request."))
}

fn envelope_from_fields(fields: &HashMap<String, String>) -> Result<BackupFileEnvelope, ApiError> {
    let get = |key: &str| {
        fields
            .get(key)
            .cloned()
            .ok_or_else(|| bad_request("Bad request."))
    };
    let request_type =
        RequestType::parse(&get("request_type")?).map_err(|_| bad_request("Bad request."))?;
    Ok(BackupFileEnvelope {
        request_type,
        api_key: get("api_key")?,
        agent_id: get("agent_id")?,
        file_path: get("file_path")?,
    })
}

fn authorize_upload(state: &AppState, envelope: &BackupFileEnvelope) -> ServerResult<Device> {
    if !matches!(
        envelope.request_type,
        RequestType::BackupFile | RequestType::BackupFileStream
    ) {
        return Err(ServerError::BadRequest);
    }
    sanitize_fields(&[
        ("api_key", &envelope.api_key),
        ("agent_id", &envelope.agent_id),
        ("file_path", &envelope.file_path),
    ])?;
    require_device(&state.catalog, &envelope.api_key, &envelope.agent_id)
}

// ---- restores ----

async fn queue_file_for_restore_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: QueueFileForRestoreRequest = parse_json(&headers, &body)?;
    sanitize_fields(&[
        ("api_key", &request.api_key),
        ("agent_id", &request.agent_id),
        ("file_path", &request.file_path),
        ("version_id", request.version_id.as_deref().unwrap_or("")),
    ])
    .map_err(api_error)?;

    let device =
        require_device(&state.catalog, &request.api_key, &request.agent_id).map_err(api_error)?;
    let file = state
        .catalog
        .file_by_posix(device.device_id, &request.file_path)
        .map_err(api_error)?
        .ok_or_else(|| api_error(ServerError::UnknownFile(request.file_path.clone())))?;

    state
        .catalog
        .queue_restore(file.file_id, request.version_id.as_deref())
        .map_err(api_error)?;

    Ok(Json(success_body(
        RequestType::QueueFileForRestore,
        "Successfully added file to restore queue.",
    )))
}

async fn restore_file_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request: RestoreFileRequest = parse_json(&headers, &body)?;
    sanitize_fields(&[
        ("api_key", &request.api_key),
        ("agent_id", &request.agent_id),
        ("file_path", &request.file_path),
        ("version_id", request.version_id.as_deref().unwrap_or("")),
    ])
    .map_err(api_error)?;

    let device =
        require_device(&state.catalog, &request.api_key, &request.agent_id).map_err(api_error)?;
    let client_path =
        ClientPath::from_base64(&request.file_path).map_err(|_| bad_request("Bad request."))?;

    let disk_path = resolve_version_path(&state, &device, &client_path, request.version_id.as_deref())
        .map_err(api_error)?;
    let total = state.storage.file_size(&disk_path).map_err(api_error)?;

    // Ranged restore: raw body, 206.
    if let Some(range_header) = headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        let (offset, length) = parse_range(range_header)
            .ok_or_else(|| api_error(ServerError::InvalidRange(range_header.to_string())))?;
        let bytes = state
            .storage
            .read_range(&disk_path, offset, length)
            .map_err(api_error)?;

        let end = offset + bytes.len() as u64 - 1;
        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", offset, end, total)
                .parse()
                .expect("valid content-range"),
        );
        return Ok((StatusCode::PARTIAL_CONTENT, response_headers, bytes).into_response());
    }

    // Single-shot restore: JSON with base64 content, bounded.
    if total > state.max_restore_bytes {
        return Err(api_error(ServerError::FileTooLarge(total, state.max_restore_bytes)));
    }

    let content = state.storage.read_file(&disk_path).map_err(api_error)?;
    let mut response = success_body(RequestType::RestoreFile, "File incoming");
    response["file_content"] = Value::String(BASE64.encode(content));
    Ok(Json(response).into_response())
}

async fn restore_file_info_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: RestoreFileInfoRequest = parse_json(&headers, &body)?;
    sanitize_fields(&[
        ("api_key", &request.api_key),
        ("agent_id", &request.agent_id),
        ("file_path", &request.file_path),
    ])
    .map_err(api_error)?;

    let device =
        require_device(&state.catalog, &request.api_key, &request.agent_id).map_err(api_error)?;
    let client_path =
        ClientPath::from_base64(&request.file_path).map_err(|_| bad_request("Bad request."))?;

    let disk_path =
        resolve_version_path(&state, &device, &client_path, None).map_err(api_error)?;
    let size = state.storage.file_size(&disk_path).map_err(api_error)?;

    let mut response = success_body(RequestType::RestoreFileInfo, "ok");
    response["size"] = Value::from(size);
    Ok(Json(response))
}

async fn file_metadata_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: FileMetadataRequest = parse_json(&headers, &body)?;
    sanitize_fields(&[("api_key", &request.api_key), ("agent_id", &request.agent_id)])
        .map_err(api_error)?;

    let device =
        require_device(&state.catalog, &request.api_key, &request.agent_id).map_err(api_error)?;
    let records = state.catalog.metadata_for_device(device.device_id).map_err(api_error)?;

    let mut response = success_body(RequestType::FileMetadata, "ok");
    response["data"] = serde_json::to_value(records).unwrap_or_default();
    Ok(Json(response))
}

async fn mark_file_restored_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: MarkFileRestoredRequest = parse_json(&headers, &body)?;
    sanitize_fields(&[
        ("api_key", &request.api_key),
        ("agent_id", &request.agent_id),
        ("file_path", &request.file_path),
    ])
    .map_err(api_error)?;

    let device =
        require_device(&state.catalog, &request.api_key, &request.agent_id).map_err(api_error)?;
    let cleared = state
        .catalog
        .mark_restored(device.device_id, &request.file_path)
        .map_err(api_error)?;

    let message = if cleared > 0 {
        "Marked restored."
    } else {
        "Nothing pending."
    };
    Ok(Json(success_body(RequestType::MarkFileRestored, message)))
}

/// Liveness report for a customer's fleet: devices silent for more than a
/// day are reported offline.
async fn device_status_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: DeviceStatusRequest = parse_json(&headers, &body)?;
    sanitize_fields(&[("api_key", &request.api_key)]).map_err(api_error)?;

    let customer_id = require_customer(&state.catalog, &request.api_key).map_err(api_error)?;
    let offline = state
        .catalog
        .offline_agent_ids(customer_id)
        .map_err(api_error)?;

    let mut response = success_body(RequestType::DeviceStatus, "ok");
    response["offline_agents"] = serde_json::to_value(offline).unwrap_or_default();
    Ok(Json(response))
}

/// Map (client path, optional version id) to the on-disk file to serve.
fn resolve_version_path(
    state: &AppState,
    device: &Device,
    client_path: &ClientPath,
    version_id: Option<&str>,
) -> ServerResult<std::path::PathBuf> {
    let posix = client_path.as_posix();
    let file = state
        .catalog
        .file_by_posix(device.device_id, &posix)?
        .ok_or_else(|| ServerError::UnknownFile(posix.clone()))?;

    let canonical = state
        .storage
        .server_path(device.customer_id, device.device_id, client_path);

    match version_id {
        None => Ok(canonical),
        Some(version_id) => {
            let rank = state.catalog.version_rank(file.file_id, version_id)?;
            if rank == 0 {
                return Ok(canonical);
            }
            let slot = rank + 1;
            if slot > state.storage.max_versions() {
                return Err(ServerError::UnknownVersion(version_id.to_string()));
            }
            let path = state.storage.version_path(&canonical, slot);
            if !path.exists() {
                return Err(ServerError::UnknownVersion(version_id.to_string()));
            }
            Ok(path)
        }
    }
}

/// Parse an inclusive `bytes=a-b` range into (offset, length).
fn parse_range(header: &str) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = end.parse().ok()?;
    if end < start {
        return None;
    }
    Some((start, end - start + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=0-15"), Some((0, 16)));
        assert_eq!(parse_range("bytes=16777216-33554431"), Some((16_777_216, 16_777_216)));
        assert_eq!(parse_range("bytes=5-5"), Some((5, 1)));
        assert_eq!(parse_range("bytes=9-5"), None);
        assert_eq!(parse_range("octets=0-5"), None);
        assert_eq!(parse_range("bytes=0-"), None);
    }

    #[test]
    fn test_envelope_from_fields_requires_all() {
        let mut fields = HashMap::new();
        fields.insert("request_type".to_string(), "backup_file_stream".to_string());
        fields.insert("api_key".to_string(), "k".to_string());
        fields.insert("agent_id".to_string(), "a".to_string());
        assert!(envelope_from_fields(&fields).is_err());

        fields.insert("file_path".to_string(), "L3RtcC9h".to_string());
        let envelope = envelope_from_fields(&fields).unwrap();
        assert_eq!(envelope.request_type, RequestType::BackupFileStream);
    }
}
