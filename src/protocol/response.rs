//! Typed response payloads
//!
//! Success bodies carry a `<request_type>-response` field plus any payload;
//! failures carry `{error}` and an HTTP status code.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::request::RequestType;

/// Failure body shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Build a bare success body for a request type.
pub fn success_body(request_type: RequestType, message: &str) -> Value {
    let mut body = Map::new();
    body.insert(
        request_type.response_key(),
        Value::String(message.to_string()),
    );
    Value::Object(body)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNewDeviceResponse {
    pub secret_key: String,
    pub agent_id: String,
}

/// One pending restore, delivered through the keepalive channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreQueueEntry {
    /// Posix-normalized client path.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveResponse {
    #[serde(default)]
    pub restore_queue: Vec<RestoreQueueEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreFileResponse {
    /// Base64-encoded file body (single-shot mode only).
    pub file_content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreFileInfoResponse {
    pub size: u64,
}

/// One catalogued version of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub version_id: String,
    pub timestamp: String,
}

/// Per-file catalog record, also the manifest snapshot entry format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadataRecord {
    #[serde(rename = "ClientFullNameAndPathAsPosix")]
    pub client_path_posix: String,
    #[serde(rename = "FileSize")]
    pub file_size: u64,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    pub versions: Vec<FileVersion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadataResponse {
    pub data: Vec<FileMetadataRecord>,
}
