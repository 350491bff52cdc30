//! Typed request envelopes
//!
//! Every request carries a `request_type` tag plus the customer credential
//! and, where applicable, the device identity. One struct per request type;
//! parsing happens only at the edges (transport client and request router).

use serde::{Deserialize, Serialize};

use super::errors::{ProtocolError, ProtocolResult};

/// The request discriminator carried in every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Hello,
    ValidateApiKey,
    RegisterNewDevice,
    BackupFile,
    BackupFileStream,
    Keepalive,
    QueueFileForRestore,
    RestoreFile,
    RestoreFileInfo,
    FileMetadata,
    MarkFileRestored,
    DeviceStatus,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Hello => "hello",
            RequestType::ValidateApiKey => "validate_api_key",
            RequestType::RegisterNewDevice => "register_new_device",
            RequestType::BackupFile => "backup_file",
            RequestType::BackupFileStream => "backup_file_stream",
            RequestType::Keepalive => "keepalive",
            RequestType::QueueFileForRestore => "queue_file_for_restore",
            RequestType::RestoreFile => "restore_file",
            RequestType::RestoreFileInfo => "restore_file_info",
            RequestType::FileMetadata => "file_metadata",
            RequestType::MarkFileRestored => "mark_file_restored",
            RequestType::DeviceStatus => "device_status",
        }
    }

    pub fn parse(s: &str) -> ProtocolResult<Self> {
        match s {
            "hello" => Ok(RequestType::Hello),
            "validate_api_key" => Ok(RequestType::ValidateApiKey),
            "register_new_device" => Ok(RequestType::RegisterNewDevice),
            "backup_file" => Ok(RequestType::BackupFile),
            "backup_file_stream" => Ok(RequestType::BackupFileStream),
            "keepalive" => Ok(RequestType::Keepalive),
            "queue_file_for_restore" => Ok(RequestType::QueueFileForRestore),
            "restore_file" => Ok(RequestType::RestoreFile),
            "restore_file_info" => Ok(RequestType::RestoreFileInfo),
            "file_metadata" => Ok(RequestType::FileMetadata),
            "mark_file_restored" => Ok(RequestType::MarkFileRestored),
            "device_status" => Ok(RequestType::DeviceStatus),
            other => Err(ProtocolError::UnknownRequestType(other.to_string())),
        }
    }

    /// Success responses echo the request type: `<request_type>-response`.
    pub fn response_key(&self) -> String {
        format!("{}-response", self.as_str())
    }

    /// The API route serving this request type.
    pub fn route(&self) -> String {
        format!("/api/{}", self.as_str().replace('_', "-"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloRequest {
    pub request_type: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateApiKeyRequest {
    pub request_type: RequestType,
    pub api_key: String,
}

/// Device survey submitted at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSurvey {
    pub device_name: String,
    pub ip_address: String,
    pub device_type: String,
    pub operating_system: String,
    pub device_status: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNewDeviceRequest {
    pub request_type: RequestType,
    pub api_key: String,
    #[serde(flatten)]
    pub survey: DeviceSurvey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveRequest {
    pub request_type: RequestType,
    pub api_key: String,
    pub agent_id: String,
}

/// JSON part of an upload. The file body travels in the `file_content`
/// multipart field; `file_path` is the base64-encoded client path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFileEnvelope {
    pub request_type: RequestType,
    pub api_key: String,
    pub agent_id: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueFileForRestoreRequest {
    pub request_type: RequestType,
    pub api_key: String,
    pub agent_id: String,
    /// Posix-normalized client path, as catalogued by the server.
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreFileRequest {
    pub request_type: RequestType,
    pub api_key: String,
    pub agent_id: String,
    /// Base64-encoded client path.
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreFileInfoRequest {
    pub request_type: RequestType,
    pub api_key: String,
    pub agent_id: String,
    /// Base64-encoded client path.
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadataRequest {
    pub request_type: RequestType,
    pub api_key: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkFileRestoredRequest {
    pub request_type: RequestType,
    pub api_key: String,
    pub agent_id: String,
    /// Posix-normalized client path.
    pub file_path: String,
}

/// Per-customer liveness report; no agent identity, the api key scopes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusRequest {
    pub request_type: RequestType,
    pub api_key: String,
}
