//! Typed HTTPS client
//!
//! One method per request type. JSON control calls share a client with a
//! 10 s timeout; upload and restore bodies go through a second client with
//! a connect timeout only, since body transfer time is unbounded.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{multipart, Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::protocol::request::{
    BackupFileEnvelope, DeviceSurvey, FileMetadataRequest, HelloRequest, KeepaliveRequest,
    MarkFileRestoredRequest, RegisterNewDeviceRequest, RequestType, RestoreFileInfoRequest,
    RestoreFileRequest, ValidateApiKeyRequest,
};
use crate::protocol::response::{
    FileMetadataRecord, FileMetadataResponse, KeepaliveResponse, RegisterNewDeviceResponse,
    RestoreFileInfoResponse, RestoreFileResponse,
};
use crate::protocol::ClientPath;

use super::errors::{TransportError, TransportResult};
use super::retry::RetryPolicy;

/// Files above this size upload through the streaming endpoint.
pub const STREAM_THRESHOLD_BYTES: u64 = 200 * 1024 * 1024;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocking HTTPS client for the backup server.
pub struct TransportClient {
    base_url: String,
    control: Client,
    streaming: Client,
    retry: RetryPolicy,
}

impl TransportClient {
    pub fn new(base_url: impl Into<String>) -> TransportResult<Self> {
        Self::with_retry(base_url, RetryPolicy::default())
    }

    pub fn with_retry(base_url: impl Into<String>, retry: RetryPolicy) -> TransportResult<Self> {
        let control = Client::builder()
            .timeout(CONTROL_TIMEOUT)
            .connect_timeout(CONTROL_TIMEOUT)
            .build()
            .map_err(|e| TransportError::transient("client_init", e.to_string()))?;
        let streaming = Client::builder()
            .timeout(None::<Duration>)
            .connect_timeout(CONTROL_TIMEOUT)
            .build()
            .map_err(|e| TransportError::transient("client_init", e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            control,
            streaming,
            retry,
        })
    }

    fn url(&self, request_type: RequestType) -> String {
        format!("{}{}", self.base_url, request_type.route())
    }

    pub fn hello(&self, api_key: Option<&str>) -> TransportResult<()> {
        let request = HelloRequest {
            request_type: RequestType::Hello,
            api_key: api_key.map(str::to_string),
        };
        self.post_json::<Value>(RequestType::Hello, &request).map(|_| ())
    }

    pub fn validate_api_key(&self, api_key: &str) -> TransportResult<()> {
        let request = ValidateApiKeyRequest {
            request_type: RequestType::ValidateApiKey,
            api_key: api_key.to_string(),
        };
        self.post_json::<Value>(RequestType::ValidateApiKey, &request)
            .map(|_| ())
    }

    pub fn register_device(
        &self,
        api_key: &str,
        survey: DeviceSurvey,
    ) -> TransportResult<RegisterNewDeviceResponse> {
        let request = RegisterNewDeviceRequest {
            request_type: RequestType::RegisterNewDevice,
            api_key: api_key.to_string(),
            survey,
        };
        self.post_json(RequestType::RegisterNewDevice, &request)
    }

    pub fn keepalive(&self, api_key: &str, agent_id: &str) -> TransportResult<KeepaliveResponse> {
        let request = KeepaliveRequest {
            request_type: RequestType::Keepalive,
            api_key: api_key.to_string(),
            agent_id: agent_id.to_string(),
        };
        self.post_json(RequestType::Keepalive, &request)
    }

    /// Upload a file, picking the single-shot or streaming endpoint by size.
    pub fn ship_file(
        &self,
        api_key: &str,
        agent_id: &str,
        client_path: &ClientPath,
        local_path: &Path,
    ) -> TransportResult<()> {
        let size = std::fs::metadata(local_path)
            .map_err(|e| TransportError::local_io("backup_file", e.to_string()))?
            .len();

        if size > STREAM_THRESHOLD_BYTES {
            self.upload_stream(api_key, agent_id, client_path, local_path)
        } else {
            self.upload_small(api_key, agent_id, client_path, local_path)
        }
    }

    /// Single-shot upload: the whole body is read into memory and sent as
    /// one multipart request with the JSON envelope alongside.
    pub fn upload_small(
        &self,
        api_key: &str,
        agent_id: &str,
        client_path: &ClientPath,
        local_path: &Path,
    ) -> TransportResult<()> {
        let operation = "backup_file";
        let content = std::fs::read(local_path)
            .map_err(|e| TransportError::local_io(operation, e.to_string()))?;
        let envelope = self.upload_envelope(RequestType::BackupFile, api_key, agent_id, client_path)?;

        self.retry.run(|| {
            let form = multipart::Form::new()
                .part(
                    "json",
                    multipart::Part::text(envelope.clone())
                        .mime_str("application/json")
                        .map_err(|e| TransportError::protocol(operation, e.to_string()))?,
                )
                .part(
                    "file_content",
                    multipart::Part::bytes(content.clone())
                        .file_name("filename")
                        .mime_str("application/octet-stream")
                        .map_err(|e| TransportError::protocol(operation, e.to_string()))?,
                );

            let response = self
                .streaming
                .post(self.url(RequestType::BackupFile))
                .multipart(form)
                .send()
                .map_err(|e| classify_send_error(operation, e))?;
            check_status(operation, response).map(|_| ())
        })
    }

    /// Streaming upload: scalar fields first, then the file body streamed
    /// from disk. Used above [`STREAM_THRESHOLD_BYTES`].
    pub fn upload_stream(
        &self,
        api_key: &str,
        agent_id: &str,
        client_path: &ClientPath,
        local_path: &Path,
    ) -> TransportResult<()> {
        let operation = "backup_file_stream";
        let path_b64 = client_path.to_base64();
        let local = local_path.to_path_buf();

        self.retry.run(|| {
            let file = File::open(&local)
                .map_err(|e| TransportError::local_io(operation, e.to_string()))?;

            let form = multipart::Form::new()
                .text("request_type", RequestType::BackupFileStream.as_str())
                .text("api_key", api_key.to_string())
                .text("agent_id", agent_id.to_string())
                .text("file_path", path_b64.clone())
                .part(
                    "file_content",
                    multipart::Part::reader(file)
                        .file_name("filename")
                        .mime_str("application/octet-stream")
                        .map_err(|e| TransportError::protocol(operation, e.to_string()))?,
                );

            let response = self
                .streaming
                .post(self.url(RequestType::BackupFileStream))
                .multipart(form)
                .send()
                .map_err(|e| classify_send_error(operation, e))?;
            check_status(operation, response).map(|_| ())
        })
    }

    /// Single-shot restore; the body comes back base64-encoded in JSON.
    pub fn restore(
        &self,
        api_key: &str,
        agent_id: &str,
        client_path: &ClientPath,
        version_id: Option<&str>,
    ) -> TransportResult<Vec<u8>> {
        let request = RestoreFileRequest {
            request_type: RequestType::RestoreFile,
            api_key: api_key.to_string(),
            agent_id: agent_id.to_string(),
            file_path: client_path.to_base64(),
            version_id: version_id.map(str::to_string),
        };
        let response: RestoreFileResponse = self.post_json(RequestType::RestoreFile, &request)?;
        BASE64
            .decode(&response.file_content)
            .map_err(|e| TransportError::protocol("restore_file", e.to_string()))
    }

    /// Ranged restore of `[offset, offset+length)`; returns raw bytes from
    /// a `206 Partial Content` response.
    pub fn restore_range(
        &self,
        api_key: &str,
        agent_id: &str,
        client_path: &ClientPath,
        version_id: Option<&str>,
        offset: u64,
        length: u64,
    ) -> TransportResult<Vec<u8>> {
        let operation = "restore_file";
        let request = RestoreFileRequest {
            request_type: RequestType::RestoreFile,
            api_key: api_key.to_string(),
            agent_id: agent_id.to_string(),
            file_path: client_path.to_base64(),
            version_id: version_id.map(str::to_string),
        };
        let range = format!("bytes={}-{}", offset, offset + length - 1);

        self.retry.run(|| {
            let response = self
                .streaming
                .post(self.url(RequestType::RestoreFile))
                .header(reqwest::header::RANGE, range.as_str())
                .json(&request)
                .send()
                .map_err(|e| classify_send_error(operation, e))?;

            if response.status() != StatusCode::PARTIAL_CONTENT {
                let response = check_status(operation, response)?;
                // A 200 here means the server ignored the range.
                return Err(TransportError::protocol(
                    operation,
                    format!("expected 206, got {}", response.status()),
                ));
            }
            response
                .bytes()
                .map(|b| b.to_vec())
                .map_err(|e| TransportError::transient(operation, e.to_string()))
        })
    }

    /// Catalogued size of a file, for chunk planning.
    pub fn restore_info(
        &self,
        api_key: &str,
        agent_id: &str,
        client_path: &ClientPath,
    ) -> TransportResult<u64> {
        let request = RestoreFileInfoRequest {
            request_type: RequestType::RestoreFileInfo,
            api_key: api_key.to_string(),
            agent_id: agent_id.to_string(),
            file_path: client_path.to_base64(),
        };
        let response: RestoreFileInfoResponse =
            self.post_json(RequestType::RestoreFileInfo, &request)?;
        Ok(response.size)
    }

    /// Server-side catalog for this device, for the manifest snapshot.
    pub fn file_metadata(
        &self,
        api_key: &str,
        agent_id: &str,
    ) -> TransportResult<Vec<FileMetadataRecord>> {
        let request = FileMetadataRequest {
            request_type: RequestType::FileMetadata,
            api_key: api_key.to_string(),
            agent_id: agent_id.to_string(),
        };
        let response: FileMetadataResponse = self.post_json(RequestType::FileMetadata, &request)?;
        Ok(response.data)
    }

    /// Acknowledge a completed restore so the queue entry is cleared.
    pub fn mark_file_restored(
        &self,
        api_key: &str,
        agent_id: &str,
        posix_path: &str,
    ) -> TransportResult<()> {
        let request = MarkFileRestoredRequest {
            request_type: RequestType::MarkFileRestored,
            api_key: api_key.to_string(),
            agent_id: agent_id.to_string(),
            file_path: posix_path.to_string(),
        };
        self.post_json::<Value>(RequestType::MarkFileRestored, &request)
            .map(|_| ())
    }

    fn upload_envelope(
        &self,
        request_type: RequestType,
        api_key: &str,
        agent_id: &str,
        client_path: &ClientPath,
    ) -> TransportResult<String> {
        let envelope = BackupFileEnvelope {
            request_type,
            api_key: api_key.to_string(),
            agent_id: agent_id.to_string(),
            file_path: client_path.to_base64(),
        };
        serde_json::to_string(&envelope)
            .map_err(|e| TransportError::protocol("backup_file", e.to_string()))
    }

    fn post_json<T: DeserializeOwned>(
        &self,
        request_type: RequestType,
        body: &impl serde::Serialize,
    ) -> TransportResult<T> {
        let operation = request_type.as_str();

        self.retry.run(|| {
            let response = self
                .control
                .post(self.url(request_type))
                .json(body)
                .send()
                .map_err(|e| classify_send_error(operation, e))?;
            let response = check_status(operation, response)?;
            response
                .json::<T>()
                .map_err(|e| TransportError::protocol(operation, e.to_string()))
        })
    }
}

/// Classify a reqwest send error: everything here is connection-level.
fn classify_send_error(operation: &'static str, e: reqwest::Error) -> TransportError {
    TransportError::transient(operation, e.to_string())
}

/// Map a non-success status to an error kind per the routing table.
fn check_status(operation: &'static str, response: Response) -> TransportResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<crate::protocol::response::ErrorResponse>()
        .map(|e| e.error)
        .unwrap_or_else(|_| format!("HTTP {}", status));

    if status == StatusCode::UNAUTHORIZED {
        Err(TransportError::auth(operation, message))
    } else if status.is_server_error() {
        Err(TransportError::transient(operation, message))
    } else {
        Err(TransportError::protocol(operation, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let client = TransportClient::new("https://backup.example.com:8443/").unwrap();
        assert_eq!(
            client.url(RequestType::BackupFileStream),
            "https://backup.example.com:8443/api/backup-file-stream"
        );
        assert_eq!(
            client.url(RequestType::Keepalive),
            "https://backup.example.com:8443/api/keepalive"
        );
    }

    #[test]
    fn test_stream_threshold() {
        assert_eq!(STREAM_THRESHOLD_BYTES, 209_715_200);
    }

    #[test]
    fn test_unreachable_server_is_transient() {
        // Port 9 (discard) with nothing listening; connect fails fast.
        let client =
            TransportClient::with_retry("http://127.0.0.1:9", RetryPolicy::none()).unwrap();
        let err = client.keepalive("key", "agent").unwrap_err();
        assert!(err.is_retryable());
    }
}
