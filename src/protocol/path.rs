//! Client path value type
//!
//! A backed-up file is identified by the path the device knows it by. That
//! path may contain backslashes and non-ASCII characters, so it crosses the
//! wire base64-encoded and is normalized to a posix form only where the
//! server lays files out on disk.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::errors::{ProtocolError, ProtocolResult};

/// A file path as reported by the client device.
///
/// Holds the original string untouched; `as_posix` derives the normalized
/// form (backslashes become `/`, doubled slashes collapse).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientPath {
    raw: String,
}

impl ClientPath {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// Decode from the wire representation (base64 over the UTF-8 bytes).
    pub fn from_base64(encoded: &str) -> ProtocolResult<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| ProtocolError::InvalidBase64(e.to_string()))?;
        let raw = String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Self { raw })
    }

    /// Encode for the wire (base64 over the UTF-8 bytes).
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.raw.as_bytes())
    }

    /// The path exactly as the client reported it.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Posix-normalized form used for catalog keys and server layout.
    pub fn as_posix(&self) -> String {
        let mut normalized = self.raw.replace('\\', "/");
        while normalized.contains("//") {
            normalized = normalized.replace("//", "/");
        }
        normalized
    }
}

impl std::fmt::Display for ClientPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}
