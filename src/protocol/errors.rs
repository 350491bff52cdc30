//! # Wire Protocol Errors

use thiserror::Error;

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire values
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("Invalid base64 path: {0}")]
    InvalidBase64(String),

    #[error("Path is not valid UTF-8")]
    InvalidUtf8,

    #[error("Unknown request type: {0}")]
    UnknownRequestType(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = ProtocolError::UnknownRequestType("frobnicate".into());
        assert!(err.to_string().contains("frobnicate"));
    }
}
