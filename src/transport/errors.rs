//! # Transport Errors
//!
//! Every transport failure carries a kind that drives routing: transient
//! failures are retried with backoff, auth failures are never retried,
//! protocol failures mark the file failed and let the cycle continue.

use thiserror::Error;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// How a transport error should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network error, timeout, or 5xx. Retried with backoff.
    Transient,
    /// 401: invalid or inactive credentials. Never retried.
    Auth,
    /// Malformed response, missing fields, or 4xx. Not retried.
    Protocol,
    /// Local file could not be read for upload.
    LocalIo,
}

/// A failed transport operation.
#[derive(Debug, Error)]
#[error("{kind:?} error in {operation}: {message}")]
pub struct TransportError {
    pub kind: ErrorKind,
    pub operation: &'static str,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: ErrorKind, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            message: message.into(),
        }
    }

    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, operation, message)
    }

    pub fn auth(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, operation, message)
    }

    pub fn protocol(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, operation, message)
    }

    pub fn local_io(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LocalIo, operation, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}
