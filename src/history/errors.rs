//! # History Store Errors

use thiserror::Error;

/// Result type for history operations
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Errors raised by the operation history store
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
