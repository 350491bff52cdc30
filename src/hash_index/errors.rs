//! # Hash Index Errors

use thiserror::Error;

/// Result type for hash index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors raised by the change-detection index
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error reading {path}: {source}")]
    FileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl IndexError {
    pub fn file_io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }
}
