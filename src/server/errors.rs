//! # Server Errors

use thiserror::Error;

/// Result type for server-side operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced by the backup server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unable to authorize request.")]
    Unauthorized,

    #[error("API key is not active.")]
    InactiveApiKey,

    #[error("Request contained illegal characters.")]
    UnsafeCharacters,

    #[error("Bad request.")]
    BadRequest,

    #[error("Unknown file: {0}")]
    UnknownFile(String),

    #[error("Unknown version: {0}")]
    UnknownVersion(String),

    #[error("File too large: {0} bytes (limit {1})")]
    FileTooLarge(u64, u64),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::Unauthorized => 401,
            ServerError::InactiveApiKey => 401,
            ServerError::UnsafeCharacters => 401,
            ServerError::BadRequest => 400,
            ServerError::UnknownFile(_) => 400,
            ServerError::UnknownVersion(_) => 400,
            ServerError::FileTooLarge(_, _) => 413,
            ServerError::InvalidRange(_) => 416,
            ServerError::Database(_) => 500,
            ServerError::Io(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ServerError::Unauthorized.status_code(), 401);
        assert_eq!(ServerError::BadRequest.status_code(), 400);
        assert_eq!(ServerError::FileTooLarge(400, 300).status_code(), 413);
        assert_eq!(ServerError::UnknownFile("x".into()).status_code(), 400);
    }
}
