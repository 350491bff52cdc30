//! # Settings Errors

use thiserror::Error;

/// Result type for settings operations
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Errors raised while loading, parsing, or writing settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings file not found: {0}")]
    NotFound(String),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Missing required key: {0}")]
    MissingKey(&'static str),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Stable settings unreadable: {0}")]
    StableSettings(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SettingsError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn invalid(key: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            value: value.into(),
        }
    }
}
