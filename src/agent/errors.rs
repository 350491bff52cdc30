//! # Agent Errors

use thiserror::Error;

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors raised by the agent's orchestration layer
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Settings error: {0}")]
    Settings(#[from] crate::settings::SettingsError),

    #[error("Hash index error: {0}")]
    Index(#[from] crate::hash_index::IndexError),

    #[error("History error: {0}")]
    History(#[from] crate::history::HistoryError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Restore failed for {path}: {message}")]
    Restore { path: String, message: String },

    #[error("Another backup cycle is already running")]
    CycleInProgress,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn restore(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Restore {
            path: path.into(),
            message: message.into(),
        }
    }
}
