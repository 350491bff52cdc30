//! CLI-specific error types
//!
//! Every CLI error is fatal: the process prints a JSON error object and
//! exits nonzero.

use std::fmt;
use std::io;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Settings or config file missing/invalid
    ConfigError,
    /// Install directory could not be resolved
    InstallUnresolved,
    /// A local store could not be opened
    StoreError,
    /// Server failed to start
    ServerError,
}

impl CliErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "SC_CLI_CONFIG_ERROR",
            Self::InstallUnresolved => "SC_CLI_INSTALL_UNRESOLVED",
            Self::StoreError => "SC_CLI_STORE_ERROR",
            Self::ServerError => "SC_CLI_SERVER_ERROR",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn install_unresolved() -> Self {
        Self::new(
            CliErrorCode::InstallUnresolved,
            "Unable to locate install directory; no stable settings and no --settings-file given",
        )
    }

    pub fn store_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::StoreError, msg)
    }

    pub fn server_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ServerError, msg)
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::store_error(e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(CliError::install_unresolved().code_str(), "SC_CLI_INSTALL_UNRESOLVED");
        assert_eq!(CliError::config_error("x").code_str(), "SC_CLI_CONFIG_ERROR");
    }
}
