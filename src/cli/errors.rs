//! CLI-specific error types
//!
//! All CLI errors are fatal: the binary prints them and exits non-zero.

use std::io;

use thiserror::Error;

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file missing, unparsable or invalid
    ConfigError,
    /// I/O error (stdout)
    IoError,
    /// Persisted snapshot failed verification
    SnapshotInvalid,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "WARDEN_CLI_CONFIG_ERROR",
            Self::IoError => "WARDEN_CLI_IO_ERROR",
            Self::SnapshotInvalid => "WARDEN_CLI_SNAPSHOT_INVALID",
        }
    }
}

/// CLI error
#[derive(Debug, Error)]
#[error("{}: {message}", .code.code())]
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

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn snapshot_invalid(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::SnapshotInvalid, msg)
    }

    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
