//! Backup and restore error types
//!
//! Errors follow the `WARDEN_CATEGORY_NAME` code format. None of them are
//! fatal: a failed snapshot aborts one call, a failed restore is reported
//! and logged by the executor without masking the original failure.

use std::fmt;
use std::io;

use thiserror::Error;

/// Backup error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupErrorCode {
    /// State could not be captured
    WardenBackupCapture,
    /// I/O failure while persisting a snapshot
    WardenBackupIo,
    /// Manifest encode failure
    WardenBackupManifest,
}

impl BackupErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupErrorCode::WardenBackupCapture => "WARDEN_BACKUP_CAPTURE",
            BackupErrorCode::WardenBackupIo => "WARDEN_BACKUP_IO",
            BackupErrorCode::WardenBackupManifest => "WARDEN_BACKUP_MANIFEST",
        }
    }
}

impl fmt::Display for BackupErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Backup error with full context
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct BackupError {
    code: BackupErrorCode,
    message: String,
    #[source]
    source: Option<io::Error>,
}

impl BackupError {
    fn new(code: BackupErrorCode, message: impl Into<String>, source: Option<io::Error>) -> Self {
        Self {
            code,
            message: message.into(),
            source,
        }
    }

    pub fn capture_failed(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::WardenBackupCapture, message, None)
    }

    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self::new(BackupErrorCode::WardenBackupIo, message, Some(source))
    }

    pub fn io_error_at_path(path: &std::path::Path, source: io::Error) -> Self {
        Self::io_error(format!("I/O error at {}", path.display()), source)
    }

    pub fn manifest_failed(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::WardenBackupManifest, message, None)
    }

    pub fn code(&self) -> BackupErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result type for backup operations
pub type BackupResult<T> = Result<T, BackupError>;

/// Restore error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreErrorCode {
    /// No retained snapshot with that id
    WardenRestoreNotFound,
    /// Checksum mismatch or undecodable state
    WardenRestoreIntegrity,
}

impl RestoreErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreErrorCode::WardenRestoreNotFound => "WARDEN_RESTORE_NOT_FOUND",
            RestoreErrorCode::WardenRestoreIntegrity => "WARDEN_RESTORE_INTEGRITY",
        }
    }
}

impl fmt::Display for RestoreErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Restore error
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct RestoreError {
    code: RestoreErrorCode,
    message: String,
}

impl RestoreError {
    pub fn not_found(snapshot_id: &str) -> Self {
        Self {
            code: RestoreErrorCode::WardenRestoreNotFound,
            message: format!("Snapshot {} is not retained", snapshot_id),
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self {
            code: RestoreErrorCode::WardenRestoreIntegrity,
            message: message.into(),
        }
    }

    pub fn code(&self) -> RestoreErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result type for restore operations
pub type RestoreResult<T> = Result<T, RestoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_codes_format() {
        assert_eq!(
            BackupErrorCode::WardenBackupCapture.as_str(),
            "WARDEN_BACKUP_CAPTURE"
        );
        assert_eq!(
            RestoreErrorCode::WardenRestoreIntegrity.as_str(),
            "WARDEN_RESTORE_INTEGRITY"
        );
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err = BackupError::io_error(
            "write failed",
            io::Error::new(io::ErrorKind::Other, "disk gone"),
        );
        assert_eq!(err.code(), BackupErrorCode::WardenBackupIo);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("WARDEN_BACKUP_IO"));
    }

    #[test]
    fn test_restore_not_found_message() {
        let err = RestoreError::not_found("snap-1");
        assert_eq!(err.code(), RestoreErrorCode::WardenRestoreNotFound);
        assert!(err.message().contains("snap-1"));
    }
}
