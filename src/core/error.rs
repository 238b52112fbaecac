//! Core Error Types
//!
//! Caller-facing error handling for the execution pipeline.
//!
//! Validation-phase rejections ([`GuardError`]) surface unchanged. Anything
//! that goes wrong once execution starts is wrapped exactly once in a
//! [`SecurityException`] carrying the original [`FailureCause`].

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::backup::BackupError;
use crate::core::operation::BoxError;
use crate::store::StoreError;

/// Core module result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Category of a rejection, matching the validation contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardCategory {
    Validation,
    Authorization,
    RateLimit,
    Security,
}

/// Rejection raised by the validation chain before any transaction opens
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardError {
    /// Input did not match the operation's rules
    #[error("Validation error: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    /// No actor attached to the context
    #[error("Authentication required")]
    AuthenticationRequired,

    /// Context too old, from the future, or otherwise unusable
    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    /// Actor lacks a required permission
    #[error("Access denied: missing permission '{0}'")]
    PermissionDenied(String),

    /// Ceiling reached for this actor and operation
    #[error("Rate limit exceeded for {key}: {limit} per {window_secs}s")]
    RateLimited {
        key: String,
        limit: u32,
        window_secs: u64,
    },

    /// Integrity scan matched a suspicious pattern or size cap
    #[error("Suspicious input rejected: {0}")]
    Suspicious(String),
}

impl GuardError {
    pub fn validation(errors: Vec<String>) -> Self {
        Self::Validation { errors }
    }

    pub fn category(&self) -> GuardCategory {
        match self {
            Self::Validation { .. } => GuardCategory::Validation,
            Self::AuthenticationRequired
            | Self::SessionInvalid(_)
            | Self::PermissionDenied(_) => GuardCategory::Authorization,
            Self::RateLimited { .. } => GuardCategory::RateLimit,
            Self::Suspicious(_) => GuardCategory::Security,
        }
    }
}

/// Why an execution-phase failure happened
#[derive(Debug, Error)]
pub enum FailureCause {
    /// Business callback returned an error
    #[error("Execution error: {0}")]
    Execution(#[source] BoxError),

    /// Callback returned a result that failed verification
    #[error("Integrity error: {}", .0.join("; "))]
    Integrity(Vec<String>),

    /// Caller cancelled the call mid-flight
    #[error("Operation cancelled")]
    Cancelled,

    /// Callback exceeded its time bound
    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),

    /// Pre-execution snapshot could not be taken
    #[error("Backup error: {0}")]
    Backup(#[source] BackupError),

    /// Transaction boundary failed to open or commit
    #[error("Transaction error: {0}")]
    Transaction(#[source] StoreError),
}

impl FailureCause {
    /// Short reason label used in metrics and audit
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Execution(_) => "execution",
            Self::Integrity(_) => "integrity",
            Self::Cancelled => "cancelled",
            Self::TimedOut(_) => "timeout",
            Self::Backup(_) => "backup",
            Self::Transaction(_) => "transaction",
        }
    }
}

/// Wrapper surfaced for any failure once execution has started
#[derive(Debug, Error)]
#[error("Critical operation '{operation}' ({operation_id}) failed: {cause}")]
pub struct SecurityException {
    pub operation_id: Uuid,
    pub operation: String,
    #[source]
    pub cause: FailureCause,
}

/// Error returned by the executor
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Rejected(#[from] GuardError),

    #[error(transparent)]
    Failed(#[from] SecurityException),
}

impl CoreError {
    /// The rejection, if the call never reached execution
    pub fn as_rejection(&self) -> Option<&GuardError> {
        match self {
            Self::Rejected(e) => Some(e),
            Self::Failed(_) => None,
        }
    }

    /// The original failure cause, if execution started
    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            Self::Rejected(_) => None,
            Self::Failed(e) => Some(&e.cause),
        }
    }

    /// Get error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected(e) => match e.category() {
                GuardCategory::Validation => "VALIDATION_ERROR",
                GuardCategory::Authorization => "AUTHORIZATION_ERROR",
                GuardCategory::RateLimit => "RATE_LIMIT_ERROR",
                GuardCategory::Security => "SECURITY_ERROR",
            },
            Self::Failed(e) => match e.cause {
                FailureCause::Integrity(_) => "INTEGRITY_ERROR",
                _ => "SECURITY_EXCEPTION",
            },
        }
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Rejected(e) => match e {
                GuardError::Validation { .. } => 422,
                GuardError::AuthenticationRequired | GuardError::SessionInvalid(_) => 401,
                GuardError::PermissionDenied(_) => 403,
                GuardError::RateLimited { .. } => 429,
                GuardError::Suspicious(_) => 400,
            },
            Self::Failed(e) => match e.cause {
                FailureCause::TimedOut(_) => 504,
                _ => 500,
            },
        }
    }
}
