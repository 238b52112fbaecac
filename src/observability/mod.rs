//! Observability subsystem
//!
//! - Structured logging through `tracing`, with a closed event vocabulary
//! - Append-only audit trail with a local fallback
//! - Batched metrics with bounded retry
//! - Escalation to operators on severe or repeated failures
//!
//! # Principles
//!
//! 1. Observability never fails a business operation
//! 2. Sinks are append-only; the core never reads them back
//! 3. The orchestrator depends on these components, never the reverse

pub mod alert;
pub mod audit;
mod events;
pub mod metrics;
pub mod telemetry;

pub use alert::{
    Escalator, FanoutNotifier, LogNotifier, MemoryNotifier, Notification, Notifier, NotifyError,
};
pub use audit::{
    AuditDelivery, AuditPhase, AuditRecord, AuditSink, AuditTrail, FileAuditLog, MemoryAuditLog,
};
pub use events::Event;
pub use metrics::{
    LogMetricSink, MemoryMetricSink, Metric, MetricKind, MetricSink, MetricsRecorder, MetricsSnapshot,
};
pub use telemetry::{LogFormat, TelemetryError};

use std::io;

use thiserror::Error;

/// Observability error
///
/// Never fatal: callers log it and carry on.
#[derive(Debug, Error)]
#[error("WARDEN_OBSERVABILITY_FAILED: {message}")]
pub struct ObservabilityError {
    message: String,
    #[source]
    source: Option<io::Error>,
}

impl ObservabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result type for observability operations
pub type ObservabilityResult<T> = Result<T, ObservabilityError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_observability_error_display() {
        let err = ObservabilityError::new("test message");
        let display = err.to_string();
        assert!(display.contains("WARDEN_OBSERVABILITY_FAILED"));
        assert!(display.contains("test message"));
    }

    #[test]
    fn test_observability_error_source() {
        let err = ObservabilityError::with_source(
            "write",
            io::Error::new(io::ErrorKind::Other, "disk"),
        );
        assert!(err.source().is_some());
        assert_eq!(err.message(), "write");
    }
}
