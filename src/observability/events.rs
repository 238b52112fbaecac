//! Observable events
//!
//! Every log line emitted by the crate carries an `event` field taken from
//! this enum, so operators can filter on a closed vocabulary.

use std::fmt;

/// Observable events in the execution core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Pipeline
    /// Call entered the executor
    OperationStarted,
    /// Validation chain rejected the call
    OperationRejected,
    /// Call committed and returned its result
    OperationCommitted,
    /// Call failed after execution started
    OperationFailed,
    /// State machine trail for one call
    OperationTrail,

    // Transaction
    /// Rollback attempt failed
    RollbackFailed,

    // Backup / restore
    /// Snapshot captured before execution
    SnapshotCreated,
    /// Snapshot discarded after success
    SnapshotDiscarded,
    /// Snapshot applied after failure
    SnapshotRestored,
    /// Restore attempt failed
    RestoreFailed,
    /// Failed-call snapshot written to disk
    SnapshotPersisted,
    /// Retained snapshots dropped
    SnapshotPurged,

    // Audit
    /// Primary audit sink failed; fallback used
    AuditFallbackUsed,
    /// Both audit sinks failed; this line is the only trace
    AuditLost,

    // Metrics
    /// Metric batch could not be flushed and will be retried
    MetricsFlushRetry,
    /// Metric batch dropped after exhausting retries
    MetricsBatchDropped,

    // Cache
    /// Cache backend failed on read; treated as miss
    CacheReadFailed,
    /// Cache backend failed on write
    CacheWriteFailed,
    /// Tag invalidation failed after retries
    CacheInvalidationFailed,

    // Escalation
    /// Failure escalated to the notification channel
    EscalationSent,
    /// Notification channel failed
    EscalationFailed,

    // Lifecycle
    /// Configuration loaded
    ConfigLoaded,
}

impl Event {
    /// Returns the event name string
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::OperationStarted => "OPERATION_STARTED",
            Event::OperationRejected => "OPERATION_REJECTED",
            Event::OperationCommitted => "OPERATION_COMMITTED",
            Event::OperationFailed => "OPERATION_FAILED",
            Event::OperationTrail => "OPERATION_TRAIL",
            Event::RollbackFailed => "ROLLBACK_FAILED",
            Event::SnapshotCreated => "SNAPSHOT_CREATED",
            Event::SnapshotDiscarded => "SNAPSHOT_DISCARDED",
            Event::SnapshotRestored => "SNAPSHOT_RESTORED",
            Event::RestoreFailed => "RESTORE_FAILED",
            Event::SnapshotPersisted => "SNAPSHOT_PERSISTED",
            Event::SnapshotPurged => "SNAPSHOT_PURGED",
            Event::AuditFallbackUsed => "AUDIT_FALLBACK_USED",
            Event::AuditLost => "AUDIT_LOST",
            Event::MetricsFlushRetry => "METRICS_FLUSH_RETRY",
            Event::MetricsBatchDropped => "METRICS_BATCH_DROPPED",
            Event::CacheReadFailed => "CACHE_READ_FAILED",
            Event::CacheWriteFailed => "CACHE_WRITE_FAILED",
            Event::CacheInvalidationFailed => "CACHE_INVALIDATION_FAILED",
            Event::EscalationSent => "ESCALATION_SENT",
            Event::EscalationFailed => "ESCALATION_FAILED",
            Event::ConfigLoaded => "CONFIG_LOADED",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_screaming_snake() {
        let events = [
            Event::OperationStarted,
            Event::RollbackFailed,
            Event::AuditLost,
            Event::CacheInvalidationFailed,
        ];
        for event in events {
            let name = event.as_str();
            assert!(name.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_display_matches_as_str() {
        assert_eq!(Event::SnapshotRestored.to_string(), "SNAPSHOT_RESTORED");
    }
}
