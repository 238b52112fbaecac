//! Audit Logging
//!
//! - Every critical operation attempt is logged (phase START)
//! - Every terminal outcome is logged (phase SUCCESS or FAILURE)
//! - Records are append-only and never mutated after creation
//! - A failed write goes to a local fallback log; if that also fails the
//!   record is emitted as an error log line, so some trace always exists

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};
use uuid::Uuid;

use super::{Event, ObservabilityError, ObservabilityResult};
use crate::core::context::SecurityContext;

/// Pipeline phase an audit record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditPhase {
    Start,
    Success,
    Failure,
}

impl AuditPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditPhase::Start => "START",
            AuditPhase::Success => "SUCCESS",
            AuditPhase::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for AuditPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record ID
    pub id: Uuid,
    /// Shared by every record of one call
    pub operation_id: Uuid,
    /// Name of the operation actually executed
    pub operation_name: String,
    pub context: SecurityContext,
    pub phase: AuditPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Captured system/error state on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        operation_id: Uuid,
        operation_name: impl Into<String>,
        context: &SecurityContext,
        phase: AuditPhase,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation_id,
            operation_name: operation_name.into(),
            context: context.clone(),
            phase,
            error_detail: None,
            state: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Serialize to one JSON line
    pub fn to_json(&self) -> ObservabilityResult<String> {
        serde_json::to_string(self)
            .map_err(|e| ObservabilityError::new(format!("Cannot encode audit record: {}", e)))
    }
}

/// Append-only audit destination
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a record; the record is durable once this returns `Ok`
    async fn append(&self, record: &AuditRecord) -> ObservabilityResult<()>;
}

/// File-based audit log
///
/// One JSON record per line, fsynced after each write. Writes run on the
/// blocking thread pool.
pub struct FileAuditLog {
    path: PathBuf,
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl FileAuditLog {
    /// Open or create an audit log file
    pub fn open(path: impl AsRef<Path>) -> ObservabilityResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(Some(BufWriter::new(file)))),
        })
    }

    /// Log whose file is created on first write
    pub fn deferred(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_append(path: &Path) -> ObservabilityResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ObservabilityError::with_source(format!("Cannot open {}", path.display()), e))
}

/// Append one line and fsync, opening the file if needed
fn write_line(
    writer: &Mutex<Option<BufWriter<File>>>,
    path: &Path,
    line: &str,
) -> ObservabilityResult<()> {
    let mut guard = writer.lock().unwrap_or_else(|e| e.into_inner());
    if guard.is_none() {
        *guard = Some(BufWriter::new(open_append(path)?));
    }
    let Some(file) = guard.as_mut() else {
        return Err(ObservabilityError::new("Audit log not open"));
    };

    let io = |e| ObservabilityError::with_source("Audit write failed", e);
    writeln!(file, "{}", line).map_err(io)?;
    file.flush().map_err(io)?;
    file.get_ref().sync_all().map_err(io)
}

#[async_trait]
impl AuditSink for FileAuditLog {
    async fn append(&self, record: &AuditRecord) -> ObservabilityResult<()> {
        let json = record.to_json()?;
        let writer = Arc::clone(&self.writer);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_line(&writer, &path, &json))
            .await
            .map_err(|e| ObservabilityError::new(format!("Audit write task failed: {}", e)))?
    }
}

/// In-memory audit log
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditLog {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Records belonging to one call
    pub fn for_operation(&self, operation_id: Uuid) -> Vec<AuditRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.operation_id == operation_id)
            .collect()
    }

    /// Count of records of one call in a given phase
    pub fn count_phase(&self, operation_id: Uuid, phase: AuditPhase) -> usize {
        self.for_operation(operation_id)
            .iter()
            .filter(|r| r.phase == phase)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn append(&self, record: &AuditRecord) -> ObservabilityResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// Where a record ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditDelivery {
    Primary,
    Fallback,
    /// Only the error log line remains
    LogOnly,
}

/// Primary sink with a local fallback
pub struct AuditTrail {
    primary: Arc<dyn AuditSink>,
    fallback: Option<Arc<dyn AuditSink>>,
}

impl AuditTrail {
    pub fn new(primary: Arc<dyn AuditSink>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn AuditSink>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Write a record; never fails
    pub async fn record(&self, record: &AuditRecord) -> AuditDelivery {
        let primary_err = match self.primary.append(record).await {
            Ok(()) => return AuditDelivery::Primary,
            Err(e) => e,
        };

        if let Some(fallback) = &self.fallback {
            match fallback.append(record).await {
                Ok(()) => {
                    warn!(
                        event = Event::AuditFallbackUsed.as_str(),
                        operation_id = %record.operation_id,
                        phase = record.phase.as_str(),
                        error = %primary_err,
                        "primary audit sink failed; record written to fallback"
                    );
                    return AuditDelivery::Fallback;
                }
                Err(fallback_err) => {
                    warn!(
                        event = Event::AuditFallbackUsed.as_str(),
                        operation_id = %record.operation_id,
                        error = %fallback_err,
                        "fallback audit sink failed"
                    );
                }
            }
        }

        let line = record
            .to_json()
            .unwrap_or_else(|_| format!("{:?}", record));
        error!(
            event = Event::AuditLost.as_str(),
            operation_id = %record.operation_id,
            phase = record.phase.as_str(),
            error = %primary_err,
            record = %line,
            "audit sinks unavailable"
        );
        AuditDelivery::LogOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn append(&self, _record: &AuditRecord) -> ObservabilityResult<()> {
            Err(ObservabilityError::new("sink down"))
        }
    }

    fn record(phase: AuditPhase) -> AuditRecord {
        let ctx = SecurityContext::for_actor("content.delete", "u1");
        AuditRecord::new(Uuid::new_v4(), "content.delete", &ctx, phase)
    }

    #[test]
    fn test_record_json() {
        let json = record(AuditPhase::Failure)
            .with_error("boom")
            .to_json()
            .unwrap();
        assert!(json.contains("\"phase\":\"FAILURE\""));
        assert!(json.contains("content.delete"));
        assert!(json.contains("boom"));
    }

    #[tokio::test]
    async fn test_memory_audit_log() {
        let log = MemoryAuditLog::new();
        let start = record(AuditPhase::Start);
        let mut success = record(AuditPhase::Success);
        success.operation_id = start.operation_id;

        log.append(&start).await.unwrap();
        log.append(&success).await.unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log.count_phase(start.operation_id, AuditPhase::Success), 1);
        assert_eq!(log.count_phase(start.operation_id, AuditPhase::Failure), 0);
    }

    #[tokio::test]
    async fn test_file_audit_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = FileAuditLog::open(&path).unwrap();

        log.append(&record(AuditPhase::Success)).await.unwrap();
        log.append(&record(AuditPhase::Start)).await.unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let first: AuditRecord = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first.phase, AuditPhase::Success);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_file_audit_log_concurrent_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let log = Arc::new(FileAuditLog::open(&path).unwrap());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let log = Arc::clone(&log);
                tokio::spawn(async move { log.append(&record(AuditPhase::Start)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 16);
        for line in contents.lines() {
            let parsed: AuditRecord = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.operation_name, "content.delete");
        }
    }

    #[tokio::test]
    async fn test_deferred_log_created_on_first_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fallback.log");
        let log = FileAuditLog::deferred(&path);
        assert!(!path.exists());

        log.append(&record(AuditPhase::Start)).await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn test_trail_uses_fallback() {
        let fallback = Arc::new(MemoryAuditLog::new());
        let trail = AuditTrail::new(Arc::new(BrokenSink)).with_fallback(fallback.clone());

        let delivery = trail.record(&record(AuditPhase::Start)).await;
        assert_eq!(delivery, AuditDelivery::Fallback);
        assert_eq!(fallback.len(), 1);
    }

    #[tokio::test]
    async fn test_trail_without_sinks_logs_only() {
        let trail = AuditTrail::new(Arc::new(BrokenSink)).with_fallback(Arc::new(BrokenSink));
        let delivery = trail.record(&record(AuditPhase::Failure)).await;
        assert_eq!(delivery, AuditDelivery::LogOnly);
    }
}
