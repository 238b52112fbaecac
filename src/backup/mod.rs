//! Backup and recovery for critical operations
//!
//! A snapshot is taken before a risky operation runs, before its transaction
//! opens. On success it is discarded; on failure it is restored and kept for
//! the retention window so it can be inspected afterwards.
//!
//! # Guarantees
//!
//! - Restore is idempotent: applying the same snapshot twice yields the
//!   same state as applying it once.
//! - A snapshot whose checksum no longer matches is never applied.
//! - At most one snapshot is active per in-flight call; the id never
//!   leaves the executor.

mod errors;
mod snapshot;

pub use errors::{
    BackupError, BackupErrorCode, BackupResult, RestoreError, RestoreErrorCode, RestoreResult,
};
pub use snapshot::{
    compute_checksum, format_checksum, generate_snapshot_id, verify_persisted, BackupScope,
    BackupSnapshot, SnapshotManifest,
};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::BackupConfig;
use crate::observability::Event;

/// Something whose state can be captured and put back
#[async_trait]
pub trait StateSource: Send + Sync {
    /// Capture the state covered by `scope`
    async fn capture(&self, scope: &BackupScope) -> BackupResult<Vec<u8>>;

    /// Replace the state covered by `scope` with `state`
    async fn apply(&self, scope: &BackupScope, state: &[u8]) -> RestoreResult<()>;
}

/// Lifecycle of a retained snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    /// Guarding an in-flight call
    Active,
    /// Applied after a failure
    Restored,
}

struct Retained {
    snapshot: Arc<BackupSnapshot>,
    status: SnapshotStatus,
    since: Instant,
}

/// Creates, restores and retains snapshots
pub struct BackupManager {
    source: Arc<dyn StateSource>,
    retained: Mutex<HashMap<String, Retained>>,
    retention: Duration,
    persist_dir: Option<PathBuf>,
}

impl BackupManager {
    pub fn new(source: Arc<dyn StateSource>, config: &BackupConfig) -> Self {
        Self {
            source,
            retained: Mutex::new(HashMap::new()),
            retention: config.retention(),
            persist_dir: config.persist_dir.clone(),
        }
    }

    /// Capture a snapshot and mark it active
    pub async fn snapshot(&self, scope: BackupScope) -> BackupResult<Arc<BackupSnapshot>> {
        self.purge_expired();

        let state = self.source.capture(&scope).await?;
        let snapshot = Arc::new(BackupSnapshot::new(scope, state));

        self.lock().insert(
            snapshot.id().to_string(),
            Retained {
                snapshot: Arc::clone(&snapshot),
                status: SnapshotStatus::Active,
                since: Instant::now(),
            },
        );

        debug!(
            event = Event::SnapshotCreated.as_str(),
            snapshot_id = snapshot.id(),
            size_bytes = snapshot.captured_state().len(),
            "snapshot captured"
        );
        Ok(snapshot)
    }

    /// Apply a retained snapshot
    pub async fn restore(&self, snapshot_id: &str) -> RestoreResult<()> {
        let snapshot = self
            .get(snapshot_id)
            .ok_or_else(|| RestoreError::not_found(snapshot_id))?;

        if !snapshot.verify() {
            return Err(RestoreError::corrupt(format!(
                "Checksum mismatch for snapshot {}",
                snapshot_id
            )));
        }

        self.source
            .apply(snapshot.scope(), snapshot.captured_state())
            .await?;

        if let Some(entry) = self.lock().get_mut(snapshot_id) {
            entry.status = SnapshotStatus::Restored;
            entry.since = Instant::now();
        }

        info!(
            event = Event::SnapshotRestored.as_str(),
            snapshot_id,
            "snapshot restored"
        );
        Ok(())
    }

    /// Drop a snapshot whose call succeeded
    pub fn discard(&self, snapshot_id: &str) {
        if self.lock().remove(snapshot_id).is_some() {
            debug!(
                event = Event::SnapshotDiscarded.as_str(),
                snapshot_id,
                "snapshot discarded"
            );
        }
    }

    /// Write a retained snapshot to the persist directory, if one is set
    ///
    /// The write and fsync run on the blocking thread pool.
    pub async fn persist(&self, snapshot_id: &str) -> BackupResult<Option<PathBuf>> {
        let Some(dir) = self.persist_dir.clone() else {
            return Ok(None);
        };
        let snapshot = self.get(snapshot_id).ok_or_else(|| {
            BackupError::capture_failed(format!("Snapshot {} is not retained", snapshot_id))
        })?;
        tokio::task::spawn_blocking(move || snapshot.persist(&dir).map(Some))
            .await
            .map_err(|e| {
                BackupError::io_error(
                    "Snapshot persist task failed",
                    io::Error::new(io::ErrorKind::Other, e.to_string()),
                )
            })?
    }

    pub fn get(&self, snapshot_id: &str) -> Option<Arc<BackupSnapshot>> {
        self.lock()
            .get(snapshot_id)
            .map(|entry| Arc::clone(&entry.snapshot))
    }

    pub fn status(&self, snapshot_id: &str) -> Option<SnapshotStatus> {
        self.lock().get(snapshot_id).map(|entry| entry.status)
    }

    /// Number of snapshots currently held
    pub fn retained_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop restored snapshots older than the retention window
    pub fn purge_expired(&self) -> usize {
        let retention = self.retention;
        let mut retained = self.lock();
        let before = retained.len();
        retained.retain(|_, entry| {
            entry.status == SnapshotStatus::Active || entry.since.elapsed() < retention
        });
        let purged = before - retained.len();
        if purged > 0 {
            warn!(
                event = Event::SnapshotPurged.as_str(),
                purged,
                "expired snapshots purged"
            );
        }
        purged
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Retained>> {
        self.retained.lock().unwrap_or_else(|e| e.into_inner())
    }
}
