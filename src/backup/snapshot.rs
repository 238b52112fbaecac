//! Point-in-time snapshots
//!
//! A snapshot is an opaque captured state plus a CRC32 checksum. Checksums
//! are verified before any restore. Snapshots of failed calls can be written
//! to disk as `<id>.snapshot` with a `<id>.manifest.json` descriptor.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{BackupError, BackupResult, RestoreError, RestoreResult};

/// Which part of the state a snapshot covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "names", rename_all = "snake_case")]
pub enum BackupScope {
    /// Everything the source holds
    Full,
    /// Only the named collections
    Collections(Vec<String>),
}

/// Captured, restorable state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    id: String,
    scope: BackupScope,
    captured_state: Vec<u8>,
    checksum: u32,
    created_at: DateTime<Utc>,
}

impl BackupSnapshot {
    pub fn new(scope: BackupScope, captured_state: Vec<u8>) -> Self {
        let created_at = Utc::now();
        Self {
            id: generate_snapshot_id(created_at),
            checksum: compute_checksum(&captured_state),
            scope,
            captured_state,
            created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scope(&self) -> &BackupScope {
        &self.scope
    }

    pub fn captured_state(&self) -> &[u8] {
        &self.captured_state
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether the captured bytes still match the checksum
    pub fn verify(&self) -> bool {
        compute_checksum(&self.captured_state) == self.checksum
    }

    pub fn manifest(&self) -> SnapshotManifest {
        SnapshotManifest {
            snapshot_id: self.id.clone(),
            created_at: self.created_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            scope: self.scope.clone(),
            checksum: format_checksum(self.checksum),
            size_bytes: self.captured_state.len() as u64,
            format_version: 1,
        }
    }

    /// Write state and manifest into `dir`, fsyncing both
    pub fn persist(&self, dir: &Path) -> BackupResult<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| BackupError::io_error_at_path(dir, e))?;

        let state_path = dir.join(format!("{}.snapshot", self.id));
        write_with_fsync(&state_path, &self.captured_state)?;

        let manifest = serde_json::to_vec_pretty(&self.manifest())
            .map_err(|e| BackupError::manifest_failed(e.to_string()))?;
        let manifest_path = dir.join(format!("{}.manifest.json", self.id));
        write_with_fsync(&manifest_path, &manifest)?;

        Ok(state_path)
    }
}

/// On-disk snapshot descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotManifest {
    pub snapshot_id: String,
    pub created_at: String,
    pub scope: BackupScope,
    /// Format: "crc32:XXXXXXXX"
    pub checksum: String,
    pub size_bytes: u64,
    pub format_version: u8,
}

/// Check a persisted snapshot against its manifest
///
/// Reads `<id>.manifest.json`, then the `<id>.snapshot` beside it, and
/// compares format version, size and checksum.
pub fn verify_persisted(manifest_path: &Path) -> RestoreResult<SnapshotManifest> {
    let raw = std::fs::read(manifest_path).map_err(|e| {
        RestoreError::corrupt(format!("Cannot read {}: {}", manifest_path.display(), e))
    })?;
    let manifest: SnapshotManifest = serde_json::from_slice(&raw)
        .map_err(|e| RestoreError::corrupt(format!("Invalid manifest: {}", e)))?;

    if manifest.format_version != 1 {
        return Err(RestoreError::corrupt(format!(
            "Unsupported snapshot format version: expected 1, got {}",
            manifest.format_version
        )));
    }

    let dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let state_path = dir.join(format!("{}.snapshot", manifest.snapshot_id));
    let state = std::fs::read(&state_path).map_err(|_| RestoreError::not_found(&manifest.snapshot_id))?;

    if state.len() as u64 != manifest.size_bytes {
        return Err(RestoreError::corrupt(format!(
            "Size mismatch for {}: manifest says {}, file has {}",
            manifest.snapshot_id,
            manifest.size_bytes,
            state.len()
        )));
    }
    let actual = format_checksum(compute_checksum(&state));
    if actual != manifest.checksum {
        return Err(RestoreError::corrupt(format!(
            "Checksum mismatch for {}: expected {}, got {}",
            manifest.snapshot_id, manifest.checksum, actual
        )));
    }
    Ok(manifest)
}

/// Sortable id: basic RFC3339 timestamp plus a random suffix
pub fn generate_snapshot_id(at: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", at.format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

/// CRC32 (IEEE) of `data`
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

pub fn format_checksum(checksum: u32) -> String {
    format!("crc32:{:08x}", checksum)
}

fn write_with_fsync(path: &Path, bytes: &[u8]) -> BackupResult<()> {
    let mut file: File = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| BackupError::io_error_at_path(path, e))?;
    file.write_all(bytes)
        .map_err(|e| BackupError::io_error_at_path(path, e))?;
    file.sync_all()
        .map_err(|e| BackupError::io_error_at_path(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::RestoreErrorCode;
    use tempfile::tempdir;

    #[test]
    fn test_checksum_deterministic() {
        assert_eq!(compute_checksum(b"state"), compute_checksum(b"state"));
        assert_ne!(compute_checksum(b"state"), compute_checksum(b"other"));
    }

    #[test]
    fn test_snapshot_verifies() {
        let snapshot = BackupSnapshot::new(BackupScope::Full, b"{}".to_vec());
        assert!(snapshot.verify());
        assert_eq!(snapshot.manifest().checksum.len(), "crc32:".len() + 8);
    }

    #[test]
    fn test_snapshot_ids_unique_and_sortable() {
        let at = Utc::now();
        let a = generate_snapshot_id(at);
        let b = generate_snapshot_id(at);
        assert_ne!(a, b);
        assert_eq!(&a[..16], &b[..16]);
        assert!(a[..16].ends_with('Z'));
    }

    #[test]
    fn test_persist_writes_state_and_manifest() {
        let dir = tempdir().unwrap();
        let snapshot = BackupSnapshot::new(
            BackupScope::Collections(vec!["posts".into()]),
            b"{\"posts\":{}}".to_vec(),
        );

        let path = snapshot.persist(dir.path()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), snapshot.captured_state());

        let manifest_path = dir.path().join(format!("{}.manifest.json", snapshot.id()));
        let manifest: SnapshotManifest =
            serde_json::from_slice(&std::fs::read(manifest_path).unwrap()).unwrap();
        assert_eq!(manifest, snapshot.manifest());
    }

    #[test]
    fn test_verify_persisted_detects_tampering() {
        let dir = tempdir().unwrap();
        let snapshot = BackupSnapshot::new(BackupScope::Full, b"{\"a\":{}}".to_vec());
        let state_path = snapshot.persist(dir.path()).unwrap();
        let manifest_path = dir.path().join(format!("{}.manifest.json", snapshot.id()));

        let manifest = verify_persisted(&manifest_path).unwrap();
        assert_eq!(manifest.snapshot_id, snapshot.id());

        std::fs::write(&state_path, b"{\"b\":{}}").unwrap();
        let err = verify_persisted(&manifest_path).unwrap_err();
        assert_eq!(err.code(), RestoreErrorCode::WardenRestoreIntegrity);

        std::fs::remove_file(&state_path).unwrap();
        let err = verify_persisted(&manifest_path).unwrap_err();
        assert_eq!(err.code(), RestoreErrorCode::WardenRestoreNotFound);
    }
}
