//! Transactional store boundary
//!
//! The store is the only component that needs strict mutual exclusion; it
//! provides that through its own transaction isolation. `commit` and
//! `rollback` must be safe to call redundantly: finishing an unknown or
//! already-finished transaction is not an error.
//!
//! A guarded call also snapshots state before `begin` and may restore it
//! after `rollback`. [`TransactionalStore::isolate`] covers that whole span,
//! so a snapshot never sees another call's uncommitted work and a restore
//! never overwrites another call's commit.

mod memory;

pub use memory::{InMemoryStore, TransactionStats};

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// Handle to an open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Exclusive hold on the store across one guarded call; released on drop
#[must_use]
pub struct Isolation {
    _hold: Option<Box<dyn Send + Sync>>,
}

impl Isolation {
    /// No hold beyond what the store's transactions already give
    pub fn none() -> Self {
        Self { _hold: None }
    }

    pub fn holding(hold: impl Send + Sync + 'static) -> Self {
        Self {
            _hold: Some(Box::new(hold)),
        }
    }
}

impl fmt::Debug for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolation")
            .field("held", &self._hold.is_some())
            .finish()
    }
}

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Transaction could not be opened: {0}")]
    BeginFailed(String),

    #[error("Commit failed: {0}")]
    CommitFailed(String),

    #[error("Rollback failed: {0}")]
    RollbackFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BeginFailed(_) => "WARDEN_STORE_BEGIN_FAILED",
            Self::CommitFailed(_) => "WARDEN_STORE_COMMIT_FAILED",
            Self::RollbackFailed(_) => "WARDEN_STORE_ROLLBACK_FAILED",
            Self::NotFound(_) => "WARDEN_STORE_NOT_FOUND",
            Self::Storage(_) => "WARDEN_STORE_IO",
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Transaction boundary exposed by the underlying store
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// Exclude other guarded calls until the returned hold is dropped
    ///
    /// Acquired before the snapshot and held past the restore. Stores whose
    /// snapshots and restores are themselves transactional can keep the
    /// default.
    async fn isolate(&self) -> StoreResult<Isolation> {
        Ok(Isolation::none())
    }

    /// Open a transaction, waiting for isolation if needed
    async fn begin(&self) -> StoreResult<TransactionId>;

    /// Make the transaction's effects permanent
    async fn commit(&self, tx: TransactionId) -> StoreResult<()>;

    /// Discard the transaction's effects
    async fn rollback(&self, tx: TransactionId) -> StoreResult<()>;
}
