//! In-memory document store
//!
//! Collections of JSON documents with single-writer transactions. `begin`
//! waits for the transaction gate and records a pre-image; `rollback`
//! reinstates it. Also serves as a snapshot source for the backup manager.
//!
//! `isolate` takes a second, outer gate. It is always acquired before the
//! transaction gate, never after.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use super::{Isolation, StoreError, StoreResult, TransactionId, TransactionalStore};
use crate::backup::{BackupError, BackupResult, BackupScope, RestoreError, RestoreResult, StateSource};

type Collection = BTreeMap<String, Value>;
type Collections = BTreeMap<String, Collection>;

struct ActiveTransaction {
    pre_image: Collections,
    _permit: OwnedSemaphorePermit,
}

/// Counts of transaction boundary calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub begins: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

/// In-memory transactional document store
pub struct InMemoryStore {
    data: RwLock<Collections>,
    active: Mutex<HashMap<TransactionId, ActiveTransaction>>,
    gate: Arc<Semaphore>,
    isolation: Arc<Semaphore>,
    next_tx: AtomicU64,
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            active: Mutex::new(HashMap::new()),
            gate: Arc::new(Semaphore::new(1)),
            isolation: Arc::new(Semaphore::new(1)),
            next_tx: AtomicU64::new(1),
            begins: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        }
    }

    /// Read a document by ID
    pub fn read(&self, collection: &str, id: &str) -> Option<Value> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(collection).and_then(|c| c.get(id)).cloned()
    }

    /// Write a document, assigning `_id` when absent
    pub fn write(&self, collection: &str, mut document: Value) -> StoreResult<String> {
        let id = document
            .get("_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match document.as_object_mut() {
            Some(obj) => {
                obj.insert("_id".to_string(), Value::String(id.clone()));
            }
            None => {
                return Err(StoreError::Storage(format!(
                    "Document for {} must be an object",
                    collection
                )))
            }
        }

        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.entry(collection.to_string())
            .or_default()
            .insert(id.clone(), document);

        Ok(id)
    }

    /// Merge fields into an existing document
    pub fn update(&self, collection: &str, id: &str, updates: &Value) -> StoreResult<Value> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());

        let doc = data
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;

        if let (Some(doc_obj), Some(updates_obj)) = (doc.as_object_mut(), updates.as_object()) {
            for (k, v) in updates_obj {
                doc_obj.insert(k.clone(), v.clone());
            }
        }

        Ok(doc.clone())
    }

    /// Delete a document, returning whether it existed
    pub fn delete(&self, collection: &str, id: &str) -> bool {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.get_mut(collection)
            .map(|c| c.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(collection).map(|c| c.len()).unwrap_or(0)
    }

    /// Deep copy of every collection
    pub fn dump(&self) -> BTreeMap<String, BTreeMap<String, Value>> {
        self.data.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            begins: self.begins.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// Whether any transaction is open
    pub fn in_transaction(&self) -> bool {
        !self.active.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    fn finish(&self, tx: TransactionId) -> Option<ActiveTransaction> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&tx)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionalStore for InMemoryStore {
    async fn isolate(&self) -> StoreResult<Isolation> {
        let permit = Arc::clone(&self.isolation)
            .acquire_owned()
            .await
            .map_err(|e| StoreError::BeginFailed(e.to_string()))?;
        Ok(Isolation::holding(permit))
    }

    async fn begin(&self) -> StoreResult<TransactionId> {
        let permit = Arc::clone(&self.gate)
            .acquire_owned()
            .await
            .map_err(|e| StoreError::BeginFailed(e.to_string()))?;

        let tx = TransactionId::new(self.next_tx.fetch_add(1, Ordering::Relaxed));
        let pre_image = self.dump();

        self.active.lock().unwrap_or_else(|e| e.into_inner()).insert(
            tx,
            ActiveTransaction {
                pre_image,
                _permit: permit,
            },
        );
        self.begins.fetch_add(1, Ordering::Relaxed);
        Ok(tx)
    }

    async fn commit(&self, tx: TransactionId) -> StoreResult<()> {
        if self.finish(tx).is_some() {
            self.commits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn rollback(&self, tx: TransactionId) -> StoreResult<()> {
        if let Some(active) = self.finish(tx) {
            *self.data.write().unwrap_or_else(|e| e.into_inner()) = active.pre_image;
            self.rollbacks.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[async_trait]
impl StateSource for InMemoryStore {
    async fn capture(&self, scope: &BackupScope) -> BackupResult<Vec<u8>> {
        let data = self.dump();
        let captured: Collections = match scope {
            BackupScope::Full => data,
            BackupScope::Collections(names) => data
                .into_iter()
                .filter(|(name, _)| names.contains(name))
                .collect(),
        };
        serde_json::to_vec(&captured)
            .map_err(|e| BackupError::capture_failed(format!("Cannot encode state: {}", e)))
    }

    async fn apply(&self, scope: &BackupScope, state: &[u8]) -> RestoreResult<()> {
        let captured: Collections = serde_json::from_slice(state)
            .map_err(|e| RestoreError::corrupt(format!("Cannot decode state: {}", e)))?;

        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        match scope {
            BackupScope::Full => *data = captured,
            BackupScope::Collections(names) => {
                for name in names {
                    match captured.get(name) {
                        Some(collection) => {
                            data.insert(name.clone(), collection.clone());
                        }
                        None => {
                            data.remove(name);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
