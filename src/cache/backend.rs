//! Cache backends

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::Expiry;
use serde_json::Value;

use super::{CacheKey, CacheResult};
use crate::config::CacheConfig;

/// Key/value store with tag sets
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Value>>;

    async fn put(&self, key: &CacheKey, value: Value, ttl: Duration, tags: &[String]) -> CacheResult<()>;

    /// Drop every entry carrying any of `tags`; returns entries dropped
    async fn invalidate_tags(&self, tags: &[String]) -> CacheResult<usize>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    ttl: Duration,
    tags: Arc<[String]>,
    /// Distinguishes this write from later writes of the same key
    version: u64,
}

/// Tag -> key -> version of the entry that registered it
type TagIndex = HashMap<String, HashMap<CacheKey, u64>>;

/// Per-entry TTL
struct EntryExpiry;

impl Expiry<CacheKey, Entry> for EntryExpiry {
    fn expire_after_create(&self, _key: &CacheKey, entry: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-process backend on `moka`
///
/// Entries moka evicts on its own (TTL or capacity) are dropped from the
/// tag index by an eviction listener.
pub struct MokaBackend {
    cache: Cache<CacheKey, Entry>,
    tags: Arc<Mutex<TagIndex>>,
    next_version: AtomicU64,
}

impl MokaBackend {
    pub fn new(max_capacity: u64) -> Self {
        let tags: Arc<Mutex<TagIndex>> = Arc::new(Mutex::new(HashMap::new()));
        let index = Arc::clone(&tags);
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .eviction_listener(move |key: Arc<CacheKey>, entry: Entry, cause: RemovalCause| {
                if cause.was_evicted() {
                    unindex(&index, &key, &entry);
                }
            })
            .build();

        Self {
            cache,
            tags,
            next_version: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_capacity)
    }

    /// Keys currently indexed under `tag`
    pub fn tagged(&self, tag: &str) -> usize {
        self.tags
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(tag)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

/// Remove `key` from each of the entry's tags, unless a newer write owns it
fn unindex(tags: &Mutex<TagIndex>, key: &CacheKey, entry: &Entry) {
    let mut index = tags.lock().unwrap_or_else(|e| e.into_inner());
    for tag in entry.tags.iter() {
        if let Some(keys) = index.get_mut(tag) {
            if keys.get(key) == Some(&entry.version) {
                keys.remove(key);
            }
            if keys.is_empty() {
                index.remove(tag);
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MokaBackend {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Value>> {
        Ok(self.cache.get(key).await.map(|entry| entry.value))
    }

    async fn put(&self, key: &CacheKey, value: Value, ttl: Duration, tags: &[String]) -> CacheResult<()> {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        {
            let mut index = self.tags.lock().unwrap_or_else(|e| e.into_inner());
            for tag in tags {
                index
                    .entry(tag.clone())
                    .or_default()
                    .insert(key.clone(), version);
            }
        }
        let entry = Entry {
            value,
            ttl,
            tags: tags.into(),
            version,
        };
        self.cache.insert(key.clone(), entry).await;
        Ok(())
    }

    async fn invalidate_tags(&self, tags: &[String]) -> CacheResult<usize> {
        let keys: HashSet<CacheKey> = {
            let mut index = self.tags.lock().unwrap_or_else(|e| e.into_inner());
            tags.iter()
                .filter_map(|tag| index.remove(tag))
                .flat_map(HashMap::into_keys)
                .collect()
        };

        let mut dropped = 0;
        for key in &keys {
            if self.cache.remove(key).await.is_some() {
                dropped += 1;
            }
        }
        Ok(dropped)
    }
}
