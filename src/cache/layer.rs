//! Fail-open cache front end

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{error, warn};

use super::{CacheBackend, CacheKey, CacheResult, MokaBackend};
use crate::config::CacheConfig;
use crate::observability::Event;

/// Counters since construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub supplier_calls: u64,
    pub backend_errors: u64,
    pub invalidations: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    supplier_calls: AtomicU64,
    backend_errors: AtomicU64,
    invalidations: AtomicU64,
}

/// Tagged, TTL-bound cache over a [`CacheBackend`]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    in_flight: Mutex<HashMap<CacheKey, Arc<OnceCell<Value>>>>,
    counters: Counters,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            in_flight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Layer over an in-process `moka` backend
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(Arc::new(MokaBackend::from_config(&config)), config)
    }

    /// Build a key with the configured part-length limit
    pub fn key(&self, namespace: &str, parts: &[&str]) -> CacheResult<CacheKey> {
        CacheKey::new(namespace, parts, self.config.max_key_part_len)
    }

    /// Cached value, or `None` on miss or backend failure
    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        match self.backend.get(key).await {
            Ok(Some(value)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event = Event::CacheReadFailed.as_str(),
                    key = %key,
                    error = %e,
                    "cache read failed; treating as miss"
                );
                None
            }
        }
    }

    /// Store a value; `None` TTL uses the configured default
    ///
    /// Returns whether the backend accepted the write.
    pub async fn put(&self, key: &CacheKey, value: Value, ttl: Option<Duration>, tags: &[String]) -> bool {
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        match self.backend.put(key, value, ttl, tags).await {
            Ok(()) => true,
            Err(e) => {
                self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event = Event::CacheWriteFailed.as_str(),
                    key = %key,
                    error = %e,
                    "cache write failed"
                );
                false
            }
        }
    }

    /// Cached value, or compute it once and store it
    ///
    /// Concurrent misses on one key share a single `supplier` call. A failed
    /// supplier stores nothing and its error goes to that caller only.
    pub async fn remember_with<F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        tags: &[String],
        supplier: F,
    ) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let cell = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };

        let result = cell
            .get_or_try_init(|| async {
                // A flight that finished between our miss and joining the
                // map has already stored its value
                if let Ok(Some(value)) = self.backend.get(key).await {
                    return Ok(value);
                }
                self.counters.supplier_calls.fetch_add(1, Ordering::Relaxed);
                let value = supplier().await?;
                self.put(key, value.clone(), ttl, tags).await;
                Ok(value)
            })
            .await
            .map(Value::clone);

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if in_flight.get(key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                in_flight.remove(key);
            }
        }
        result
    }

    /// Invalidate tags with bounded retry
    ///
    /// Returns `false` when every attempt failed; the failure is logged.
    pub async fn invalidate_tags(&self, tags: &[String]) -> bool {
        if tags.is_empty() {
            return true;
        }

        let attempts = self.config.invalidation_retries + 1;
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.backend.invalidate_tags(tags).await {
                Ok(_) => {
                    self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(e) => {
                    self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                    }
                }
            }
        }

        error!(
            event = Event::CacheInvalidationFailed.as_str(),
            tags = ?tags,
            attempts,
            error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
            "cache invalidation failed"
        );
        false
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            supplier_calls: self.counters.supplier_calls.load(Ordering::Relaxed),
            backend_errors: self.counters.backend_errors.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` invalidations; reads and writes always fail
    struct DownBackend {
        failures: AtomicU32,
    }

    #[async_trait]
    impl CacheBackend for DownBackend {
        async fn get(&self, _key: &CacheKey) -> CacheResult<Option<Value>> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn put(&self, _key: &CacheKey, _value: Value, _ttl: Duration, _tags: &[String]) -> CacheResult<()> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn invalidate_tags(&self, _tags: &[String]) -> CacheResult<usize> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(CacheError::Backend("connection refused".into()));
            }
            Ok(0)
        }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            invalidation_retries: 2,
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_remember_computes_once() {
        let cache = CacheLayer::in_memory(config());
        let key = cache.key("content", &["post", "1"]).unwrap();

        let first: Result<Value, ()> = cache
            .remember_with(&key, None, &[], || async { Ok(json!("computed")) })
            .await;
        let second: Result<Value, ()> = cache
            .remember_with(&key, None, &[], || async { Ok(json!("recomputed")) })
            .await;

        assert_eq!(first.unwrap(), json!("computed"));
        assert_eq!(second.unwrap(), json!("computed"));
        let stats = cache.stats();
        assert_eq!(stats.supplier_calls, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_supplier_error_not_cached() {
        let cache = CacheLayer::in_memory(config());
        let key = cache.key("content", &["post", "2"]).unwrap();

        let failed = cache
            .remember_with(&key, None, &[], || async { Err::<Value, _>("db down") })
            .await;
        assert_eq!(failed, Err("db down"));

        let ok: Result<Value, &str> = cache
            .remember_with(&key, None, &[], || async { Ok(json!(2)) })
            .await;
        assert_eq!(ok.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_invalidate_tags_drops_entries() {
        let cache = CacheLayer::in_memory(config());
        let key = cache.key("content", &["post", "3"]).unwrap();
        cache.put(&key, json!(3), None, &["posts".to_string()]).await;

        assert!(cache.invalidate_tags(&["posts".to_string()]).await);
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn test_backend_outage_fails_open() {
        let cache = CacheLayer::new(
            Arc::new(DownBackend {
                failures: AtomicU32::new(u32::MAX),
            }),
            config(),
        );
        let key = cache.key("content", &["post", "4"]).unwrap();

        assert_eq!(cache.get(&key).await, None);
        assert!(!cache.put(&key, json!(4), None, &[]).await);
        let value: Result<Value, ()> = cache
            .remember_with(&key, None, &[], || async { Ok(json!(4)) })
            .await;
        assert_eq!(value.unwrap(), json!(4));

        assert!(!cache.invalidate_tags(&["posts".to_string()]).await);
        assert!(cache.stats().backend_errors >= 6);
    }

    #[tokio::test]
    async fn test_invalidation_retries_then_succeeds() {
        let cache = CacheLayer::new(
            Arc::new(DownBackend {
                failures: AtomicU32::new(2),
            }),
            config(),
        );
        assert!(cache.invalidate_tags(&["posts".to_string()]).await);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_oversized_key_part_rejected() {
        let cache = CacheLayer::in_memory(CacheConfig {
            max_key_part_len: 8,
            ..CacheConfig::default()
        });
        assert!(cache.key("content", &["way-too-long-slug"]).is_err());
    }
}
