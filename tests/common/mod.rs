//! Shared fixtures for execution core tests
//!
//! Operations here mutate an [`InMemoryStore`] directly so tests can
//! compare store contents before and after a call.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use warden::cache::{CacheBackend, CacheError, CacheKey, CacheLayer, CacheResult};
use warden::config::WardenConfig;
use warden::core::{BoxError, CriticalOperation, OperationData, OperationResult, Severity};
use warden::observability::{
    AuditRecord, AuditSink, MemoryAuditLog, MemoryMetricSink, MemoryNotifier, MetricsRecorder,
    ObservabilityError, ObservabilityResult,
};
use warden::store::InMemoryStore;
use warden::validation::{StaticAccessControl, ValidationRules};
use warden::CriticalExecutor;

pub const EDITOR: &str = "editor";
pub const VIEWER: &str = "viewer";
pub const CREATE_POST: &str = "content.create_post";

/// Audit sink that rejects every record
pub struct FailingAuditSink;

#[async_trait]
impl AuditSink for FailingAuditSink {
    async fn append(&self, _record: &AuditRecord) -> ObservabilityResult<()> {
        Err(ObservabilityError::new("audit database unreachable"))
    }
}

/// Cache backend that is always down
pub struct UnreachableCache;

#[async_trait]
impl CacheBackend for UnreachableCache {
    async fn get(&self, _key: &CacheKey) -> CacheResult<Option<Value>> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn put(&self, _key: &CacheKey, _value: Value, _ttl: Duration, _tags: &[String]) -> CacheResult<()> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn invalidate_tags(&self, _tags: &[String]) -> CacheResult<usize> {
        Err(CacheError::Backend("connection refused".into()))
    }
}

/// How [`CreatePost`] ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    /// Sleep, then write the post and succeed
    Slow(Duration),
    /// Write the post, then return an error
    FailAfterWrite,
    /// Write the post, then sleep far past any test deadline
    Hang,
}

/// Writes one post into the `posts` collection
pub struct CreatePost {
    pub store: Arc<InMemoryStore>,
    pub data: OperationData,
    pub outcome: Outcome,
    pub backup: bool,
    pub severity: Severity,
    pub tags: Vec<String>,
    pub calls: Arc<AtomicUsize>,
}

impl CreatePost {
    pub fn new(store: Arc<InMemoryStore>, title: &str) -> Self {
        let mut data = OperationData::new();
        data.insert("title".into(), json!(title));
        Self {
            store,
            data,
            outcome: Outcome::Succeed,
            backup: false,
            severity: Severity::High,
            tags: vec!["posts".to_string()],
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_backup(mut self) -> Self {
        self.backup = true;
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CriticalOperation for CreatePost {
    fn name(&self) -> &str {
        CREATE_POST
    }

    fn required_permissions(&self) -> BTreeSet<String> {
        BTreeSet::from(["content.create".to_string()])
    }

    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::parse([("title", "required|string")]).unwrap_or_default()
    }

    fn data(&self) -> &OperationData {
        &self.data
    }

    fn requires_backup(&self) -> bool {
        self.backup
    }

    fn cache_tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    async fn execute(&self) -> Result<OperationResult, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Outcome::Slow(delay) = self.outcome {
            tokio::time::sleep(delay).await;
        }
        let id = self.store.write("posts", Value::Object(self.data.clone()))?;
        match self.outcome {
            Outcome::Succeed | Outcome::Slow(_) => Ok(OperationResult::success(json!({ "id": id }))),
            Outcome::FailAfterWrite => Err("search index rejected post".into()),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(OperationResult::success(json!({ "id": id })))
            }
        }
    }
}

/// Everything a test inspects after a call
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub audit: MemoryAuditLog,
    pub fallback: MemoryAuditLog,
    pub metrics: Arc<MetricsRecorder>,
    pub metric_sink: Arc<MemoryMetricSink>,
    pub notifier: MemoryNotifier,
    pub cache: Arc<CacheLayer>,
    pub executor: CriticalExecutor,
}

pub fn access() -> StaticAccessControl {
    StaticAccessControl::new().grant(EDITOR, ["content.*"])
}

pub fn harness(config: WardenConfig) -> Harness {
    harness_with(config, |builder| builder)
}

/// Build a harness, letting the test adjust the builder last
pub fn harness_with<F>(config: WardenConfig, adjust: F) -> Harness
where
    F: FnOnce(warden::core::CriticalExecutorBuilder) -> warden::core::CriticalExecutorBuilder,
{
    let store = Arc::new(InMemoryStore::new());
    let audit = MemoryAuditLog::new();
    let fallback = MemoryAuditLog::new();
    let metric_sink = Arc::new(MemoryMetricSink::new());
    let metrics = Arc::new(MetricsRecorder::new(
        metric_sink.clone(),
        config.metrics.clone(),
    ));
    let notifier = MemoryNotifier::new();
    let cache = Arc::new(CacheLayer::in_memory(config.cache.clone()));

    let builder = CriticalExecutor::builder(config)
        .store(store.clone())
        .state_source(store.clone())
        .audit_sink(Arc::new(audit.clone()))
        .audit_fallback(Arc::new(fallback.clone()))
        .metrics(metrics.clone())
        .notifier(Arc::new(notifier.clone()))
        .cache(cache.clone())
        .access_control(Arc::new(access()));

    let executor = adjust(builder).build().expect("executor config is valid");

    Harness {
        store,
        audit,
        fallback,
        metrics,
        metric_sink,
        notifier,
        cache,
        executor,
    }
}
