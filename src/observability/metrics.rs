//! Metrics recorder
//!
//! - Exact in-process counters, readable at any time
//! - Points buffered in memory and flushed to a [`MetricSink`] when the
//!   buffer reaches `batch_size` or `flush_interval` has elapsed
//! - A batch that fails to flush is re-queued intact and retried; after
//!   `max_flush_retries` failed attempts it is logged and dropped
//! - A recording call that finds a flush due writes at most one batch, and
//!   skips it while another flush is running; the backlog is drained by
//!   [`MetricsRecorder::flush`] or the background flusher

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::{Event, ObservabilityResult};
use crate::config::MetricsConfig;

/// Kind of a recorded point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Timer,
}

/// A single metric point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    fn new(name: &str, kind: MetricKind, value: f64, tags: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            value,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timestamp: Utc::now(),
        }
    }
}

/// Durable destination for metric batches
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn write_batch(&self, batch: &[Metric]) -> ObservabilityResult<()>;
}

/// In-memory sink
#[derive(Debug, Default, Clone)]
pub struct MemoryMetricSink {
    batches: Arc<Mutex<Vec<Vec<Metric>>>>,
}

impl MemoryMetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<Metric>> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// All flushed points in order
    pub fn points(&self) -> Vec<Metric> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl MetricSink for MemoryMetricSink {
    async fn write_batch(&self, batch: &[Metric]) -> ObservabilityResult<()> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(batch.to_vec());
        Ok(())
    }
}

/// Writes each batch as a debug log line
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetricSink;

#[async_trait]
impl MetricSink for LogMetricSink {
    async fn write_batch(&self, batch: &[Metric]) -> ObservabilityResult<()> {
        for metric in batch {
            debug!(
                metric = %metric.name,
                kind = ?metric.kind,
                value = metric.value,
                tags = ?metric.tags,
                "metric"
            );
        }
        Ok(())
    }
}

struct PendingBatch {
    metrics: Vec<Metric>,
    attempts: u32,
}

/// Exact counter values by metric name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub pending_batches: usize,
    pub dropped_batches: u64,
}

/// Batched counters and timers
pub struct MetricsRecorder {
    sink: Arc<dyn MetricSink>,
    config: MetricsConfig,
    counters: Mutex<HashMap<String, HashMap<String, u64>>>,
    buffer: Mutex<Vec<Metric>>,
    pending: Mutex<VecDeque<PendingBatch>>,
    last_flush: Mutex<Instant>,
    dropped_batches: Mutex<u64>,
    flush_gate: tokio::sync::Mutex<()>,
}

impl MetricsRecorder {
    pub fn new(sink: Arc<dyn MetricSink>, config: MetricsConfig) -> Self {
        Self {
            sink,
            config,
            counters: Mutex::new(HashMap::new()),
            buffer: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            last_flush: Mutex::new(Instant::now()),
            dropped_batches: Mutex::new(0),
            flush_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Bump a counter by one
    pub async fn increment(&self, name: &str, tags: &[(&str, &str)]) {
        {
            let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
            *counters
                .entry(name.to_string())
                .or_default()
                .entry(tag_key(tags))
                .or_default() += 1;
        }
        self.push(Metric::new(name, MetricKind::Counter, 1.0, tags))
            .await;
    }

    /// Record a duration in milliseconds
    pub async fn timing(&self, name: &str, elapsed: Duration, tags: &[(&str, &str)]) {
        let millis = elapsed.as_secs_f64() * 1000.0;
        self.push(Metric::new(name, MetricKind::Timer, millis, tags))
            .await;
    }

    /// Run `fut` and record how long it took
    pub async fn time<F, T>(&self, name: &str, tags: &[(&str, &str)], fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let started = Instant::now();
        let output = fut.await;
        self.timing(name, started.elapsed(), tags).await;
        output
    }

    /// Total of a counter across all tag sets
    pub fn counter(&self, name: &str) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters
            .get(name)
            .map(|by_tags| by_tags.values().sum())
            .unwrap_or(0)
    }

    /// Counter value for one exact tag set
    pub fn counter_with_tags(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters
            .get(name)
            .and_then(|by_tags| by_tags.get(&tag_key(tags)).copied())
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, by_tags)| (name.clone(), by_tags.values().sum()))
            .collect();
        MetricsSnapshot {
            counters,
            pending_batches: self.pending.lock().unwrap_or_else(|e| e.into_inner()).len(),
            dropped_batches: *self.dropped_batches.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Points buffered and not yet handed to a batch
    pub fn buffered(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Seal the buffer into batches and write every pending batch
    pub async fn flush(&self) {
        let _gate = self.flush_gate.lock().await;
        self.flush_locked(usize::MAX).await;
    }

    /// Flush on a fixed interval until the returned handle is aborted
    pub fn spawn_flusher(self: &Arc<Self>) -> JoinHandle<()> {
        let recorder = Arc::clone(self);
        let period = recorder.config.flush_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                recorder.flush().await;
            }
        })
    }

    async fn push(&self, metric: Metric) {
        let due = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.push(metric);
            buffer.len() >= self.config.batch_size || self.interval_elapsed()
        };
        if due {
            if let Ok(_gate) = self.flush_gate.try_lock() {
                self.flush_locked(1).await;
            }
        }
    }

    fn interval_elapsed(&self) -> bool {
        self.last_flush
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
            >= self.config.flush_interval()
    }

    /// Seal the buffer, then write up to `max_batches` pending batches
    async fn flush_locked(&self, max_batches: usize) {
        self.seal_buffer();
        *self.last_flush.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();

        for _ in 0..max_batches {
            let next = self
                .pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            let Some(mut batch) = next else {
                break;
            };

            match self.sink.write_batch(&batch.metrics).await {
                Ok(()) => continue,
                Err(e) => {
                    batch.attempts += 1;
                    if batch.attempts > self.config.max_flush_retries {
                        *self.dropped_batches.lock().unwrap_or_else(|e| e.into_inner()) += 1;
                        error!(
                            event = Event::MetricsBatchDropped.as_str(),
                            points = batch.metrics.len(),
                            attempts = batch.attempts,
                            error = %e,
                            "metric batch dropped"
                        );
                        continue;
                    }
                    warn!(
                        event = Event::MetricsFlushRetry.as_str(),
                        points = batch.metrics.len(),
                        attempts = batch.attempts,
                        error = %e,
                        "metric batch flush failed; will retry"
                    );
                    self.pending
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push_front(batch);
                    break;
                }
            }
        }
    }

    fn seal_buffer(&self) {
        let drained: Vec<Metric> = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *buffer)
        };
        if drained.is_empty() {
            return;
        }
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let mut drained = drained.into_iter().peekable();
        while drained.peek().is_some() {
            let metrics: Vec<Metric> = drained.by_ref().take(self.config.batch_size).collect();
            pending.push_back(PendingBatch {
                metrics,
                attempts: 0,
            });
        }
    }
}

fn tag_key(tags: &[(&str, &str)]) -> String {
    let mut sorted: Vec<_> = tags.iter().collect();
    sorted.sort();
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
