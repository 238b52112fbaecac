//! Failure escalation
//!
//! A failed critical operation is escalated when its severity reaches the
//! configured level, or when the same operation has failed at least
//! `failure_threshold` times inside `failure_window`. Escalation is
//! best-effort: channel errors are logged and swallowed.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use super::Event;
use crate::config::AlertConfig;
use crate::core::operation::Severity;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification channel '{channel}' failed: {message}")]
    Channel { channel: String, message: String },

    #[error("All {0} notification channels failed")]
    AllFailed(usize),
}

/// Operator notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name used in logs
    fn name(&self) -> &str;

    async fn notify(&self, severity: Severity, payload: &Value) -> Result<(), NotifyError>;
}

/// Emits the notification as an error log line
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, severity: Severity, payload: &Value) -> Result<(), NotifyError> {
        error!(
            event = Event::EscalationSent.as_str(),
            severity = severity.as_str(),
            payload = %payload,
            "critical operation escalated"
        );
        Ok(())
    }
}

/// Delivers to every channel
///
/// A failing channel is logged and skipped; the call fails only when no
/// channel accepted the notification.
pub struct FanoutNotifier {
    channels: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn notify(&self, severity: Severity, payload: &Value) -> Result<(), NotifyError> {
        let mut failed = 0;
        for channel in &self.channels {
            if let Err(e) = channel.notify(severity, payload).await {
                failed += 1;
                warn!(
                    event = Event::EscalationFailed.as_str(),
                    channel = channel.name(),
                    error = %e,
                    "notification channel failed; continuing"
                );
            }
        }
        if failed > 0 && failed == self.channels.len() {
            return Err(NotifyError::AllFailed(failed));
        }
        Ok(())
    }
}

/// A delivered notification
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub severity: Severity,
    pub payload: Value,
}

/// Records notifications in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn notify(&self, severity: Severity, payload: &Value) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Notification {
                severity,
                payload: payload.clone(),
            });
        Ok(())
    }
}

/// Escalation policy over a notifier
pub struct Escalator {
    notifier: Arc<dyn Notifier>,
    config: AlertConfig,
    failures: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Escalator {
    pub fn new(notifier: Arc<dyn Notifier>, config: AlertConfig) -> Self {
        Self {
            notifier,
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Note one failure of `operation`; returns failures inside the window
    pub fn record_failure(&self, operation: &str) -> u32 {
        let window = self.config.failure_window();
        let now = Instant::now();
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let recent = failures.entry(operation.to_string()).or_default();
        while let Some(oldest) = recent.front() {
            if now.duration_since(*oldest) >= window {
                recent.pop_front();
            } else {
                break;
            }
        }
        recent.push_back(now);
        recent.len() as u32
    }

    pub fn should_escalate(&self, severity: Severity, recent_failures: u32) -> bool {
        severity >= self.config.escalation_severity
            || (self.config.failure_threshold > 0 && recent_failures >= self.config.failure_threshold)
    }

    /// Record the failure and notify when the policy says so
    ///
    /// Returns whether the notifier accepted an escalation.
    pub async fn on_failure(&self, operation: &str, severity: Severity, payload: &Value) -> bool {
        let recent = self.record_failure(operation);
        if !self.should_escalate(severity, recent) {
            return false;
        }

        match self.notifier.notify(severity, payload).await {
            Ok(()) => {
                info!(
                    event = Event::EscalationSent.as_str(),
                    operation,
                    severity = severity.as_str(),
                    recent_failures = recent,
                    "failure escalated"
                );
                true
            }
            Err(e) => {
                warn!(
                    event = Event::EscalationFailed.as_str(),
                    operation,
                    channel = self.notifier.name(),
                    error = %e,
                    "escalation failed"
                );
                false
            }
        }
    }
}
