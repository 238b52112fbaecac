//! Critical Operation Model
//!
//! Every guarded unit of work implements [`CriticalOperation`]. The executor
//! is generic over this trait; callers supply one implementation per use case
//! (content publish, backup restore, media upload, ...).

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backup::BackupScope;
use crate::validation::ValidationRules;

/// Input payload of an operation
pub type OperationData = Map<String, Value>;

/// Error type business callbacks may return
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure severity of an operation, used for escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A guarded unit of business logic
#[async_trait]
pub trait CriticalOperation: Send + Sync {
    /// Stable name used for rate limits, metrics and audit
    fn name(&self) -> &str;

    /// Permissions the actor must hold
    fn required_permissions(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Structural rules checked against [`CriticalOperation::data`]
    fn validation_rules(&self) -> ValidationRules {
        ValidationRules::default()
    }

    /// Caller-supplied input
    fn data(&self) -> &OperationData;

    /// Whether a snapshot must be taken before execution
    fn requires_backup(&self) -> bool {
        false
    }

    /// State captured when a snapshot is taken
    fn backup_scope(&self) -> BackupScope {
        BackupScope::Full
    }

    /// Cache tags invalidated after a successful run
    fn cache_tags(&self) -> Vec<String> {
        Vec::new()
    }

    fn severity(&self) -> Severity {
        Severity::High
    }

    /// Upper bound on the business callback; `None` defers to config
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the business logic
    async fn execute(&self) -> Result<OperationResult, BoxError>;
}

/// Outcome of a business callback, verifiable on its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    success: bool,
    payload: Value,
    validation_errors: Vec<String>,
}

impl OperationResult {
    /// Successful result carrying a payload
    pub fn success(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            validation_errors: Vec::new(),
        }
    }

    /// Unsuccessful result with the reasons
    pub fn failure(errors: Vec<String>) -> Self {
        Self {
            success: false,
            payload: Value::Null,
            validation_errors: errors,
        }
    }

    /// Attach a result-level validation error
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.validation_errors.push(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn validation_errors(&self) -> &[String] {
        &self.validation_errors
    }

    /// A result is valid when it reports success and carries no errors
    pub fn is_valid(&self) -> bool {
        self.success && self.validation_errors.is_empty()
    }

    /// Reasons a result failed verification
    pub fn verification_errors(&self) -> Vec<String> {
        if self.is_valid() {
            return Vec::new();
        }
        if self.validation_errors.is_empty() {
            vec!["operation reported failure".to_string()]
        } else {
            self.validation_errors.clone()
        }
    }
}
