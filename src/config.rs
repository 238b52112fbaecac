//! Static configuration
//!
//! Supplied once at construction time. Every section has serde defaults, so
//! a partial JSON file is a valid configuration.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::operation::Severity;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub validation: ValidationConfig,
    pub cache: CacheConfig,
    pub backup: BackupConfig,
    pub metrics: MetricsConfig,
    pub alerts: AlertConfig,
    pub audit: AuditConfig,
    pub execution: ExecutionConfig,
}

impl WardenConfig {
    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validation.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "validation.rate_limit.window_secs must be positive".into(),
            ));
        }
        let limits = &self.validation.rate_limit;
        if let Some(ceiling) = std::iter::once(&limits.default_ceiling)
            .chain(limits.per_operation.values())
            .find(|c| **c > RateLimitConfig::MAX_CEILING)
        {
            return Err(ConfigError::Invalid(format!(
                "validation.rate_limit ceiling {} exceeds {}",
                ceiling,
                RateLimitConfig::MAX_CEILING
            )));
        }
        if let Err(e) = RegexSet::new(&self.validation.suspicious_patterns) {
            return Err(ConfigError::Invalid(format!(
                "validation.suspicious_patterns: {}",
                e
            )));
        }
        if self.cache.max_key_part_len == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_key_part_len must be positive".into(),
            ));
        }
        if self.metrics.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "metrics.batch_size must be positive".into(),
            ));
        }
        if self.metrics.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "metrics.flush_interval_ms must be positive".into(),
            ));
        }
        if self.alerts.failure_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "alerts.failure_window_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Validation chain settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Oldest acceptable context, in seconds
    pub max_context_age_secs: u64,
    /// Tolerated future skew of `issued_at`, in seconds
    pub clock_skew_secs: u64,
    /// Largest serialized payload accepted
    pub max_payload_bytes: usize,
    /// Patterns the integrity scan rejects
    pub suspicious_patterns: Vec<String>,
    pub rate_limit: RateLimitConfig,
}

impl ValidationConfig {
    pub fn max_context_age(&self) -> Duration {
        Duration::from_secs(self.max_context_age_secs)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_context_age_secs: 3600,
            clock_skew_secs: 30,
            max_payload_bytes: 1024 * 1024,
            suspicious_patterns: default_suspicious_patterns(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn default_suspicious_patterns() -> Vec<String> {
    vec![
        r"(?i)<\s*script\b".to_string(),
        r"(?i)javascript\s*:".to_string(),
        r"(?i)\bunion\b\s+(all\s+)?\bselect\b".to_string(),
        r"(?i);\s*drop\s+table\b".to_string(),
        r"\.\./".to_string(),
        r"\\u0000".to_string(),
    ]
}

/// Rate limit ceilings per operation name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    /// Ceiling for operations without an explicit entry; 0 disables
    pub default_ceiling: u32,
    pub per_operation: HashMap<String, u32>,
    /// Idle keys are pruned beyond this many tracked buckets
    pub max_tracked_keys: usize,
}

impl RateLimitConfig {
    /// Largest ceiling accepted; each tracked key holds one slot per allowed call
    pub const MAX_CEILING: u32 = 65_535;

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn ceiling_for(&self, operation: &str) -> u32 {
        self.per_operation
            .get(operation)
            .copied()
            .unwrap_or(self.default_ceiling)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            default_ceiling: 60,
            per_operation: HashMap::new(),
            max_tracked_keys: 10_000,
        }
    }
}

/// Cache layer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    /// Longest caller-supplied key part accepted
    pub max_key_part_len: usize,
    pub max_capacity: u64,
    /// Extra attempts for a failed tag invalidation
    pub invalidation_retries: u32,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_key_part_len: 256,
            max_capacity: 10_000,
            invalidation_retries: 2,
        }
    }
}

/// Backup manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// How long restored snapshots stay inspectable
    pub retention_secs: u64,
    /// Where snapshots of failed calls are written, if anywhere
    pub persist_dir: Option<PathBuf>,
    /// Operations that always take a snapshot
    pub required_for: HashSet<String>,
}

impl BackupConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retention_secs: 24 * 3600,
            persist_dir: None,
            required_for: HashSet::new(),
        }
    }
}

/// Metrics batching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_flush_retries: u32,
}

impl MetricsConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_ms: 10_000,
            max_flush_retries: 3,
        }
    }
}

/// Escalation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Failures at or above this severity always escalate
    pub escalation_severity: Severity,
    /// Failures of one operation within the window that force escalation
    pub failure_threshold: u32,
    pub failure_window_secs: u64,
}

impl AlertConfig {
    pub fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            escalation_severity: Severity::Critical,
            failure_threshold: 5,
            failure_window_secs: 300,
        }
    }
}

/// Audit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Local append-only log used when the primary sink fails
    pub fallback_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            fallback_path: PathBuf::from("warden-audit-fallback.log"),
        }
    }
}

/// Executor settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Bound applied when an operation declares none, in milliseconds
    pub default_timeout_ms: Option<u64>,
}

impl ExecutionConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }
}
