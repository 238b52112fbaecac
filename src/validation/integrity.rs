//! Suspicious-pattern scan over serialized input

use async_trait::async_trait;
use regex::RegexSet;

use super::Validator;
use crate::config::{ConfigError, ValidationConfig};
use crate::core::context::SecurityContext;
use crate::core::error::GuardError;
use crate::core::operation::CriticalOperation;

/// Rejects oversized payloads and known injection shapes
pub struct IntegrityValidator {
    patterns: RegexSet,
    max_payload_bytes: usize,
}

impl IntegrityValidator {
    pub fn new<I, S>(patterns: I, max_payload_bytes: usize) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = RegexSet::new(patterns)
            .map_err(|e| ConfigError::Invalid(format!("suspicious_patterns: {}", e)))?;
        Ok(Self {
            patterns,
            max_payload_bytes,
        })
    }

    pub fn from_config(config: &ValidationConfig) -> Result<Self, ConfigError> {
        Self::new(&config.suspicious_patterns, config.max_payload_bytes)
    }

    /// Scan one serialized payload
    pub fn scan(&self, serialized: &str) -> Result<(), GuardError> {
        if serialized.len() > self.max_payload_bytes {
            return Err(GuardError::Suspicious(format!(
                "payload of {} bytes exceeds {} byte limit",
                serialized.len(),
                self.max_payload_bytes
            )));
        }

        if let Some(index) = self.patterns.matches(serialized).into_iter().next() {
            return Err(GuardError::Suspicious(format!(
                "input matches pattern '{}'",
                self.patterns.patterns()[index]
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Validator for IntegrityValidator {
    fn name(&self) -> &str {
        "integrity"
    }

    async fn validate(
        &self,
        _context: &SecurityContext,
        operation: &dyn CriticalOperation,
    ) -> Result<(), GuardError> {
        let serialized = serde_json::to_string(operation.data())
            .map_err(|e| GuardError::Suspicious(format!("payload not serializable: {}", e)))?;
        self.scan(&serialized)
    }
}
