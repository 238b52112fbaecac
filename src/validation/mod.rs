//! Validation Chain
//!
//! Ordered, short-circuiting checks run before any transaction opens:
//!
//! 1. Authentication and session validity
//! 2. Permissions against `required_permissions`
//! 3. Rate limit per actor and operation
//! 4. Structural rules against the operation data
//! 5. Integrity scan of the serialized input
//!
//! Each check is a [`Validator`]; extra checks append to the chain without
//! touching the executor.

mod auth;
mod integrity;
mod permission;
pub mod rate_limit;
mod rules;

pub use auth::SessionValidator;
pub use integrity::IntegrityValidator;
pub use permission::{AccessControl, PermissionValidator, StaticAccessControl};
pub use rate_limit::{Clock, ManualClock, RateLimitValidator, RateLimiter, SystemClock};
pub use rules::{Rule, RuleParseError, RulesValidator, ValidationRules};

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ConfigError, ValidationConfig};
use crate::core::context::SecurityContext;
use crate::core::error::GuardError;
use crate::core::operation::CriticalOperation;

/// One pluggable check
#[async_trait]
pub trait Validator: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn validate(
        &self,
        context: &SecurityContext,
        operation: &dyn CriticalOperation,
    ) -> Result<(), GuardError>;
}

/// Ordered list of validators
#[derive(Clone, Default)]
pub struct ValidationChain {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidationChain {
    /// Empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// The five built-in checks in their fixed order
    pub fn standard(
        config: &ValidationConfig,
        access: Arc<dyn AccessControl>,
    ) -> Result<Self, ConfigError> {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        Ok(Self::new()
            .with(SessionValidator::new(config.max_context_age(), config.clock_skew()))
            .with(PermissionValidator::new(access))
            .with(RateLimitValidator::new(limiter))
            .with(RulesValidator)
            .with(IntegrityValidator::from_config(config)?))
    }

    /// Append a validator to the end of the chain
    pub fn with<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn push(&mut self, validator: Arc<dyn Validator>) {
        self.validators.push(validator);
    }

    pub fn names(&self) -> Vec<&str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Run every check in order, stopping at the first rejection
    pub async fn validate(
        &self,
        context: &SecurityContext,
        operation: &dyn CriticalOperation,
    ) -> Result<(), GuardError> {
        for validator in &self.validators {
            validator.validate(context, operation).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeSet;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::ValidationRules;
    use crate::core::operation::{BoxError, CriticalOperation, OperationData, OperationResult};

    /// Operation whose metadata is set field by field
    pub struct StubOperation {
        pub name: String,
        pub permissions: BTreeSet<String>,
        pub rules: ValidationRules,
        pub data: OperationData,
    }

    impl StubOperation {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                permissions: BTreeSet::new(),
                rules: ValidationRules::default(),
                data: OperationData::new(),
            }
        }

        pub fn permission(mut self, permission: &str) -> Self {
            self.permissions.insert(permission.to_string());
            self
        }

        pub fn rules(mut self, rules: ValidationRules) -> Self {
            self.rules = rules;
            self
        }

        pub fn field(mut self, key: &str, value: Value) -> Self {
            self.data.insert(key.to_string(), value);
            self
        }
    }

    #[async_trait]
    impl CriticalOperation for StubOperation {
        fn name(&self) -> &str {
            &self.name
        }

        fn required_permissions(&self) -> BTreeSet<String> {
            self.permissions.clone()
        }

        fn validation_rules(&self) -> ValidationRules {
            self.rules.clone()
        }

        fn data(&self) -> &OperationData {
            &self.data
        }

        async fn execute(&self) -> Result<OperationResult, BoxError> {
            Ok(OperationResult::success(Value::Null))
        }
    }
}
