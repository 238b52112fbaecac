//! Permission checks

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use super::Validator;
use crate::core::context::SecurityContext;
use crate::core::error::GuardError;
use crate::core::operation::CriticalOperation;

/// Source of an actor's granted permissions
#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn permissions_for(&self, actor_id: &str) -> BTreeSet<String>;
}

/// Fixed actor to permission map
///
/// `*` grants everything; `ns.*` grants every permission under `ns.`.
#[derive(Debug, Clone, Default)]
pub struct StaticAccessControl {
    grants: HashMap<String, BTreeSet<String>>,
}

impl StaticAccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant<I, S>(mut self, actor_id: &str, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grants
            .entry(actor_id.to_string())
            .or_default()
            .extend(permissions.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl AccessControl for StaticAccessControl {
    async fn permissions_for(&self, actor_id: &str) -> BTreeSet<String> {
        self.grants.get(actor_id).cloned().unwrap_or_default()
    }
}

/// Whether `granted` covers `required`
pub(crate) fn covers(granted: &BTreeSet<String>, required: &str) -> bool {
    if granted.contains("*") || granted.contains(required) {
        return true;
    }
    granted.iter().any(|g| {
        g.strip_suffix('*')
            .map(|prefix| prefix.ends_with('.') && required.starts_with(prefix))
            .unwrap_or(false)
    })
}

/// Rejects actors lacking any required permission
pub struct PermissionValidator {
    access: Arc<dyn AccessControl>,
}

impl PermissionValidator {
    pub fn new(access: Arc<dyn AccessControl>) -> Self {
        Self { access }
    }
}

#[async_trait]
impl Validator for PermissionValidator {
    fn name(&self) -> &str {
        "permission"
    }

    async fn validate(
        &self,
        context: &SecurityContext,
        operation: &dyn CriticalOperation,
    ) -> Result<(), GuardError> {
        let required = operation.required_permissions();
        if required.is_empty() {
            return Ok(());
        }
        let actor = context.actor_id().ok_or(GuardError::AuthenticationRequired)?;
        let granted = self.access.permissions_for(actor).await;

        match required.iter().find(|p| !covers(&granted, p)) {
            Some(missing) => Err(GuardError::PermissionDenied(missing.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::test_support::StubOperation;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_wildcards() {
        assert!(covers(&set(&["*"]), "backup.restore"));
        assert!(covers(&set(&["content.*"]), "content.publish"));
        assert!(!covers(&set(&["content.*"]), "contentx.publish"));
        assert!(!covers(&set(&["content.read"]), "content.publish"));
        assert!(!covers(&set(&[]), "content.read"));
    }

    #[tokio::test]
    async fn test_missing_permission_reported() {
        let access = StaticAccessControl::new().grant("u1", ["content.read"]);
        let validator = PermissionValidator::new(Arc::new(access));
        let op = StubOperation::new("content.publish")
            .permission("content.read")
            .permission("content.publish");

        let result = validator
            .validate(&SecurityContext::for_actor("content.publish", "u1"), &op)
            .await;
        assert_eq!(
            result,
            Err(GuardError::PermissionDenied("content.publish".into()))
        );
    }

    #[tokio::test]
    async fn test_unknown_actor_denied() {
        let validator = PermissionValidator::new(Arc::new(StaticAccessControl::new()));
        let op = StubOperation::new("media.upload").permission("media.upload");

        let result = validator
            .validate(&SecurityContext::for_actor("media.upload", "ghost"), &op)
            .await;
        assert!(matches!(result, Err(GuardError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_no_requirements_passes() {
        let validator = PermissionValidator::new(Arc::new(StaticAccessControl::new()));
        let result = validator
            .validate(&SecurityContext::anonymous("ping"), &StubOperation::new("ping"))
            .await;
        assert!(result.is_ok());
    }
}
