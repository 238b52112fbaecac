//! Security Context
//!
//! Immutable snapshot of the caller carried through the execution pipeline.
//! Contains identity, origin and request metadata. The core only reads it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Snapshot of the caller for one critical operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityContext {
    operation_name: String,
    actor_id: Option<String>,
    session_id: Option<String>,
    ip_address: String,
    user_agent: String,
    issued_at: DateTime<Utc>,
    request_metadata: BTreeMap<String, Value>,
}

impl SecurityContext {
    /// Start building a context for the named operation
    pub fn builder(operation_name: impl Into<String>) -> SecurityContextBuilder {
        SecurityContextBuilder::new(operation_name)
    }

    /// Context for an authenticated actor with default origin fields
    pub fn for_actor(operation_name: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self::builder(operation_name).actor(actor_id).build()
    }

    /// Context with no actor
    pub fn anonymous(operation_name: impl Into<String>) -> Self {
        Self::builder(operation_name).build()
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn ip_address(&self) -> &str {
        &self.ip_address
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn request_metadata(&self) -> &BTreeMap<String, Value> {
        &self.request_metadata
    }

    /// Whether an actor identity is attached
    pub fn is_authenticated(&self) -> bool {
        self.actor_id.is_some()
    }

    /// Rate-limit bucket key for this caller and `operation`
    pub fn rate_limit_key(&self, operation: &str) -> String {
        format!(
            "{}:{}",
            self.actor_id.as_deref().unwrap_or("anonymous"),
            operation
        )
    }
}

/// Builder for [`SecurityContext`]
#[derive(Debug, Clone)]
pub struct SecurityContextBuilder {
    inner: SecurityContext,
}

impl SecurityContextBuilder {
    fn new(operation_name: impl Into<String>) -> Self {
        Self {
            inner: SecurityContext {
                operation_name: operation_name.into(),
                actor_id: None,
                session_id: None,
                ip_address: "0.0.0.0".to_string(),
                user_agent: String::new(),
                issued_at: Utc::now(),
                request_metadata: BTreeMap::new(),
            },
        }
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.inner.actor_id = Some(actor_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.inner.session_id = Some(session_id.into());
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.inner.ip_address = ip.into();
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.inner.user_agent = agent.into();
        self
    }

    /// Override the issue time (defaults to now)
    pub fn issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.inner.issued_at = at;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inner.request_metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> SecurityContext {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_authenticated_context() {
        let ctx = SecurityContext::for_actor("content.publish", "user-7");

        assert!(ctx.is_authenticated());
        assert_eq!(ctx.actor_id(), Some("user-7"));
        assert_eq!(ctx.operation_name(), "content.publish");
    }

    #[test]
    fn test_anonymous_context() {
        let ctx = SecurityContext::anonymous("content.read");
        assert!(!ctx.is_authenticated());
        assert_eq!(ctx.rate_limit_key("content.read"), "anonymous:content.read");
    }

    #[test]
    fn test_builder_fields() {
        let ctx = SecurityContext::builder("media.upload")
            .actor("u1")
            .session("s1")
            .ip_address("10.0.0.4")
            .user_agent("curl/8")
            .metadata("source", json!("api"))
            .build();

        assert_eq!(ctx.session_id(), Some("s1"));
        assert_eq!(ctx.ip_address(), "10.0.0.4");
        assert_eq!(ctx.user_agent(), "curl/8");
        assert_eq!(ctx.request_metadata()["source"], json!("api"));
        assert_eq!(ctx.rate_limit_key("media.upload"), "u1:media.upload");
    }
}
