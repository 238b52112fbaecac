//! Critical Operation Executor
//!
//! The one entry point callers use. Every call runs the same protocol:
//!
//! 1. Generate an operation id and audit the attempt
//! 2. Run the validation chain; a rejection is audited and returned
//!    without opening a transaction
//! 3. Take the store's isolation hold, then a snapshot if the operation
//!    needs one, before the transaction
//! 4. Open the transaction and run the callback under the metrics timer,
//!    bounded by its timeout and the caller's cancellation token
//! 5. Verify the result
//! 6. Success: commit, invalidate cache tags, drop the snapshot, audit
//! 7. Failure: roll back, restore, audit, count, escalate; each step is
//!    attempted in that order and its failure is only logged
//!
//! The isolation hold lasts from step 3 until the commit, or on failure
//! until the call returns.
//!
//! Errors from step 4 onwards are caught here exactly once and surfaced as
//! a [`SecurityException`] carrying the original cause.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backup::{BackupError, BackupManager, StateSource};
use crate::cache::CacheLayer;
use crate::config::{ConfigError, WardenConfig};
use crate::core::context::SecurityContext;
use crate::core::error::{CoreError, CoreResult, FailureCause, GuardError, SecurityException};
use crate::core::operation::{CriticalOperation, OperationResult};
use crate::core::state::{ExecutionState, StateTrail};
use crate::observability::{
    AuditPhase, AuditRecord, AuditSink, AuditTrail, Escalator, Event, FileAuditLog, LogMetricSink,
    LogNotifier, MetricSink, MetricsRecorder, Notifier,
};
use crate::store::{TransactionId, TransactionalStore};
use crate::validation::{AccessControl, StaticAccessControl, ValidationChain, Validator};

/// Counter names recorded per call
pub mod metric_names {
    pub const SUCCESS: &str = "operation.success";
    pub const FAILURE: &str = "operation.failure";
    pub const REJECTED: &str = "operation.rejected";
    pub const DURATION: &str = "operation.duration";
}

/// Outcome of one call with its id and state trail
#[derive(Debug)]
pub struct Execution {
    pub operation_id: Uuid,
    pub result: CoreResult<OperationResult>,
    pub trail: StateTrail,
}

impl Execution {
    pub fn into_result(self) -> CoreResult<OperationResult> {
        self.result
    }
}

/// Guarded executor for critical operations
pub struct CriticalExecutor {
    config: WardenConfig,
    chain: ValidationChain,
    store: Arc<dyn TransactionalStore>,
    backups: Option<Arc<BackupManager>>,
    cache: Option<Arc<CacheLayer>>,
    audit: AuditTrail,
    metrics: Arc<MetricsRecorder>,
    escalator: Escalator,
}

impl CriticalExecutor {
    pub fn builder(config: WardenConfig) -> CriticalExecutorBuilder {
        CriticalExecutorBuilder::new(config)
    }

    /// Run `operation` and return its result
    pub async fn execute_critical<O: CriticalOperation>(
        &self,
        operation: &O,
        context: &SecurityContext,
    ) -> CoreResult<OperationResult> {
        self.run(operation, context, CancellationToken::new())
            .await
            .into_result()
    }

    /// Run `operation`, stopping the callback if `cancel` fires
    pub async fn execute_critical_with_cancel<O: CriticalOperation>(
        &self,
        operation: &O,
        context: &SecurityContext,
        cancel: CancellationToken,
    ) -> CoreResult<OperationResult> {
        self.run(operation, context, cancel).await.into_result()
    }

    /// Run `operation` and report the full execution
    pub async fn run<O: CriticalOperation>(
        &self,
        operation: &O,
        context: &SecurityContext,
        cancel: CancellationToken,
    ) -> Execution {
        let operation_id = Uuid::new_v4();
        let mut call = Call {
            operation_id,
            name: operation.name().to_string(),
            trail: StateTrail::new(),
        };

        info!(
            event = Event::OperationStarted.as_str(),
            operation_id = %operation_id,
            operation = %call.name,
            actor = context.actor_id().unwrap_or("anonymous"),
            "critical operation started"
        );
        let record = AuditRecord::new(operation_id, &call.name, context, AuditPhase::Start);
        self.audit.record(&record).await;

        call.advance(ExecutionState::Validating);
        let result = match self.chain.validate(context, operation).await {
            Err(rejection) => {
                call.advance(ExecutionState::Rejected);
                self.reject(&call, context, &rejection).await;
                Err(CoreError::Rejected(rejection))
            }
            Ok(()) => {
                call.advance(ExecutionState::Executing);
                self.execute(&mut call, operation, context, &cancel).await
            }
        };
        call.advance(ExecutionState::Audited);

        debug!(
            event = Event::OperationTrail.as_str(),
            operation_id = %operation_id,
            trail = %call.trail,
            "execution trail"
        );
        Execution {
            operation_id,
            result,
            trail: call.trail,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    pub fn backups(&self) -> Option<&Arc<BackupManager>> {
        self.backups.as_ref()
    }

    pub fn cache(&self) -> Option<&Arc<CacheLayer>> {
        self.cache.as_ref()
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    async fn reject(&self, call: &Call, context: &SecurityContext, rejection: &GuardError) {
        let code = CoreError::Rejected(rejection.clone()).code();
        warn!(
            event = Event::OperationRejected.as_str(),
            operation_id = %call.operation_id,
            operation = %call.name,
            code,
            error = %rejection,
            "critical operation rejected"
        );

        let record = AuditRecord::new(call.operation_id, &call.name, context, AuditPhase::Failure)
            .with_error(rejection.to_string())
            .with_state(json!({ "stage": "validation", "code": code }));
        self.audit.record(&record).await;
        self.metrics
            .increment(
                metric_names::REJECTED,
                &[("operation", call.name.as_str()), ("code", code)],
            )
            .await;
    }

    async fn execute<O: CriticalOperation>(
        &self,
        call: &mut Call,
        operation: &O,
        context: &SecurityContext,
        cancel: &CancellationToken,
    ) -> CoreResult<OperationResult> {
        let isolation = match self.store.isolate().await {
            Ok(isolation) => isolation,
            Err(e) => {
                let cause = FailureCause::Transaction(e);
                return Err(self.fail(call, operation, context, None, None, cause).await);
            }
        };

        // Snapshot precedes the transaction so it sees committed state only
        let snapshot_id = if self.backup_required(operation) {
            match self.take_snapshot(operation).await {
                Ok(id) => Some(id),
                Err(cause) => {
                    return Err(self.fail(call, operation, context, None, None, cause).await);
                }
            }
        } else {
            None
        };

        let tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                let cause = FailureCause::Transaction(e);
                return Err(self.fail(call, operation, context, None, snapshot_id, cause).await);
            }
        };

        let outcome = self
            .metrics
            .time(
                metric_names::DURATION,
                &[("operation", call.name.as_str())],
                run_callback(operation, self.timeout_for(operation), cancel),
            )
            .await
            .and_then(|result| {
                if result.is_valid() {
                    Ok(result)
                } else {
                    Err(FailureCause::Integrity(result.verification_errors()))
                }
            });

        let result = match outcome {
            Ok(result) => result,
            Err(cause) => {
                return Err(self.fail(call, operation, context, Some(tx), snapshot_id, cause).await);
            }
        };

        if let Err(e) = self.store.commit(tx).await {
            let cause = FailureCause::Transaction(e);
            return Err(self.fail(call, operation, context, Some(tx), snapshot_id, cause).await);
        }
        call.advance(ExecutionState::Committed);
        drop(isolation);

        let tags = operation.cache_tags();
        if let Some(cache) = &self.cache {
            cache.invalidate_tags(&tags).await;
        }
        if let (Some(backups), Some(id)) = (&self.backups, &snapshot_id) {
            backups.discard(id);
        }

        let record = AuditRecord::new(call.operation_id, &call.name, context, AuditPhase::Success);
        self.audit.record(&record).await;
        self.metrics
            .increment(metric_names::SUCCESS, &[("operation", call.name.as_str())])
            .await;

        info!(
            event = Event::OperationCommitted.as_str(),
            operation_id = %call.operation_id,
            operation = %call.name,
            invalidated_tags = tags.len(),
            "critical operation committed"
        );
        Ok(result)
    }

    /// Roll back, restore, audit, count and escalate, in that order
    async fn fail<O: CriticalOperation>(
        &self,
        call: &mut Call,
        operation: &O,
        context: &SecurityContext,
        tx: Option<TransactionId>,
        snapshot_id: Option<String>,
        cause: FailureCause,
    ) -> CoreError {
        call.advance(ExecutionState::RollingBack);

        let mut rolled_back = true;
        if let Some(tx) = tx {
            if let Err(e) = self.store.rollback(tx).await {
                rolled_back = false;
                error!(
                    event = Event::RollbackFailed.as_str(),
                    operation_id = %call.operation_id,
                    operation = %call.name,
                    transaction = %tx,
                    error = %e,
                    "rollback failed"
                );
            }
        }

        let restored = match (&self.backups, &snapshot_id) {
            (Some(backups), Some(id)) => match backups.restore(id).await {
                Ok(()) => true,
                Err(e) => {
                    error!(
                        event = Event::RestoreFailed.as_str(),
                        operation_id = %call.operation_id,
                        operation = %call.name,
                        snapshot_id = %id,
                        code = %e.code(),
                        error = %e,
                        "snapshot restore failed"
                    );
                    false
                }
            },
            _ => rolled_back,
        };
        call.advance(if restored {
            ExecutionState::Restored
        } else {
            ExecutionState::RestoreFailed
        });

        if let (Some(backups), Some(id)) = (&self.backups, &snapshot_id) {
            match backups.persist(id).await {
                Ok(Some(path)) => info!(
                    event = Event::SnapshotPersisted.as_str(),
                    operation_id = %call.operation_id,
                    path = %path.display(),
                    "failed-call snapshot persisted"
                ),
                Ok(None) => {}
                Err(e) => warn!(
                    event = Event::SnapshotPersisted.as_str(),
                    operation_id = %call.operation_id,
                    error = %e,
                    "failed-call snapshot not persisted"
                ),
            }
        }

        let severity = operation.severity();
        let state = json!({
            "reason": cause.reason(),
            "rolled_back": rolled_back,
            "restored": restored,
            "snapshot_id": snapshot_id,
            "severity": severity,
        });
        let record = AuditRecord::new(call.operation_id, &call.name, context, AuditPhase::Failure)
            .with_error(cause.to_string())
            .with_state(state);
        self.audit.record(&record).await;

        self.metrics
            .increment(
                metric_names::FAILURE,
                &[("operation", call.name.as_str()), ("reason", cause.reason())],
            )
            .await;

        let payload = escalation_payload(call, context, &cause);
        self.escalator.on_failure(&call.name, severity, &payload).await;

        error!(
            event = Event::OperationFailed.as_str(),
            operation_id = %call.operation_id,
            operation = %call.name,
            reason = cause.reason(),
            rolled_back,
            restored,
            error = %cause,
            "critical operation failed"
        );

        CoreError::Failed(SecurityException {
            operation_id: call.operation_id,
            operation: call.name.clone(),
            cause,
        })
    }

    fn backup_required<O: CriticalOperation>(&self, operation: &O) -> bool {
        operation.requires_backup() || self.config.backup.required_for.contains(operation.name())
    }

    async fn take_snapshot<O: CriticalOperation>(&self, operation: &O) -> Result<String, FailureCause> {
        let backups = self.backups.as_ref().ok_or_else(|| {
            FailureCause::Backup(BackupError::capture_failed(
                "operation requires a backup but no backup manager is configured",
            ))
        })?;
        let snapshot = backups
            .snapshot(operation.backup_scope())
            .await
            .map_err(FailureCause::Backup)?;
        Ok(snapshot.id().to_string())
    }

    fn timeout_for<O: CriticalOperation>(&self, operation: &O) -> Option<Duration> {
        operation
            .timeout()
            .or_else(|| self.config.execution.default_timeout())
    }
}

/// Per-call bookkeeping
struct Call {
    operation_id: Uuid,
    name: String,
    trail: StateTrail,
}

impl Call {
    fn advance(&mut self, next: ExecutionState) {
        if let Err(e) = self.trail.advance(next) {
            error!(
                event = Event::OperationTrail.as_str(),
                operation_id = %self.operation_id,
                error = %e,
                "illegal execution transition"
            );
        }
    }
}

/// The business callback, bounded by timeout and cancellation
async fn run_callback<O: CriticalOperation>(
    operation: &O,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<OperationResult, FailureCause> {
    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, operation.execute())
                .await
                .map_err(|_| FailureCause::TimedOut(limit))?
                .map_err(FailureCause::Execution),
            None => operation.execute().await.map_err(FailureCause::Execution),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FailureCause::Cancelled),
        result = bounded => result,
    }
}

fn escalation_payload(call: &Call, context: &SecurityContext, cause: &FailureCause) -> Value {
    json!({
        "operation_id": call.operation_id,
        "operation": call.name,
        "actor": context.actor_id(),
        "ip_address": context.ip_address(),
        "reason": cause.reason(),
        "error": cause.to_string(),
    })
}

/// Assembles a [`CriticalExecutor`]
pub struct CriticalExecutorBuilder {
    config: WardenConfig,
    store: Option<Arc<dyn TransactionalStore>>,
    backups: Option<Arc<BackupManager>>,
    state_source: Option<Arc<dyn StateSource>>,
    cache: Option<Arc<CacheLayer>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    audit_fallback: Option<Arc<dyn AuditSink>>,
    metric_sink: Option<Arc<dyn MetricSink>>,
    metrics: Option<Arc<MetricsRecorder>>,
    notifier: Option<Arc<dyn Notifier>>,
    access: Option<Arc<dyn AccessControl>>,
    extra_validators: Vec<Arc<dyn Validator>>,
}

impl CriticalExecutorBuilder {
    fn new(config: WardenConfig) -> Self {
        Self {
            config,
            store: None,
            backups: None,
            state_source: None,
            cache: None,
            audit_sink: None,
            audit_fallback: None,
            metric_sink: None,
            metrics: None,
            notifier: None,
            access: None,
            extra_validators: Vec::new(),
        }
    }

    /// Transaction boundary (required)
    pub fn store(mut self, store: Arc<dyn TransactionalStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Primary audit sink (required)
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    /// Fallback audit sink; defaults to the configured fallback file
    pub fn audit_fallback(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_fallback = Some(sink);
        self
    }

    pub fn backups(mut self, backups: Arc<BackupManager>) -> Self {
        self.backups = Some(backups);
        self
    }

    /// Build a backup manager over `source` from the backup config
    pub fn state_source(mut self, source: Arc<dyn StateSource>) -> Self {
        self.state_source = Some(source);
        self
    }

    pub fn cache(mut self, cache: Arc<CacheLayer>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn metric_sink(mut self, sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = Some(sink);
        self
    }

    /// Share an existing recorder instead of building one
    pub fn metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = Some(access);
        self
    }

    /// Append a check after the standard ones
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.extra_validators.push(validator);
        self
    }

    pub fn build(self) -> Result<CriticalExecutor, ConfigError> {
        self.config.validate()?;
        let config = self.config;

        let store = self
            .store
            .ok_or_else(|| ConfigError::Invalid("executor requires a transactional store".into()))?;
        let audit_sink = self
            .audit_sink
            .ok_or_else(|| ConfigError::Invalid("executor requires an audit sink".into()))?;

        let access = self
            .access
            .unwrap_or_else(|| Arc::new(StaticAccessControl::new()));
        let mut chain = ValidationChain::standard(&config.validation, access)?;
        for validator in self.extra_validators {
            chain.push(validator);
        }

        let backups = self.backups.or_else(|| {
            self.state_source
                .map(|source| Arc::new(BackupManager::new(source, &config.backup)))
        });

        let fallback = self
            .audit_fallback
            .unwrap_or_else(|| Arc::new(FileAuditLog::deferred(&config.audit.fallback_path)));
        let audit = AuditTrail::new(audit_sink).with_fallback(fallback);

        let metrics = self.metrics.unwrap_or_else(|| {
            let sink = self.metric_sink.unwrap_or_else(|| Arc::new(LogMetricSink));
            Arc::new(MetricsRecorder::new(sink, config.metrics.clone()))
        });

        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let escalator = Escalator::new(notifier, config.alerts.clone());

        Ok(CriticalExecutor {
            config,
            chain,
            store,
            backups,
            cache: self.cache,
            audit,
            metrics,
            escalator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operation::{BoxError, OperationData};
    use crate::observability::MemoryAuditLog;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    struct Publish {
        data: OperationData,
        outcome: Result<OperationResult, String>,
        delay: Option<Duration>,
    }

    impl Publish {
        fn ok() -> Self {
            Self {
                data: OperationData::new(),
                outcome: Ok(OperationResult::success(json!({"published": true}))),
                delay: None,
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                outcome: Err(message.to_string()),
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl CriticalOperation for Publish {
        fn name(&self) -> &str {
            "content.publish"
        }

        fn required_permissions(&self) -> BTreeSet<String> {
            BTreeSet::from(["content.publish".to_string()])
        }

        fn data(&self) -> &OperationData {
            &self.data
        }

        async fn execute(&self) -> Result<OperationResult, BoxError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcome.clone().map_err(BoxError::from)
        }
    }

    fn executor(audit: &MemoryAuditLog) -> CriticalExecutor {
        CriticalExecutor::builder(WardenConfig::default())
            .store(Arc::new(InMemoryStore::new()))
            .audit_sink(Arc::new(audit.clone()))
            .audit_fallback(Arc::new(MemoryAuditLog::new()))
            .access_control(Arc::new(
                StaticAccessControl::new().grant("editor", ["content.*"]),
            ))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_trail() {
        let audit = MemoryAuditLog::new();
        let exec = executor(&audit);
        let ctx = SecurityContext::for_actor("content.publish", "editor");

        let execution = exec.run(&Publish::ok(), &ctx, CancellationToken::new()).await;
        assert!(execution.result.is_ok());
        assert_eq!(
            execution.trail.states(),
            &[
                ExecutionState::Initialized,
                ExecutionState::Validating,
                ExecutionState::Executing,
                ExecutionState::Committed,
                ExecutionState::Audited,
            ]
        );
        assert_eq!(audit.count_phase(execution.operation_id, AuditPhase::Start), 1);
        assert_eq!(audit.count_phase(execution.operation_id, AuditPhase::Success), 1);
        assert_eq!(exec.metrics().counter(metric_names::SUCCESS), 1);
    }

    #[tokio::test]
    async fn test_rejection_trail() {
        let audit = MemoryAuditLog::new();
        let exec = executor(&audit);
        let ctx = SecurityContext::for_actor("content.publish", "viewer");

        let execution = exec.run(&Publish::ok(), &ctx, CancellationToken::new()).await;
        assert_eq!(
            execution.trail.states().last(),
            Some(&ExecutionState::Audited)
        );
        assert!(execution.trail.contains(ExecutionState::Rejected));
        assert_eq!(execution.result.unwrap_err().code(), "AUTHORIZATION_ERROR");
        assert_eq!(audit.count_phase(execution.operation_id, AuditPhase::Failure), 1);
    }

    #[tokio::test]
    async fn test_execution_error_wrapped_once() {
        let audit = MemoryAuditLog::new();
        let exec = executor(&audit);
        let ctx = SecurityContext::for_actor("content.publish", "editor");

        let err = exec
            .execute_critical(&Publish::failing("slug taken"), &ctx)
            .await
            .unwrap_err();
        match err.cause() {
            Some(FailureCause::Execution(inner)) => assert_eq!(inner.to_string(), "slug taken"),
            other => panic!("unexpected cause: {:?}", other),
        }
        assert_eq!(err.code(), "SECURITY_EXCEPTION");
        assert_eq!(exec.metrics().counter(metric_names::FAILURE), 1);
    }

    #[tokio::test]
    async fn test_invalid_result_is_failure() {
        let audit = MemoryAuditLog::new();
        let exec = executor(&audit);
        let ctx = SecurityContext::for_actor("content.publish", "editor");
        let op = Publish {
            outcome: Ok(OperationResult::success(json!(null)).with_error("checksum mismatch")),
            ..Publish::ok()
        };

        let err = exec.execute_critical(&op, &ctx).await.unwrap_err();
        assert!(matches!(err.cause(), Some(FailureCause::Integrity(_))));
        assert_eq!(err.code(), "INTEGRITY_ERROR");
    }

    #[tokio::test]
    async fn test_timeout_bounds_callback() {
        let audit = MemoryAuditLog::new();
        let mut config = WardenConfig::default();
        config.execution.default_timeout_ms = Some(20);
        let exec = CriticalExecutor::builder(config)
            .store(Arc::new(InMemoryStore::new()))
            .audit_sink(Arc::new(audit.clone()))
            .access_control(Arc::new(StaticAccessControl::new().grant("editor", ["*"])))
            .build()
            .unwrap();
        let op = Publish {
            delay: Some(Duration::from_secs(5)),
            ..Publish::ok()
        };

        let err = exec
            .execute_critical(&op, &SecurityContext::for_actor("content.publish", "editor"))
            .await
            .unwrap_err();
        assert!(matches!(err.cause(), Some(FailureCause::TimedOut(_))));
        assert_eq!(err.status_code(), 504);
    }

    #[tokio::test]
    async fn test_backup_required_without_manager_fails_before_begin() {
        let audit = MemoryAuditLog::new();
        let store = Arc::new(InMemoryStore::new());
        let mut config = WardenConfig::default();
        config.backup.required_for.insert("content.publish".into());
        let exec = CriticalExecutor::builder(config)
            .store(store.clone())
            .audit_sink(Arc::new(audit.clone()))
            .access_control(Arc::new(StaticAccessControl::new().grant("editor", ["*"])))
            .build()
            .unwrap();

        let err = exec
            .execute_critical(&Publish::ok(), &SecurityContext::for_actor("content.publish", "editor"))
            .await
            .unwrap_err();
        assert!(matches!(err.cause(), Some(FailureCause::Backup(_))));
        assert_eq!(store.stats().begins, 0);
    }

    #[test]
    fn test_builder_requires_store_and_audit() {
        assert!(CriticalExecutor::builder(WardenConfig::default())
            .audit_sink(Arc::new(MemoryAuditLog::new()))
            .build()
            .is_err());
        assert!(CriticalExecutor::builder(WardenConfig::default())
            .store(Arc::new(InMemoryStore::new()))
            .build()
            .is_err());
    }
}
