//! Per-call execution state machine
//!
//! ```text
//! Initialized -> Validating -> Rejected ----------------------------> Audited
//!                           -> Executing -> Committed ---------------> Audited
//!                                        -> RollingBack -> Restored -> Audited
//!                                                       -> RestoreFailed -> Audited
//! ```
//!
//! `Audited` is the only terminal state. Illegal transitions are refused,
//! so no call can skip its audit.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Initialized,
    Validating,
    Rejected,
    Executing,
    Committed,
    RollingBack,
    Restored,
    RestoreFailed,
    Audited,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Initialized => "INITIALIZED",
            ExecutionState::Validating => "VALIDATING",
            ExecutionState::Rejected => "REJECTED",
            ExecutionState::Executing => "EXECUTING",
            ExecutionState::Committed => "COMMITTED",
            ExecutionState::RollingBack => "ROLLING_BACK",
            ExecutionState::Restored => "RESTORED",
            ExecutionState::RestoreFailed => "RESTORE_FAILED",
            ExecutionState::Audited => "AUDITED",
        }
    }

    /// Whether `self -> next` is allowed
    pub fn can_transition_to(&self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Initialized, Validating)
                | (Validating, Rejected)
                | (Validating, Executing)
                | (Executing, Committed)
                | (Executing, RollingBack)
                | (RollingBack, Restored)
                | (RollingBack, RestoreFailed)
                | (Rejected, Audited)
                | (Committed, Audited)
                | (Restored, Audited)
                | (RestoreFailed, Audited)
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == ExecutionState::Audited
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal execution transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ExecutionState,
    pub to: ExecutionState,
}

/// Current state plus every state visited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTrail {
    states: Vec<ExecutionState>,
}

impl StateTrail {
    pub fn new() -> Self {
        Self {
            states: vec![ExecutionState::Initialized],
        }
    }

    pub fn current(&self) -> ExecutionState {
        self.states
            .last()
            .copied()
            .unwrap_or(ExecutionState::Initialized)
    }

    pub fn advance(&mut self, next: ExecutionState) -> Result<(), InvalidTransition> {
        let from = self.current();
        if !from.can_transition_to(next) {
            return Err(InvalidTransition { from, to: next });
        }
        self.states.push(next);
        Ok(())
    }

    pub fn states(&self) -> &[ExecutionState] {
        &self.states
    }

    pub fn contains(&self, state: ExecutionState) -> bool {
        self.states.contains(&state)
    }
}

impl Default for StateTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StateTrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.states.iter().map(ExecutionState::as_str).collect();
        write!(f, "{}", names.join(" -> "))
    }
}
