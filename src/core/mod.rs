//! # Warden Core Module
//!
//! The guarded execution protocol and the types every caller touches.
//!
//! ## Design Principles
//!
//! - One typed operation abstraction; the executor is generic over it
//! - Validation-phase errors surface as-is; execution-phase errors are
//!   caught once and wrapped
//! - Cleanup is best-effort and never masks the original failure
//! - Every call ends audited

pub mod context;
pub mod error;
pub mod executor;
pub mod operation;
pub mod state;

pub use context::{SecurityContext, SecurityContextBuilder};
pub use error::{
    CoreError, CoreResult, FailureCause, GuardCategory, GuardError, SecurityException,
};
pub use executor::{metric_names, CriticalExecutor, CriticalExecutorBuilder, Execution};
pub use operation::{BoxError, CriticalOperation, OperationData, OperationResult, Severity};
pub use state::{ExecutionState, InvalidTransition, StateTrail};
