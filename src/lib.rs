//! warden - guarded execution for critical operations
//!
//! Turns a unit of business logic into a validated, transactional,
//! audited and recoverable operation. Callers implement
//! [`CriticalOperation`] and hand it to a [`CriticalExecutor`].

pub mod backup;
pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod observability;
pub mod store;
pub mod validation;

pub use crate::config::WardenConfig;
pub use crate::core::{
    CoreError, CoreResult, CriticalExecutor, CriticalOperation, OperationResult, SecurityContext,
};
