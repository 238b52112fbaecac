//! CLI module for Warden
//!
//! Provides command-line interface for:
//! - config check: Validate a config file
//! - config default: Print the default config
//! - snapshot verify: Check a persisted snapshot against its manifest

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, ConfigAction, SnapshotAction};
pub use commands::{check_config, run, run_command, verify_snapshot};
pub use errors::{CliError, CliErrorCode, CliResult};
