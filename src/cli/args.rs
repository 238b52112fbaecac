//! CLI argument definitions using clap
//!
//! Commands:
//! - warden config check --config <path>
//! - warden config default
//! - warden snapshot verify --manifest <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Warden - guarded execution for critical operations
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format: json or pretty
    #[arg(long, global = true, default_value = "pretty")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Inspect persisted snapshots
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Load and validate a config file, then print the effective config
    Check {
        /// Path to configuration file
        #[arg(long, default_value = "./warden.json")]
        config: PathBuf,
    },

    /// Print the default configuration
    Default,
}

#[derive(Subcommand, Debug)]
pub enum SnapshotAction {
    /// Verify a persisted snapshot against its manifest
    Verify {
        /// Path to `<id>.manifest.json`
        #[arg(long)]
        manifest: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_check() {
        let cli = Cli::try_parse_from(["warden", "config", "check", "--config", "/etc/warden.json"])
            .unwrap();
        match cli.command {
            Command::Config {
                action: ConfigAction::Check { config },
            } => assert_eq!(config, PathBuf::from("/etc/warden.json")),
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.log_format, "pretty");
    }

    #[test]
    fn test_snapshot_verify_requires_manifest() {
        assert!(Cli::try_parse_from(["warden", "snapshot", "verify"]).is_err());
    }
}
