//! CLI command implementations
//!
//! Commands are read-only: they inspect configuration and persisted
//! snapshots and never touch a live executor.

use std::io::{self, Write};
use std::path::Path;

use tracing::info;

use crate::backup::verify_persisted;
use crate::config::WardenConfig;
use crate::observability::{telemetry, Event, LogFormat};

use super::args::{Cli, Command, ConfigAction, SnapshotAction};
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Parse arguments, install logging and run the command
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    let format: LogFormat = cli
        .log_format
        .parse()
        .map_err(|e: telemetry::TelemetryError| CliError::config_error(e.to_string()))?;
    telemetry::init(format).map_err(|e| CliError::io_error(e.to_string()))?;

    let mut stdout = io::stdout();
    let result = run_command(cli.command, &mut stdout);
    if let Err(e) = &result {
        write_error(&mut stdout, e.code().code(), e.message())?;
    }
    result
}

/// Run one command, writing its output to `out`
pub fn run_command<W: Write>(cmd: Command, out: &mut W) -> CliResult<()> {
    match cmd {
        Command::Config {
            action: ConfigAction::Check { config },
        } => check_config(&config, out),
        Command::Config {
            action: ConfigAction::Default,
        } => write_response(out, &WardenConfig::default()),
        Command::Snapshot {
            action: SnapshotAction::Verify { manifest },
        } => verify_snapshot(&manifest, out),
    }
}

/// Load and validate a config file, printing the effective config
pub fn check_config<W: Write>(path: &Path, out: &mut W) -> CliResult<()> {
    let config = WardenConfig::load(path).map_err(|e| CliError::config_error(e.to_string()))?;
    info!(
        event = Event::ConfigLoaded.as_str(),
        path = %path.display(),
        "configuration valid"
    );
    write_response(out, &config)
}

/// Verify a persisted snapshot and print its manifest
pub fn verify_snapshot<W: Write>(manifest: &Path, out: &mut W) -> CliResult<()> {
    let manifest = verify_persisted(manifest).map_err(|e| CliError::snapshot_invalid(e.to_string()))?;
    write_response(out, &manifest)
}
