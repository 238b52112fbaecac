//! JSON output for CLI commands
//!
//! Every command prints exactly one JSON object followed by a newline.

use std::io::Write;

use serde::Serialize;
use serde_json::json;

use super::errors::CliResult;

/// Write a success response
pub fn write_response<W: Write, T: Serialize>(out: &mut W, data: &T) -> CliResult<()> {
    let response = json!({
        "status": "ok",
        "data": data,
    });
    serde_json::to_writer_pretty(&mut *out, &response)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Write an error response
pub fn write_error<W: Write>(out: &mut W, code: &str, message: &str) -> CliResult<()> {
    let response = json!({
        "status": "error",
        "code": code,
        "message": message,
    });
    serde_json::to_writer(&mut *out, &response)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}
