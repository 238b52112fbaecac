//! Logging setup
//!
//! Installs a global `tracing` subscriber. Library code only emits events;
//! binaries and tests decide whether and how they are printed.

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the filter directive
pub const LOG_ENV: &str = "WARDEN_LOG";

/// Filter used when the environment does not provide one
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable output
    Pretty,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(TelemetryError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Unknown log format: {0}")]
    UnknownFormat(String),

    #[error("Failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Install the global subscriber
///
/// Fails instead of panicking when a subscriber is already set.
pub fn init(format: LogFormat) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(false).with_current_span(false))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
    };
    result.map_err(|e| TelemetryError::Install(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_second_init_fails_without_panicking() {
        let _ = init(LogFormat::Pretty);
        assert!(init(LogFormat::Json).is_err());
    }
}
