//! Diagnostics bootstrap for the agelog CLI.
//!
//! All diagnostics go to stderr so the run summary on stdout stays
//! machine-readable. `RUST_LOG` selects the filter (default `info`);
//! `AGELOG_LOG_FORMAT` picks the renderer described by [`LogFormat`].

use std::{env, str::FromStr, sync::OnceLock};

use thiserror::Error;
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

const FORMAT_ENV: &str = "AGELOG_LOG_FORMAT";
const DEFAULT_FILTER: &str = "info";

static INSTALLED: OnceLock<LogFormat> = OnceLock::new();

/// Renderer used for CLI diagnostics.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// Compact single-line text for interactive runs.
    #[default]
    Human,
    /// One JSON object per event, for log collectors.
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            _ => Err(LoggingError::UnknownFormat {
                value: raw.trim().to_owned(),
            }),
        }
    }
}

/// Errors raised while installing the diagnostics subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// `AGELOG_LOG_FORMAT` named a renderer this build does not know.
    #[error("`{value}` is not a log format; use `human` or `json`")]
    UnknownFormat {
        /// The rejected environment value.
        value: String,
    },
    /// Another subscriber already owns the global dispatcher.
    #[error("cannot install the diagnostics subscriber: {source}")]
    Install {
        /// Error raised when setting the global default subscriber.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Reads the requested format from the environment and installs the
/// global subscriber. Installs at most once per process; later calls
/// return without touching the dispatcher.
///
/// # Errors
/// Returns [`LoggingError`] when `AGELOG_LOG_FORMAT` holds an unknown
/// renderer or the global dispatcher is already taken.
pub fn init_logging() -> Result<(), LoggingError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }
    let format = format_from_env()?;
    install(format)?;
    let _ = INSTALLED.set(format);
    Ok(())
}

/// A missing variable means the default renderer; a non-Unicode value
/// cannot name a known renderer, so the lossy conversion is enough to
/// produce the right rejection.
fn format_from_env() -> Result<LogFormat, LoggingError> {
    match env::var_os(FORMAT_ENV) {
        None => Ok(LogFormat::default()),
        Some(raw) => raw.to_string_lossy().parse(),
    }
}

fn install(format: LogFormat) -> Result<(), LoggingError> {
    // Fold crates logging through the `log` facade into the same
    // stream; losing the race for that slot keeps whichever logger won.
    let _ = LogTracer::init();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Human => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|source| LoggingError::Install { source })
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case::empty_means_default("", LogFormat::Human)]
    #[case::human("human", LogFormat::Human)]
    #[case::shouted("JSON", LogFormat::Json)]
    #[case::padded(" json ", LogFormat::Json)]
    fn formats_parse_case_insensitively(#[case] raw: &str, #[case] expected: LogFormat) {
        let format: LogFormat = raw.parse().expect("format must parse");
        assert_eq!(format, expected);
    }

    #[test]
    fn unknown_formats_are_rejected() {
        let err = "yaml".parse::<LogFormat>().expect_err("yaml is not supported");
        assert!(matches!(
            err,
            LoggingError::UnknownFormat { value } if value == "yaml"
        ));
    }

    #[test]
    fn init_logging_installs_at_most_once() {
        init_logging().expect("first call must install the subscriber");
        init_logging().expect("later calls must return without installing");
    }
}
