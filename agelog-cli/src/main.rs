//! CLI entry point for the agelog generator.
//!
//! Parses command-line arguments with clap, runs the generation
//! pipeline, renders the summary to stdout, and maps errors to exit
//! code 1 with a `--help` hint on stderr. Logging is initialised
//! eagerly so all stages emit structured diagnostics via `tracing`.

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use agelog_cli::{
    cli::{render_summary, run_cli, Cli, CliError},
    logging::{self, LoggingError},
};
use tracing::error;

/// Parse CLI arguments, execute the run, render the summary, and flush
/// the output stream.
fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let summary = run_cli(cli).context("failed to generate the update log")?;
    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    render_summary(&summary, &mut writer).context("failed to render summary")?;
    writer.flush().context("failed to flush output")?;
    Ok(())
}

fn main() -> ExitCode {
    if let Err(err) = logging::init_logging() {
        report_logging_init_error(&err);
        return ExitCode::FAILURE;
    }

    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<CliError>() {
                Some(cli_error) => log_cli_error(cli_error),
                None => error!(error = %err, "run failed"),
            }
            report_help_hint();
            ExitCode::FAILURE
        }
    }
}

#[expect(
    clippy::print_stderr,
    reason = "Emit one-off diagnostic before tracing is initialised"
)]
fn report_logging_init_error(err: &LoggingError) {
    eprintln!("failed to initialize logging: {err}");
}

#[expect(
    clippy::print_stderr,
    reason = "The usage hint belongs on stderr next to the error"
)]
fn report_help_hint() {
    eprintln!("Try `agelog --help` for usage.");
}

fn log_cli_error(err: &CliError) {
    match err {
        CliError::Reader(reader) => {
            error!(error = %reader, code = %reader.code(), "run failed");
        }
        CliError::Generator(generator) => {
            error!(error = %generator, code = %generator.code(), "run failed");
        }
        CliError::Writer(writer) => {
            error!(error = %writer, code = %writer.code(), "run failed");
        }
    }
}
