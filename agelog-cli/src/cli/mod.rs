//! Command-line interface for the agelog generator.
//!
//! Parses the flat argument set (aging coefficient, expansion factors,
//! seed, input descriptor, output path) and orchestrates the
//! reader → generator → writer flow.

mod commands;

pub use commands::{render_summary, run_cli, Cli, CliError, ExecutionSummary};
