//! Argument definitions and command execution for the agelog CLI.

use std::{
    io::{self, Write},
    path::PathBuf,
    process::Command,
};

use agelog_core::{
    GenerationReport, Generator, GeneratorConfigBuilder, GeneratorError, GraphalyticsReader,
    LogWriter, LogWriterBuilder, OutputBuffer, ReaderError, WriterError,
};
use clap::Parser;
use thiserror::Error;
use tracing::{info, instrument};

/// Command-line options parsed by [`clap`].
#[derive(Clone, Debug, Parser)]
#[command(
    name = "agelog",
    about = "Create a log of edge updates that ages a Graphalytics graph into itself."
)]
pub struct Cli {
    /// Number of operations to produce, relative to the input edge count.
    #[arg(short = 'a', long = "aging", default_value_t = 10.0, value_parser = parse_factor)]
    pub aging: f64,

    /// Expansion factor for the edges in the graph.
    #[arg(short = 'e', long = "efe", default_value_t = 1.0, value_parser = parse_factor)]
    pub ef_edges: f64,

    /// Expansion factor for the vertices in the graph.
    #[arg(short = 'v', long = "efv", default_value_t = 1.2, value_parser = parse_factor)]
    pub ef_vertices: f64,

    /// Seed for the random generator; defaults to OS entropy.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Path to the input graph descriptor (.properties).
    pub input: PathBuf,

    /// Path where the update log is written.
    pub output: PathBuf,
}

/// Errors surfaced while executing the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Parsing the input graph failed.
    #[error(transparent)]
    Reader(#[from] ReaderError),
    /// Building or running the generator failed.
    #[error(transparent)]
    Generator(#[from] GeneratorError),
    /// Serializing the log file failed.
    #[error(transparent)]
    Writer(#[from] WriterError),
}

/// Summarises a completed run for the stdout report.
#[derive(Clone, Debug)]
pub struct ExecutionSummary {
    /// Input descriptor path.
    pub input: PathBuf,
    /// Output log path.
    pub output: PathBuf,
    /// Seed the run used.
    pub seed: u64,
    /// Final vertices read from the input.
    pub final_vertices: u64,
    /// Temporary vertices synthesized for the run.
    pub temporary_vertices: u64,
    /// Generation counters.
    pub report: GenerationReport,
}

/// Parses a factor argument, requiring a finite value ≥ 1.
pub(super) fn parse_factor(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|err| format!("`{raw}` is not a number: {err}"))?;
    if !value.is_finite() || value < 1.0 {
        return Err(format!("the factor must be at least 1 (got {value})"));
    }
    Ok(value)
}

/// Executes the generation run described by `cli`.
///
/// # Errors
/// Returns [`CliError`] when reading the graph, generating the
/// operations, or writing the log fails.
///
/// # Examples
/// ```
/// # use std::error::Error;
/// # use agelog_cli::cli::{run_cli, Cli};
/// # use tempfile::TempDir;
/// #
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let dir = TempDir::new()?;
/// std::fs::write(
///     dir.path().join("tiny.properties"),
///     "graph.tiny.vertex-file = tiny.v\n\
///      graph.tiny.edge-file = tiny.e\n\
///      graph.tiny.directed = false\n",
/// )?;
/// std::fs::write(dir.path().join("tiny.v"), "1\n2\n3\n")?;
/// std::fs::write(dir.path().join("tiny.e"), "1 2\n2 3\n1 3\n")?;
///
/// let cli = Cli {
///     aging: 1.0,
///     ef_edges: 1.0,
///     ef_vertices: 1.0,
///     seed: Some(42),
///     input: dir.path().join("tiny.properties"),
///     output: dir.path().join("tiny.graphlog"),
/// };
/// let summary = run_cli(cli)?;
/// assert_eq!(summary.final_vertices, 3);
/// assert_eq!(summary.report.operations, 3);
/// assert!(summary.output.exists());
/// # Ok(())
/// # }
/// ```
#[instrument(
    name = "cli.run",
    err,
    skip(cli),
    fields(
        aging = cli.aging,
        ef_edges = cli.ef_edges,
        ef_vertices = cli.ef_vertices,
    ),
)]
pub fn run_cli(cli: Cli) -> Result<ExecutionSummary, CliError> {
    let seed = cli.seed.unwrap_or_else(rand::random);

    let config = GeneratorConfigBuilder::new()
        .with_aging_factor(cli.aging)
        .with_ef_edges(cli.ef_edges)
        .with_ef_vertices(cli.ef_vertices)
        .with_seed(seed)
        .build()?;

    let reader = GraphalyticsReader::open(&cli.input)?;
    let graph = reader.read_graph()?;
    info!(
        vertices = graph.vertices.len(),
        edges = graph.edges.len(),
        input = %cli.input.display(),
        "input graph loaded"
    );

    let mut generator = Generator::from_graph(graph, &config)?;
    let mut writer = build_writer(&cli, seed, &generator)?;

    writer.create(&cli.output)?;
    writer.write_final_vertices(generator.final_vertex_ids())?;
    writer.write_temporary_vertices(generator.temporary_vertex_ids())?;

    let mut buffer = OutputBuffer::new(&mut writer)?;
    let report = generator.generate(&mut buffer)?;
    buffer.finish()?;
    writer.write_operation_count(report.operations)?;

    info!(
        operations = report.operations,
        output = %cli.output.display(),
        "log file written"
    );

    Ok(ExecutionSummary {
        input: cli.input,
        output: cli.output,
        seed,
        final_vertices: generator.num_final_vertices(),
        temporary_vertices: generator.num_temporary_vertices(),
        report,
    })
}

fn build_writer(cli: &Cli, seed: u64, generator: &Generator) -> Result<LogWriter, CliError> {
    let mut writer = LogWriterBuilder::new().build()?;
    writer.set_property("aging_coeff", cli.aging)?;
    writer.set_property("ef_edges", cli.ef_edges)?;
    writer.set_property("ef_vertices", cli.ef_vertices)?;
    writer.set_property("seed", seed)?;
    writer.set_property("input_graph", cli.input.display())?;
    writer.set_property("hostname", host_name())?;
    writer.set_property("git_last_commit", git_last_commit())?;
    writer.set_vertex_counts(
        generator.num_final_vertices(),
        generator.num_temporary_vertices(),
    )?;
    Ok(writer)
}

fn host_name() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_owned())
}

fn git_last_commit() -> String {
    Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|commit| commit.trim().to_owned())
        .filter(|commit| !commit.is_empty())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Renders `summary` to `writer` in a human-readable text format.
///
/// # Errors
/// Returns [`io::Error`] if writing to the supplied writer fails.
pub fn render_summary(summary: &ExecutionSummary, mut writer: impl Write) -> io::Result<()> {
    writeln!(writer, "input graph: {}", summary.input.display())?;
    writeln!(writer, "output log: {}", summary.output.display())?;
    writeln!(writer, "seed: {}", summary.seed)?;
    writeln!(
        writer,
        "vertices: {} final + {} temporary",
        summary.final_vertices, summary.temporary_vertices
    )?;
    writeln!(writer, "final edges: {}", summary.report.final_edges)?;
    writeln!(
        writer,
        "operations: {} ({} temporary insertions, {} deletions)",
        summary.report.operations,
        summary.report.temporary_insertions,
        summary.report.deletions
    )?;
    writeln!(writer, "peak live edges: {}", summary.report.peak_live_edges)?;
    Ok(())
}
