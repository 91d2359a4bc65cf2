//! Log-file serialization: header, placeholders, and the parallel
//! compression pipeline.
//!
//! The on-disk layout is a text header (`# GRAPHLOG`, sorted
//! `key = value` properties, `__BINARY_SECTION_FOLLOWS`) followed by
//! raw-deflate streams: the final vertex identifiers, the temporary
//! vertex identifiers, and one independent stream per block of
//! operations. Five reserved properties are written as fixed-width
//! placeholder fields and patched in place once their values are
//! known.

mod pipeline;

use std::{
    fmt,
    fs::File,
    io::{self, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    thread,
};

use chrono::Local;
use flate2::{Compression, write::DeflateEncoder};
use thiserror::Error;
use tracing::{debug, info};

use pipeline::Pipeline;

/// Operations per block unless overridden (16 Mi).
pub const DEFAULT_BLOCK_CAPACITY: usize = 1 << 24;

/// Bytes one operation occupies in a serialized block.
pub const OPERATION_BYTES: usize = 3 * 8;

/// Width of a reserved placeholder field in the header, in ASCII
/// characters.
pub const PLACEHOLDER_WIDTH: usize = 19;

/// Cap on blocks queued for compression before the producer blocks.
const MAX_PENDING_COMPRESSIONS: usize = 8;

/// Stable codes describing [`WriterError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum WriterErrorCode {
    /// Builder configuration was invalid.
    InvalidConfiguration,
    /// The log file could not be created or written.
    Io,
    /// A deflate stream could not be produced.
    Compression,
    /// A buffer could not be allocated.
    Allocation,
    /// A user property used the reserved `internal.` prefix.
    ReservedKey,
    /// A lifecycle method was called out of order.
    OutOfOrder,
    /// A pipeline worker panicked.
    WorkerPanicked,
    /// A pipeline worker already reported a failure.
    WorkerFailed,
}

impl WriterErrorCode {
    /// Return the stable machine-readable representation of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidConfiguration => "WRITER_INVALID_CONFIGURATION",
            Self::Io => "WRITER_IO",
            Self::Compression => "WRITER_COMPRESSION",
            Self::Allocation => "WRITER_ALLOCATION",
            Self::ReservedKey => "WRITER_RESERVED_KEY",
            Self::OutOfOrder => "WRITER_OUT_OF_ORDER",
            Self::WorkerPanicked => "WRITER_WORKER_PANICKED",
            Self::WorkerFailed => "WRITER_WORKER_FAILED",
        }
    }
}

impl fmt::Display for WriterErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised while serializing the log file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriterError {
    /// Builder configuration was invalid.
    #[error("invalid writer configuration: {message}")]
    InvalidConfiguration { message: String },
    /// The log file could not be created or written.
    #[error("cannot write `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A deflate stream could not be produced.
    #[error("deflate failed: {message}")]
    Compression { message: String },
    /// A buffer could not be allocated.
    #[error("cannot allocate a buffer of {bytes} bytes")]
    Allocation { bytes: usize },
    /// A user property used the reserved `internal.` prefix.
    #[error("property key `{key}` uses the reserved `internal.` prefix")]
    ReservedKey { key: String },
    /// A lifecycle method was called out of order.
    #[error("`{operation}` is not valid while the writer is {state}")]
    OutOfOrder {
        operation: &'static str,
        state: &'static str,
    },
    /// A pipeline worker panicked.
    #[error("pipeline worker `{worker}` panicked")]
    WorkerPanicked { worker: &'static str },
    /// A pipeline worker already reported a failure.
    #[error("a pipeline worker already reported a failure")]
    WorkerFailed,
}

impl WriterError {
    /// Retrieve the stable [`WriterErrorCode`] for this error.
    #[must_use]
    pub const fn code(&self) -> WriterErrorCode {
        match self {
            Self::InvalidConfiguration { .. } => WriterErrorCode::InvalidConfiguration,
            Self::Io { .. } => WriterErrorCode::Io,
            Self::Compression { .. } => WriterErrorCode::Compression,
            Self::Allocation { .. } => WriterErrorCode::Allocation,
            Self::ReservedKey { .. } => WriterErrorCode::ReservedKey,
            Self::OutOfOrder { .. } => WriterErrorCode::OutOfOrder,
            Self::WorkerPanicked { .. } => WriterErrorCode::WorkerPanicked,
            Self::WorkerFailed => WriterErrorCode::WorkerFailed,
        }
    }
}

/// One columnar block of operations: parallel source, destination, and
/// weight arrays, serialized little-endian in that order.
#[derive(Debug, Default)]
pub struct OperationBlock {
    sources: Vec<u64>,
    destinations: Vec<u64>,
    weights: Vec<f64>,
}

impl OperationBlock {
    /// Creates an empty block with room for `capacity` operations.
    ///
    /// # Errors
    /// Returns [`WriterError::Allocation`] when the arrays cannot be
    /// reserved.
    pub fn with_capacity(capacity: usize) -> Result<Self, WriterError> {
        let mut block = Self::default();
        let bytes = capacity * OPERATION_BYTES;
        let failed = |_| WriterError::Allocation { bytes };
        block.sources.try_reserve_exact(capacity).map_err(failed)?;
        block
            .destinations
            .try_reserve_exact(capacity)
            .map_err(failed)?;
        block.weights.try_reserve_exact(capacity).map_err(failed)?;
        Ok(block)
    }

    /// Returns the number of buffered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns whether the block holds no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Returns the serialized size of the block in bytes.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        self.len() * OPERATION_BYTES
    }

    pub(crate) fn push(&mut self, source: u64, destination: u64, weight: f64) {
        self.sources.push(source);
        self.destinations.push(destination);
        self.weights.push(weight);
    }

    /// Serializes the three column arrays, little-endian.
    pub(crate) fn write_into<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut bytes = Vec::with_capacity(self.serialized_len());
        for &source in &self.sources {
            bytes.extend_from_slice(&source.to_le_bytes());
        }
        for &destination in &self.destinations {
            bytes.extend_from_slice(&destination.to_le_bytes());
        }
        for &weight in &self.weights {
            bytes.extend_from_slice(&weight.to_le_bytes());
        }
        writer.write_all(&bytes)
    }
}

/// Reserved header fields patched in place after the body is written.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Placeholder {
    VerticesFinalBegin,
    VerticesTemporaryBegin,
    EdgesBegin,
    EdgesCardinality,
    EdgesBlockSize,
}

impl Placeholder {
    const ALL: [Self; 5] = [
        Self::VerticesFinalBegin,
        Self::VerticesTemporaryBegin,
        Self::EdgesBegin,
        Self::EdgesCardinality,
        Self::EdgesBlockSize,
    ];

    const fn key(self) -> &'static str {
        match self {
            Self::VerticesFinalBegin => "internal.vertices.final.begin",
            Self::VerticesTemporaryBegin => "internal.vertices.temporary.begin",
            Self::EdgesBegin => "internal.edges.begin",
            Self::EdgesCardinality => "internal.edges.cardinality",
            Self::EdgesBlockSize => "internal.edges.block_size",
        }
    }
}

/// Writer lifecycle; every public operation names the state it needs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    New,
    Created,
    FinalVerticesWritten,
    TemporaryVerticesWritten,
    EdgeStreamOpen,
    EdgeStreamClosed,
    Finished,
}

impl State {
    const fn describe(self) -> &'static str {
        match self {
            Self::New => "not yet created",
            Self::Created => "freshly created",
            Self::FinalVerticesWritten => "holding final vertices",
            Self::TemporaryVerticesWritten => "holding all vertices",
            Self::EdgeStreamOpen => "streaming edges",
            Self::EdgeStreamClosed => "done streaming edges",
            Self::Finished => "finished",
        }
    }
}

/// Configures and constructs [`LogWriter`] instances.
///
/// # Examples
/// ```
/// use agelog_core::LogWriterBuilder;
///
/// let writer = LogWriterBuilder::new()
///     .with_block_capacity(1024)
///     .with_compressor_threads(2)
///     .build()
///     .expect("configuration is valid");
/// assert_eq!(writer.block_capacity(), 1024);
/// ```
#[derive(Clone, Debug)]
pub struct LogWriterBuilder {
    block_capacity: usize,
    compressor_threads: usize,
    tool: String,
}

impl Default for LogWriterBuilder {
    fn default() -> Self {
        Self {
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            compressor_threads: default_compressor_threads(),
            tool: "agelog".to_owned(),
        }
    }
}

impl LogWriterBuilder {
    /// Creates a builder populated with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the number of operations per block.
    #[must_use]
    pub fn with_block_capacity(mut self, capacity: usize) -> Self {
        self.block_capacity = capacity;
        self
    }

    /// Overrides the number of compressor threads.
    #[must_use]
    pub fn with_compressor_threads(mut self, threads: usize) -> Self {
        self.compressor_threads = threads;
        self
    }

    /// Overrides the tool name recorded in the header comment.
    #[must_use]
    pub fn with_tool_name(mut self, tool: impl Into<String>) -> Self {
        self.tool = tool.into();
        self
    }

    /// Validates the configuration and constructs a [`LogWriter`].
    ///
    /// # Errors
    /// Returns [`WriterError::InvalidConfiguration`] when the block
    /// capacity or thread count is zero.
    pub fn build(self) -> Result<LogWriter, WriterError> {
        if self.block_capacity == 0 {
            return Err(WriterError::InvalidConfiguration {
                message: "block capacity must be at least 1".to_owned(),
            });
        }
        if self.compressor_threads == 0 {
            return Err(WriterError::InvalidConfiguration {
                message: "at least one compressor thread is required".to_owned(),
            });
        }
        Ok(LogWriter {
            block_capacity: self.block_capacity,
            compressor_threads: self.compressor_threads,
            tool: self.tool,
            properties: Vec::new(),
            state: State::New,
            path: PathBuf::new(),
            file: None,
            placeholder_offsets: [None; 5],
            pipeline: None,
        })
    }
}

/// Serializes the generated log: header plus compressed binary body.
///
/// The lifecycle is strict: [`create`](Self::create) →
/// [`write_final_vertices`](Self::write_final_vertices) →
/// [`write_temporary_vertices`](Self::write_temporary_vertices) →
/// [`open_edge_stream`](Self::open_edge_stream) → any number of
/// [`write_edge_block`](Self::write_edge_block) →
/// [`close_edge_stream`](Self::close_edge_stream) →
/// [`write_operation_count`](Self::write_operation_count). Calls out
/// of order fail with [`WriterError::OutOfOrder`].
#[derive(Debug)]
pub struct LogWriter {
    block_capacity: usize,
    compressor_threads: usize,
    tool: String,
    properties: Vec<(String, String)>,
    state: State,
    path: PathBuf,
    file: Option<File>,
    placeholder_offsets: [Option<u64>; 5],
    pipeline: Option<Pipeline>,
}

impl LogWriter {
    /// Returns the configured operations-per-block capacity.
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.block_capacity
    }

    /// Returns the configured compressor thread count.
    #[must_use]
    pub fn compressor_threads(&self) -> usize {
        self.compressor_threads
    }

    /// Records a user property for the header. Last write wins.
    ///
    /// # Errors
    /// Returns [`WriterError::ReservedKey`] for keys under the
    /// `internal.` prefix, and [`WriterError::OutOfOrder`] once the
    /// file has been created.
    pub fn set_property(
        &mut self,
        key: &str,
        value: impl fmt::Display,
    ) -> Result<(), WriterError> {
        if key.starts_with("internal.") {
            return Err(WriterError::ReservedKey {
                key: key.to_owned(),
            });
        }
        self.set_any_property(key, value)
    }

    /// Records the vertex cardinalities persisted alongside the user
    /// properties.
    ///
    /// # Errors
    /// Returns [`WriterError::OutOfOrder`] once the file has been
    /// created.
    pub fn set_vertex_counts(
        &mut self,
        num_final: u64,
        num_temporary: u64,
    ) -> Result<(), WriterError> {
        self.set_any_property("internal.vertices.cardinality", num_final + num_temporary)?;
        self.set_any_property("internal.vertices.final.cardinality", num_final)?;
        self.set_any_property("internal.vertices.temporary.cardinality", num_temporary)
    }

    fn set_any_property(
        &mut self,
        key: &str,
        value: impl fmt::Display,
    ) -> Result<(), WriterError> {
        self.expect_state(State::New, "set_property")?;
        let rendered = value.to_string();
        match self.properties.iter_mut().find(|(name, _)| name == key) {
            Some((_, slot)) => *slot = rendered,
            None => self.properties.push((key.to_owned(), rendered)),
        }
        Ok(())
    }

    /// Creates the log file and writes the header. Properties cannot be
    /// modified afterwards.
    ///
    /// # Errors
    /// Returns [`WriterError::Io`] on file-system failures and
    /// [`WriterError::OutOfOrder`] when called twice.
    pub fn create(&mut self, path: impl AsRef<Path>) -> Result<(), WriterError> {
        self.expect_state(State::New, "create")?;
        self.path = path.as_ref().to_path_buf();

        let file = File::create(&self.path).map_err(|source| self.io_error(source))?;
        self.file = Some(file);

        let header = self.render_header();
        self.write_all(&header)?;
        self.patch_placeholder(
            Placeholder::EdgesBlockSize,
            (self.block_capacity * OPERATION_BYTES) as u64,
        )?;

        debug!(path = %self.path.display(), header_bytes = header.len(), "log file created");
        self.state = State::Created;
        Ok(())
    }

    /// Compresses and appends the final vertex identifiers, recording
    /// the stream's start offset in its header placeholder.
    ///
    /// # Errors
    /// Returns [`WriterError`] on I/O or compression failures, or when
    /// called out of order.
    pub fn write_final_vertices(&mut self, vertices: &[u64]) -> Result<(), WriterError> {
        self.expect_state(State::Created, "write_final_vertices")?;
        self.write_vertex_stream(Placeholder::VerticesFinalBegin, vertices)?;
        self.state = State::FinalVerticesWritten;
        Ok(())
    }

    /// Compresses and appends the temporary vertex identifiers.
    ///
    /// # Errors
    /// Returns [`WriterError`] on I/O or compression failures, or when
    /// called out of order.
    pub fn write_temporary_vertices(&mut self, vertices: &[u64]) -> Result<(), WriterError> {
        self.expect_state(State::FinalVerticesWritten, "write_temporary_vertices")?;
        self.write_vertex_stream(Placeholder::VerticesTemporaryBegin, vertices)?;
        self.state = State::TemporaryVerticesWritten;
        Ok(())
    }

    /// Records the edge-body start offset and spawns the compression
    /// pipeline.
    ///
    /// # Errors
    /// Returns [`WriterError`] when workers cannot be spawned or when
    /// called out of order.
    pub fn open_edge_stream(&mut self) -> Result<(), WriterError> {
        self.expect_state(State::TemporaryVerticesWritten, "open_edge_stream")?;

        let offset = self.stream_position()?;
        self.patch_placeholder(Placeholder::EdgesBegin, offset)?;

        let file = self
            .file
            .take()
            .expect("the file exists in every post-create state");
        let pipeline = Pipeline::spawn(
            file,
            self.path.clone(),
            self.compressor_threads,
            MAX_PENDING_COMPRESSIONS,
        )?;
        self.pipeline = Some(pipeline);

        info!(
            compressors = self.compressor_threads,
            block_capacity = self.block_capacity,
            "edge stream opened"
        );
        self.state = State::EdgeStreamOpen;
        Ok(())
    }

    /// Queues one block for compression, blocking while the pipeline's
    /// inbound queue is full.
    ///
    /// # Errors
    /// Returns the first failure reported by any pipeline worker.
    pub fn write_edge_block(&mut self, block: OperationBlock) -> Result<(), WriterError> {
        self.expect_state(State::EdgeStreamOpen, "write_edge_block")?;
        self.pipeline
            .as_ref()
            .expect("the pipeline runs while the edge stream is open")
            .submit(block)
    }

    /// Drains and joins the pipeline workers.
    ///
    /// # Errors
    /// Returns any failure raised by a worker while the stream was
    /// open, including panics.
    pub fn close_edge_stream(&mut self) -> Result<(), WriterError> {
        self.expect_state(State::EdgeStreamOpen, "close_edge_stream")?;
        let pipeline = self
            .pipeline
            .take()
            .expect("the pipeline runs while the edge stream is open");
        let file = pipeline.shutdown()?;
        self.file = Some(file);
        self.state = State::EdgeStreamClosed;
        Ok(())
    }

    /// Patches the operation cardinality into the header and finishes
    /// the file.
    ///
    /// # Errors
    /// Returns [`WriterError`] on I/O failures or when called before
    /// the edge stream is closed.
    pub fn write_operation_count(&mut self, operations: u64) -> Result<(), WriterError> {
        self.expect_state(State::EdgeStreamClosed, "write_operation_count")?;
        self.patch_placeholder(Placeholder::EdgesCardinality, operations)?;
        let path = self.path.clone();
        let file = self
            .file
            .as_mut()
            .expect("the file returns to the writer when the stream closes");
        file.sync_all()
            .map_err(|source| WriterError::Io { path, source })?;
        info!(operations, path = %self.path.display(), "log file finished");
        self.state = State::Finished;
        Ok(())
    }

    fn write_vertex_stream(
        &mut self,
        placeholder: Placeholder,
        vertices: &[u64],
    ) -> Result<(), WriterError> {
        let offset = self.stream_position()?;
        self.patch_placeholder(placeholder, offset)?;

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(vertices.len() * 8)
            .map_err(|_| WriterError::Allocation {
                bytes: vertices.len() * 8,
            })?;
        for &vertex in vertices {
            bytes.extend_from_slice(&vertex.to_le_bytes());
        }

        let path = self.path.clone();
        let file = self
            .file
            .as_mut()
            .expect("the file exists in every post-create state");
        let mut encoder = DeflateEncoder::new(file, Compression::new(9));
        encoder
            .write_all(&bytes)
            .and_then(|()| encoder.finish().map(|_| ()))
            .map_err(|source| WriterError::Io { path, source })?;

        debug!(
            key = placeholder.key(),
            offset,
            count = vertices.len(),
            "vertex stream written"
        );
        Ok(())
    }

    fn render_header(&mut self) -> Vec<u8> {
        let mut entries: Vec<(&str, Option<Placeholder>, &str)> = self
            .properties
            .iter()
            .map(|(key, value)| (key.as_str(), None, value.as_str()))
            .collect();
        for placeholder in Placeholder::ALL {
            entries.push((placeholder.key(), Some(placeholder), ""));
        }
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut offsets = [None; 5];
        let mut header = Vec::new();
        header.extend_from_slice(b"# GRAPHLOG\n");
        let timestamp = Local::now().format("%d/%m/%Y %H:%M:%S");
        header.extend_from_slice(
            format!("# File created by `{}' on {timestamp}\n\n", self.tool).as_bytes(),
        );
        for (key, placeholder, value) in entries {
            header.extend_from_slice(key.as_bytes());
            header.extend_from_slice(b" = ");
            match placeholder {
                Some(placeholder) => {
                    offsets[placeholder as usize] = Some(header.len() as u64);
                    header.extend_from_slice(&[b' '; PLACEHOLDER_WIDTH]);
                }
                None => header.extend_from_slice(value.as_bytes()),
            }
            header.push(b'\n');
        }
        header.extend_from_slice(b"\n__BINARY_SECTION_FOLLOWS\n");

        self.placeholder_offsets = offsets;
        header
    }

    fn expect_state(&self, expected: State, operation: &'static str) -> Result<(), WriterError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(WriterError::OutOfOrder {
                operation,
                state: self.state.describe(),
            })
        }
    }

    fn patch_placeholder(
        &mut self,
        placeholder: Placeholder,
        value: u64,
    ) -> Result<(), WriterError> {
        let offset = self.placeholder_offsets[placeholder as usize]
            .expect("placeholder offsets are recorded when the header is rendered");
        let text = value.to_string();
        debug_assert!(text.len() <= PLACEHOLDER_WIDTH);

        let path = self.path.clone();
        let file = self
            .file
            .as_mut()
            .expect("placeholders are only patched while the writer owns the file");
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(text.as_bytes()))
            .and_then(|_| file.seek(SeekFrom::End(0)))
            .map(|_| ())
            .map_err(|source| WriterError::Io { path, source })
    }

    fn stream_position(&mut self) -> Result<u64, WriterError> {
        let path = self.path.clone();
        self.file
            .as_mut()
            .expect("the file exists in every post-create state")
            .stream_position()
            .map_err(|source| WriterError::Io { path, source })
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), WriterError> {
        let path = self.path.clone();
        self.file
            .as_mut()
            .expect("the file exists in every post-create state")
            .write_all(bytes)
            .map_err(|source| WriterError::Io { path, source })
    }

    fn io_error(&self, source: io::Error) -> WriterError {
        WriterError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn default_compressor_threads() -> usize {
    thread::available_parallelism()
        .map(|cores| cores.get())
        .unwrap_or(1)
        .saturating_sub(2)
        .max(1)
}

#[cfg(test)]
mod tests;
