//! Agelog core library.
//!
//! Generates a synthetic, time-ordered log of edge insertions and
//! deletions that "ages" a static undirected weighted graph into an
//! equivalent final graph. Replaying the log against an empty graph
//! reproduces the input graph exactly.
//!
//! The crate is organized around the data flow of the tool: the
//! [`reader`] loads a Graphalytics graph, the [`generator`] drives the
//! randomized update mix (sampling endpoints through the
//! [`counting_tree`]), the [`output_buffer`] packs emitted operations
//! into columnar blocks, and the [`writer`] compresses and serializes
//! the blocks into the on-disk log.

pub mod counting_tree;
pub mod edge;
mod error;
pub mod generator;
pub mod output_buffer;
pub mod reader;
pub mod sink;
mod temp_edges;
pub mod writer;

pub use crate::{
    counting_tree::{CountingTree, CountingTreeError},
    edge::{Edge, WeightedEdge},
    error::{GeneratorError, GeneratorErrorCode},
    generator::{GenerationReport, Generator, GeneratorConfig, GeneratorConfigBuilder},
    output_buffer::OutputBuffer,
    reader::{GraphalyticsReader, InputEdge, InputGraph, ReaderError, ReaderErrorCode},
    sink::{OperationSink, REMOVAL_WEIGHT, TEMPORARY_WEIGHT},
    writer::{LogWriter, LogWriterBuilder, OperationBlock, WriterError, WriterErrorCode},
};
