//! Seam between the generator and the serialization stages.

use crate::writer::WriterError;

/// Weight emitted for a temporary edge insertion.
pub const TEMPORARY_WEIGHT: f64 = 0.0;

/// Weight emitted for an edge removal.
pub const REMOVAL_WEIGHT: f64 = -1.0;

/// Consumer of the generated operation stream.
///
/// The generator emits one call per operation, in log order, with
/// external vertex identifiers. A weight greater than zero inserts a
/// final edge, [`TEMPORARY_WEIGHT`] inserts a temporary edge, and
/// [`REMOVAL_WEIGHT`] removes an edge.
///
/// # Examples
/// ```
/// use agelog_core::{OperationSink, writer::WriterError};
///
/// #[derive(Default)]
/// struct Recording(Vec<(u64, u64, f64)>);
///
/// impl OperationSink for Recording {
///     fn emit(&mut self, source: u64, destination: u64, weight: f64) -> Result<(), WriterError> {
///         self.0.push((source, destination, weight));
///         Ok(())
///     }
/// }
///
/// let mut sink = Recording::default();
/// sink.emit(1, 2, 0.5)?;
/// assert_eq!(sink.0.len(), 1);
/// # Ok::<(), WriterError>(())
/// ```
pub trait OperationSink {
    /// Consumes one operation.
    ///
    /// # Errors
    /// Returns [`WriterError`] when the operation cannot be buffered or
    /// forwarded downstream.
    fn emit(&mut self, source: u64, destination: u64, weight: f64) -> Result<(), WriterError>;
}
