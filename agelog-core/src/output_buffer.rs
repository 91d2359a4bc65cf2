//! Columnar staging buffer between the generator and the writer.
//!
//! Emitted operations are appended to a block of parallel column
//! arrays; a full block is handed to the writer pipeline as one unit
//! so the compression stage sees coarse-grained work. The partial
//! final block is flushed on `finish`.

use crate::{
    sink::OperationSink,
    writer::{LogWriter, OperationBlock, WriterError},
};

/// Packs the operation stream into fixed-size blocks.
///
/// Opens the writer's edge stream on construction; [`finish`]
/// flushes the trailing partial block and closes the stream.
///
/// [`finish`]: OutputBuffer::finish
pub struct OutputBuffer<'w> {
    writer: &'w mut LogWriter,
    block: OperationBlock,
    capacity: usize,
}

impl<'w> OutputBuffer<'w> {
    /// Opens the edge stream and prepares the first block.
    ///
    /// # Errors
    /// Returns [`WriterError`] when the stream cannot be opened or the
    /// block cannot be allocated.
    pub fn new(writer: &'w mut LogWriter) -> Result<Self, WriterError> {
        writer.open_edge_stream()?;
        let capacity = writer.block_capacity();
        let block = OperationBlock::with_capacity(capacity)?;
        Ok(Self {
            writer,
            block,
            capacity,
        })
    }

    /// Flushes the partial block and closes the edge stream.
    ///
    /// # Errors
    /// Returns any failure surfaced by the writer pipeline.
    pub fn finish(mut self) -> Result<(), WriterError> {
        if !self.block.is_empty() {
            let block = std::mem::take(&mut self.block);
            self.writer.write_edge_block(block)?;
        }
        self.writer.close_edge_stream()
    }
}

impl OperationSink for OutputBuffer<'_> {
    fn emit(&mut self, source: u64, destination: u64, weight: f64) -> Result<(), WriterError> {
        // Byte order of the serialized pair: smaller identifier first.
        let (source, destination) = if source > destination {
            (destination, source)
        } else {
            (source, destination)
        };

        self.block.push(source, destination, weight);
        if self.block.len() == self.capacity {
            let full =
                std::mem::replace(&mut self.block, OperationBlock::with_capacity(self.capacity)?);
            self.writer.write_edge_block(full)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{LogWriterBuilder, OPERATION_BYTES};
    use std::io::Read;
    use tempfile::TempDir;

    fn read_operations(path: &std::path::Path) -> Vec<(u64, u64, f64)> {
        let bytes = std::fs::read(path).expect("log file exists");
        let marker = b"\n__BINARY_SECTION_FOLLOWS\n";
        let header_end = bytes
            .windows(marker.len())
            .position(|window| window == marker)
            .expect("binary marker");
        let header = std::str::from_utf8(&bytes[..header_end]).expect("ASCII header");
        let edges_begin: usize = header
            .lines()
            .find_map(|line| line.strip_prefix("internal.edges.begin = "))
            .expect("edges begin")
            .trim_end()
            .parse()
            .expect("offset");

        let mut operations = Vec::new();
        let mut cursor = edges_begin;
        while cursor < bytes.len() {
            let mut decoder = flate2::bufread::DeflateDecoder::new(&bytes[cursor..]);
            let mut inflated = Vec::new();
            decoder.read_to_end(&mut inflated).expect("block inflates");
            cursor += decoder.total_in() as usize;

            let count = inflated.len() / OPERATION_BYTES;
            let word = |index: usize| {
                u64::from_le_bytes(inflated[index * 8..(index + 1) * 8].try_into().expect("u64"))
            };
            for i in 0..count {
                operations.push((
                    word(i),
                    word(count + i),
                    f64::from_bits(word(2 * count + i)),
                ));
            }
        }
        operations
    }

    #[test]
    fn emit_canonicalizes_and_splits_blocks() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("log.graphlog");

        let mut writer = LogWriterBuilder::new()
            .with_block_capacity(2)
            .with_compressor_threads(1)
            .build()
            .expect("writer builds");
        writer.create(&path).expect("create");
        writer.write_final_vertices(&[1, 2, 3]).expect("final");
        writer.write_temporary_vertices(&[]).expect("temporary");

        let mut buffer = OutputBuffer::new(&mut writer).expect("buffer opens");
        buffer.emit(20, 10, 1.0).expect("emit");
        buffer.emit(10, 30, 0.0).expect("emit");
        buffer.emit(30, 20, -1.0).expect("emit");
        buffer.finish().expect("finish");
        writer.write_operation_count(3).expect("count");

        let operations = read_operations(&path);
        assert_eq!(
            operations,
            vec![(10, 20, 1.0), (10, 30, 0.0), (20, 30, -1.0)]
        );
    }

    #[test]
    fn finish_without_operations_writes_no_blocks() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("log.graphlog");

        let mut writer = LogWriterBuilder::new()
            .with_block_capacity(2)
            .with_compressor_threads(1)
            .build()
            .expect("writer builds");
        writer.create(&path).expect("create");
        writer.write_final_vertices(&[1]).expect("final");
        writer.write_temporary_vertices(&[]).expect("temporary");

        let buffer = OutputBuffer::new(&mut writer).expect("buffer opens");
        buffer.finish().expect("finish");
        writer.write_operation_count(0).expect("count");

        assert!(read_operations(&path).is_empty());
    }
}
