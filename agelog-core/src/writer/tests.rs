//! Unit tests for the log writer lifecycle and header layout.

use std::{fs, io::Read};

use rstest::rstest;
use tempfile::TempDir;

use super::*;

fn small_writer(threads: usize) -> LogWriter {
    LogWriterBuilder::new()
        .with_block_capacity(4)
        .with_compressor_threads(threads)
        .build()
        .expect("configuration is valid")
}

fn header_text(bytes: &[u8]) -> &str {
    let marker = b"\n__BINARY_SECTION_FOLLOWS\n";
    let end = bytes
        .windows(marker.len())
        .position(|window| window == marker)
        .expect("binary marker must be present");
    std::str::from_utf8(&bytes[..end]).expect("header must be ASCII")
}

fn header_value<'a>(header: &'a str, key: &str) -> &'a str {
    header
        .lines()
        .find_map(|line| line.strip_prefix(&format!("{key} = ")))
        .unwrap_or_else(|| panic!("key `{key}` must be present"))
        .trim_end()
}

fn inflate_at(bytes: &[u8], offset: usize) -> Vec<u8> {
    let mut decoder = flate2::bufread::DeflateDecoder::new(&bytes[offset..]);
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .expect("stream must inflate");
    inflated
}

#[test]
fn builder_rejects_zero_parameters() {
    let err = LogWriterBuilder::new()
        .with_block_capacity(0)
        .build()
        .expect_err("zero capacity must fail");
    assert_eq!(err.code(), WriterErrorCode::InvalidConfiguration);

    let err = LogWriterBuilder::new()
        .with_compressor_threads(0)
        .build()
        .expect_err("zero threads must fail");
    assert_eq!(err.code(), WriterErrorCode::InvalidConfiguration);
}

#[test]
fn user_properties_must_not_use_the_internal_prefix() {
    let mut writer = small_writer(1);
    let err = writer
        .set_property("internal.edges.begin", 7)
        .expect_err("reserved prefix must fail");
    assert!(matches!(err, WriterError::ReservedKey { key } if key == "internal.edges.begin"));
}

#[rstest]
#[case::final_vertices_first("write_final_vertices")]
#[case::edge_stream_first("open_edge_stream")]
fn lifecycle_violations_are_rejected(#[case] operation: &str) {
    let mut writer = small_writer(1);
    let err = match operation {
        "write_final_vertices" => writer.write_final_vertices(&[1]).unwrap_err(),
        "open_edge_stream" => writer.open_edge_stream().unwrap_err(),
        other => panic!("unknown case {other}"),
    };
    assert_eq!(err.code(), WriterErrorCode::OutOfOrder);
}

#[test]
fn properties_are_frozen_after_create() {
    let dir = TempDir::new().expect("tempdir");
    let mut writer = small_writer(1);
    writer.create(dir.path().join("log.graphlog")).expect("create");
    let err = writer
        .set_property("seed", 1)
        .expect_err("post-create property must fail");
    assert_eq!(err.code(), WriterErrorCode::OutOfOrder);
}

#[test]
fn header_lists_sorted_properties_and_placeholders() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("log.graphlog");

    let mut writer = small_writer(1);
    writer.set_property("seed", 42_u64).expect("seed");
    writer.set_property("aging_coeff", 10.0).expect("aging");
    writer.set_vertex_counts(3, 1).expect("counts");
    writer.create(&path).expect("create");
    writer.write_final_vertices(&[1, 2, 3]).expect("final");
    writer.write_temporary_vertices(&[9]).expect("temporary");
    writer.open_edge_stream().expect("open");
    writer.close_edge_stream().expect("close");
    writer.write_operation_count(0).expect("count");

    let bytes = fs::read(&path).expect("log file exists");
    let header = header_text(&bytes);

    assert!(header.starts_with("# GRAPHLOG\n"));
    assert!(header.contains("# File created by `agelog'"));

    let keys: Vec<&str> = header
        .lines()
        .filter(|line| line.contains(" = "))
        .map(|line| line.split(" = ").next().expect("key"))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    assert_eq!(keys, sorted, "properties must be sorted ascending");

    assert_eq!(header_value(header, "seed"), "42");
    assert_eq!(header_value(header, "internal.vertices.cardinality"), "4");
    assert_eq!(
        header_value(header, "internal.edges.block_size"),
        (4 * OPERATION_BYTES).to_string()
    );
    assert_eq!(header_value(header, "internal.edges.cardinality"), "0");
}

#[test]
fn placeholders_point_at_the_compressed_streams() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("log.graphlog");

    let mut writer = small_writer(2);
    writer.create(&path).expect("create");
    writer.write_final_vertices(&[10, 20, 30]).expect("final");
    writer.write_temporary_vertices(&[40, 50]).expect("temporary");
    writer.open_edge_stream().expect("open");

    let mut block = OperationBlock::with_capacity(4).expect("block");
    block.push(10, 20, 1.5);
    block.push(20, 30, 0.0);
    writer.write_edge_block(block).expect("submit");
    writer.close_edge_stream().expect("close");
    writer.write_operation_count(2).expect("count");

    let bytes = fs::read(&path).expect("log file exists");
    let header = header_text(&bytes);

    let final_begin: usize = header_value(header, "internal.vertices.final.begin")
        .parse()
        .expect("offset");
    let temporary_begin: usize = header_value(header, "internal.vertices.temporary.begin")
        .parse()
        .expect("offset");
    let edges_begin: usize = header_value(header, "internal.edges.begin")
        .parse()
        .expect("offset");
    assert!(final_begin < temporary_begin && temporary_begin < edges_begin);

    let final_vertices = inflate_at(&bytes, final_begin);
    assert_eq!(final_vertices.len(), 3 * 8);
    assert_eq!(u64::from_le_bytes(final_vertices[0..8].try_into().expect("u64")), 10);

    let temporary_vertices = inflate_at(&bytes, temporary_begin);
    assert_eq!(temporary_vertices.len(), 2 * 8);

    let operations = inflate_at(&bytes, edges_begin);
    assert_eq!(operations.len(), 2 * OPERATION_BYTES);
    let sources: Vec<u64> = operations[0..16]
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("u64")))
        .collect();
    assert_eq!(sources, vec![10, 20]);
    let weights: Vec<f64> = operations[32..48]
        .chunks_exact(8)
        .map(|chunk| f64::from_le_bytes(chunk.try_into().expect("f64")))
        .collect();
    assert_eq!(weights, vec![1.5, 0.0]);
}

#[test]
fn block_capacity_accessor_reflects_the_builder() {
    let writer = small_writer(1);
    assert_eq!(writer.block_capacity(), 4);
    assert_eq!(writer.compressor_threads(), 1);
}
