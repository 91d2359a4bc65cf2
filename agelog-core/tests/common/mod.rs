//! Shared read-back helpers for the log-file integration tests.

use std::{collections::BTreeMap, fs, io::Read, path::Path};

/// A fully decoded log file.
pub struct ParsedLog {
    pub properties: BTreeMap<String, String>,
    pub final_vertices: Vec<u64>,
    pub temporary_vertices: Vec<u64>,
    pub operations: Vec<(u64, u64, f64)>,
}

const BINARY_MARKER: &[u8] = b"\n__BINARY_SECTION_FOLLOWS\n";
const OPERATION_BYTES: usize = 3 * 8;

pub fn parse_log(path: &Path) -> ParsedLog {
    let bytes = fs::read(path).expect("log file exists");
    assert!(bytes.starts_with(b"# GRAPHLOG\n"), "magic line missing");

    let header_end = bytes
        .windows(BINARY_MARKER.len())
        .position(|window| window == BINARY_MARKER)
        .expect("binary marker present");
    let header = std::str::from_utf8(&bytes[..header_end]).expect("ASCII header");

    let mut properties = BTreeMap::new();
    for line in header.lines() {
        if let Some((key, value)) = line.split_once(" = ") {
            properties.insert(key.to_owned(), value.trim_end().to_owned());
        }
    }

    let offset = |key: &str| -> usize {
        properties
            .get(key)
            .unwrap_or_else(|| panic!("property `{key}` present"))
            .parse()
            .unwrap_or_else(|_| panic!("property `{key}` is an offset"))
    };

    let final_vertices = read_u64_stream(&bytes, offset("internal.vertices.final.begin"));
    let temporary_vertices = read_u64_stream(&bytes, offset("internal.vertices.temporary.begin"));
    let operations = read_operation_blocks(&bytes, offset("internal.edges.begin"));

    ParsedLog {
        properties,
        final_vertices,
        temporary_vertices,
        operations,
    }
}

fn inflate(bytes: &[u8], offset: usize) -> (Vec<u8>, usize) {
    let mut decoder = flate2::bufread::DeflateDecoder::new(&bytes[offset..]);
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .expect("deflate stream inflates");
    (inflated, decoder.total_in() as usize)
}

fn read_u64_stream(bytes: &[u8], offset: usize) -> Vec<u64> {
    let (inflated, _) = inflate(bytes, offset);
    assert_eq!(inflated.len() % 8, 0, "u64 stream must be 8-byte aligned");
    inflated
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("u64")))
        .collect()
}

fn read_operation_blocks(bytes: &[u8], offset: usize) -> Vec<(u64, u64, f64)> {
    let mut operations = Vec::new();
    let mut cursor = offset;
    while cursor < bytes.len() {
        let (inflated, consumed) = inflate(bytes, cursor);
        assert!(consumed > 0, "an edge block must consume input");
        cursor += consumed;

        assert_eq!(inflated.len() % OPERATION_BYTES, 0, "ragged edge block");
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

/// The file bytes with the two dated comment lines stripped, so runs
/// started in different seconds stay comparable.
pub fn bytes_after_comments(path: &Path) -> Vec<u8> {
    let bytes = fs::read(path).expect("log file exists");
    let mut newlines = 0;
    let body_start = bytes
        .iter()
        .position(|&byte| {
            if byte == b'\n' {
                newlines += 1;
            }
            newlines == 2
        })
        .expect("comment lines present")
        + 1;
    bytes[body_start..].to_vec()
}
