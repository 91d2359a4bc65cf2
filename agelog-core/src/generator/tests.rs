//! Scenario and property tests for the generator state machine.

use std::collections::HashMap;

use rstest::rstest;

use crate::{
    error::{GeneratorError, GeneratorErrorCode},
    reader::{InputEdge, InputGraph},
    sink::OperationSink,
    writer::WriterError,
};

use super::{Generator, GeneratorConfigBuilder};

#[derive(Default)]
struct RecordingSink {
    operations: Vec<(u64, u64, f64)>,
}

impl OperationSink for RecordingSink {
    fn emit(&mut self, source: u64, destination: u64, weight: f64) -> Result<(), WriterError> {
        self.operations.push((source, destination, weight));
        Ok(())
    }
}

fn triangle() -> InputGraph {
    InputGraph {
        vertices: vec![1, 2, 3],
        edges: vec![
            InputEdge { source: 1, destination: 2, weight: 1.0 },
            InputEdge { source: 2, destination: 3, weight: 1.0 },
            InputEdge { source: 1, destination: 3, weight: 1.0 },
        ],
    }
}

fn path(count: u64) -> InputGraph {
    InputGraph {
        vertices: (1..=count).collect(),
        edges: (1..count)
            .map(|v| InputEdge {
                source: v,
                destination: v + 1,
                weight: v as f64,
            })
            .collect(),
    }
}

fn pair(source: u64, destination: u64) -> (u64, u64) {
    if source < destination {
        (source, destination)
    } else {
        (destination, source)
    }
}

/// Replays the stream against an empty graph, checking every step is
/// legal, and returns the final edge set with weights.
fn replay(operations: &[(u64, u64, f64)]) -> HashMap<(u64, u64), f64> {
    #[derive(PartialEq)]
    enum Live {
        Final(f64),
        Temporary,
    }

    let mut graph: HashMap<(u64, u64), Live> = HashMap::new();
    for &(source, destination, weight) in operations {
        let key = pair(source, destination);
        if weight < 0.0 {
            let removed = graph.remove(&key);
            assert!(
                removed == Some(Live::Temporary),
                "deletions must target a live temporary edge"
            );
        } else if weight == 0.0 {
            let previous = graph.insert(key, Live::Temporary);
            assert!(previous.is_none(), "temporary inserts must be fresh");
        } else {
            let previous = graph.insert(key, Live::Final(weight));
            assert!(previous.is_none(), "final inserts must be fresh");
        }
    }

    graph
        .into_iter()
        .map(|(key, live)| match live {
            Live::Final(weight) => (key, weight),
            Live::Temporary => panic!("a temporary edge survived to end-of-stream"),
        })
        .collect()
}

fn expected_edges(graph: &InputGraph) -> HashMap<(u64, u64), f64> {
    graph
        .edges
        .iter()
        .map(|edge| (pair(edge.source, edge.destination), edge.weight))
        .collect()
}

#[test]
fn aging_one_emits_exactly_the_final_edges() {
    let graph = triangle();
    let expected = expected_edges(&graph);
    let config = GeneratorConfigBuilder::new()
        .with_ef_vertices(1.0)
        .with_ef_edges(1.0)
        .with_aging_factor(1.0)
        .with_seed(42)
        .build()
        .expect("configuration is valid");

    let mut generator = Generator::from_graph(graph, &config).expect("generator builds");
    assert_eq!(generator.num_operations(), 3);
    assert_eq!(generator.num_temporary_vertices(), 0);

    let mut sink = RecordingSink::default();
    let report = generator.generate(&mut sink).expect("generation succeeds");

    assert_eq!(report.operations, 3);
    assert_eq!(report.final_edges, 3);
    assert_eq!(report.temporary_insertions, 0);
    assert_eq!(report.deletions, 0);
    assert_eq!(report.peak_live_edges, 3);
    assert!(sink.operations.iter().all(|&(_, _, weight)| weight > 0.0));
    assert_eq!(replay(&sink.operations), expected);
}

#[test]
fn aging_three_churns_each_edge_once() {
    let graph = triangle();
    let expected = expected_edges(&graph);
    let config = GeneratorConfigBuilder::new()
        .with_ef_vertices(1.0)
        .with_ef_edges(1.0)
        .with_aging_factor(3.0)
        .with_seed(42)
        .build()
        .expect("configuration is valid");

    let mut generator = Generator::from_graph(graph, &config).expect("generator builds");
    let mut sink = RecordingSink::default();
    let report = generator.generate(&mut sink).expect("generation succeeds");

    assert_eq!(report.operations, 9);
    assert_eq!(sink.operations.len(), 9);
    assert_eq!(report.final_edges, 3);
    assert_eq!(report.temporary_insertions, 3);
    assert_eq!(report.deletions, 3);
    assert!(report.peak_live_edges <= 3);

    let finals = sink.operations.iter().filter(|op| op.2 > 0.0).count();
    let temporaries = sink.operations.iter().filter(|op| op.2 == 0.0).count();
    let removals = sink.operations.iter().filter(|op| op.2 < 0.0).count();
    assert_eq!((finals, temporaries, removals), (3, 3, 3));

    assert_eq!(replay(&sink.operations), expected);
}

#[test]
fn vertex_expansion_synthesizes_disjoint_identifiers() {
    let graph = path(10);
    let input_ids: Vec<u64> = graph.vertices.clone();
    let config = GeneratorConfigBuilder::new()
        .with_ef_vertices(2.0)
        .with_aging_factor(3.0)
        .with_seed(7)
        .build()
        .expect("configuration is valid");

    let generator = Generator::from_graph(graph, &config).expect("generator builds");
    assert_eq!(generator.num_final_vertices(), 10);
    assert_eq!(generator.num_temporary_vertices(), 10);
    assert_eq!(generator.num_vertices(), 20);
    assert_eq!(generator.final_vertex_ids(), input_ids.as_slice());

    let temporary_ids = generator.temporary_vertex_ids();
    assert_eq!(temporary_ids.len(), 10);
    for id in temporary_ids {
        assert!(!input_ids.contains(id), "temporary id {id} collides");
        assert_ne!(*id, 0);
    }
}

#[rstest]
#[case::seed_one(1)]
#[case::seed_two(2)]
#[case::seed_large(0xDEAD_BEEF)]
fn replay_reproduces_the_input_graph(#[case] seed: u64) {
    let graph = path(10);
    let expected = expected_edges(&graph);
    let config = GeneratorConfigBuilder::new()
        .with_ef_vertices(1.5)
        .with_ef_edges(1.5)
        .with_aging_factor(3.0)
        .with_seed(seed)
        .build()
        .expect("configuration is valid");

    let mut generator = Generator::from_graph(graph, &config).expect("generator builds");
    let target = generator.num_operations();

    let mut sink = RecordingSink::default();
    let report = generator.generate(&mut sink).expect("generation succeeds");

    assert_eq!(report.operations, target);
    assert_eq!(sink.operations.len() as u64, target);
    assert_eq!(report.temporary_insertions, report.deletions);
    assert!(report.peak_live_edges <= 14, "ef_edges bounds the live set");
    assert_eq!(replay(&sink.operations), expected);
}

#[test]
fn odd_churn_targets_are_bumped_to_pair_up() {
    // ceil(2.0 * 3) - 3 is odd, so the target gains one operation.
    let config = GeneratorConfigBuilder::new()
        .with_ef_vertices(1.0)
        .with_aging_factor(2.0)
        .with_seed(3)
        .build()
        .expect("configuration is valid");

    let mut generator = Generator::from_graph(triangle(), &config).expect("generator builds");
    assert_eq!(generator.num_operations(), 7);

    let mut sink = RecordingSink::default();
    let report = generator.generate(&mut sink).expect("generation succeeds");
    assert_eq!(report.operations, 7);
    assert_eq!(replay(&sink.operations), expected_edges(&triangle()));
}

#[test]
fn even_churn_targets_are_kept_exact() {
    let config = GeneratorConfigBuilder::new()
        .with_aging_factor(3.0)
        .build()
        .expect("configuration is valid");
    let generator = Generator::from_graph(path(10), &config).expect("generator builds");
    assert_eq!(generator.num_operations(), 27);
}

#[test]
fn duplicate_input_edges_are_fatal() {
    let graph = InputGraph {
        vertices: vec![1, 2, 3],
        edges: vec![
            InputEdge { source: 1, destination: 2, weight: 1.0 },
            InputEdge { source: 2, destination: 1, weight: 2.0 },
            InputEdge { source: 2, destination: 3, weight: 1.0 },
        ],
    };
    let config = GeneratorConfigBuilder::new()
        .with_ef_vertices(1.0)
        .with_aging_factor(1.0)
        .with_seed(5)
        .build()
        .expect("configuration is valid");

    let mut generator = Generator::from_graph(graph, &config).expect("generator builds");
    let err = generator
        .generate(&mut RecordingSink::default())
        .expect_err("duplicate edges must fail");
    assert_eq!(err.code(), GeneratorErrorCode::DuplicateEdge);
}

#[rstest]
#[case::ef_vertices("ef_vertices", 0.5)]
#[case::ef_edges("ef_edges", 0.0)]
#[case::aging("aging_factor", 0.9)]
#[case::frequency("sf_frequency", -1.0)]
fn out_of_range_factors_are_rejected(#[case] parameter: &str, #[case] value: f64) {
    let builder = GeneratorConfigBuilder::new();
    let builder = match parameter {
        "ef_vertices" => builder.with_ef_vertices(value),
        "ef_edges" => builder.with_ef_edges(value),
        "aging_factor" => builder.with_aging_factor(value),
        "sf_frequency" => builder.with_sf_frequency(value),
        other => panic!("unknown parameter {other}"),
    };
    let err = builder.build().expect_err("factor must be rejected");
    assert!(matches!(
        err,
        GeneratorError::InvalidConfiguration { parameter: got, .. } if got == parameter
    ));
}

#[test]
fn empty_inputs_are_rejected() {
    let config = GeneratorConfigBuilder::new().build().expect("valid");

    let no_vertices = InputGraph::default();
    let err = Generator::from_graph(no_vertices, &config).expect_err("no vertices");
    assert_eq!(err.code(), GeneratorErrorCode::EmptyGraph);

    let no_edges = InputGraph {
        vertices: vec![1],
        edges: Vec::new(),
    };
    let err = Generator::from_graph(no_edges, &config).expect_err("no edges");
    assert_eq!(err.code(), GeneratorErrorCode::EmptyGraph);
}

#[test]
fn unknown_endpoints_are_rejected() {
    let graph = InputGraph {
        vertices: vec![1, 2],
        edges: vec![InputEdge { source: 1, destination: 9, weight: 1.0 }],
    };
    let config = GeneratorConfigBuilder::new().build().expect("valid");
    let err = Generator::from_graph(graph, &config).expect_err("unknown endpoint");
    assert!(matches!(err, GeneratorError::UnknownVertex { vertex: 9 }));
}

#[test]
fn vertex_expansion_beyond_u32_is_rejected() {
    let config = GeneratorConfigBuilder::new()
        .with_ef_vertices(2_000_000_000.0)
        .build()
        .expect("valid");
    let err = Generator::from_graph(triangle(), &config).expect_err("too many vertices");
    assert_eq!(err.code(), GeneratorErrorCode::TooManyVertices);
}

#[test]
fn duplicate_vertex_identifiers_are_rejected() {
    let graph = InputGraph {
        vertices: vec![1, 2, 1],
        edges: vec![InputEdge { source: 1, destination: 2, weight: 1.0 }],
    };
    let config = GeneratorConfigBuilder::new().build().expect("valid");
    let err = Generator::from_graph(graph, &config).expect_err("duplicate vertex");
    assert!(matches!(err, GeneratorError::DuplicateVertex { vertex: 1 }));
}
