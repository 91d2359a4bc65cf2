//! Generator initialization: internal indexing, frequency seeding,
//! temporary-vertex synthesis, and the permuted final-edge segments.

use rand::{rngs::SmallRng, seq::SliceRandom, SeedableRng};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{
    counting_tree::CountingTree,
    edge::WeightedEdge,
    error::GeneratorError,
    reader::InputGraph,
};

/// Final edges per segment (8 Mi); spent segments are dropped as the
/// cursor passes them.
pub(super) const EDGES_PER_SEGMENT: usize = 1 << 23;

/// Additive offset applied to the run seed for the edge permutation,
/// keeping the permutation independent of the operation mix.
const PERMUTATION_SEED_OFFSET: u64 = 57;

/// Vertex-frequency record used while seeding the counting tree.
#[derive(Clone, Copy, Debug, Default)]
struct FrequencyRecord {
    vertex: u32,
    frequency: u32,
}

/// The permuted final-edge list, segmented so spent blocks free their
/// memory before the run completes.
#[derive(Debug)]
pub(super) struct SegmentedEdgeList {
    segments: Vec<Option<Box<[WeightedEdge]>>>,
    segment_capacity: usize,
    total: u64,
    cursor: u64,
}

impl SegmentedEdgeList {
    pub(super) fn new(edges: Vec<WeightedEdge>, segment_capacity: usize) -> Self {
        let total = edges.len() as u64;
        let mut segments = Vec::with_capacity(edges.len().div_ceil(segment_capacity).max(1));
        let mut rest = edges;
        while rest.len() > segment_capacity {
            let tail = rest.split_off(segment_capacity);
            segments.push(Some(rest.into_boxed_slice()));
            rest = tail;
        }
        segments.push(Some(rest.into_boxed_slice()));
        Self {
            segments,
            segment_capacity,
            total,
            cursor: 0,
        }
    }

    /// Returns the next permuted final edge, dropping each segment once
    /// its last edge has been handed out.
    pub(super) fn next(&mut self) -> Option<WeightedEdge> {
        if self.cursor >= self.total {
            return None;
        }
        let segment_index = (self.cursor as usize) / self.segment_capacity;
        let offset = (self.cursor as usize) % self.segment_capacity;
        let segment = self.segments[segment_index]
            .as_ref()
            .expect("segments ahead of the cursor are still allocated");
        let edge = segment[offset];
        self.cursor += 1;

        if offset + 1 == segment.len() {
            self.segments[segment_index] = None;
        }
        Some(edge)
    }

    /// Final edges not yet handed out.
    pub(super) fn remaining(&self) -> u64 {
        self.total - self.cursor
    }

    /// Final edges handed out so far.
    pub(super) fn cursor(&self) -> u64 {
        self.cursor
    }
}

pub(super) struct InitializedState {
    pub(super) vertices: Vec<u64>,
    pub(super) num_final_vertices: u64,
    pub(super) num_temporary_vertices: u64,
    pub(super) final_edges: SegmentedEdgeList,
    pub(super) num_final_edges: u64,
    pub(super) frequencies: CountingTree,
}

/// Builds the internal vertex index, degree-derived frequencies,
/// interpolated temporary vertices, the seeded counting tree, and the
/// permuted final-edge segments.
pub(super) fn initialize(
    graph: InputGraph,
    sf_frequency: f64,
    ef_vertices: f64,
    seed: u64,
) -> Result<InitializedState, GeneratorError> {
    let InputGraph {
        vertices: external_vertices,
        edges: input_edges,
    } = graph;

    if external_vertices.is_empty() {
        return Err(GeneratorError::EmptyGraph { missing: "vertices" });
    }
    if input_edges.is_empty() {
        return Err(GeneratorError::EmptyGraph { missing: "edges" });
    }

    let num_final = external_vertices.len() as u64;
    let num_temporary = ((ef_vertices - 1.0) * num_final as f64).ceil() as u64;
    let num_total = num_final + num_temporary;
    if num_total > u64::from(u32::MAX) {
        return Err(GeneratorError::TooManyVertices { count: num_total });
    }

    // External identifier -> internal index, in vertex-file order.
    let mut index: FxHashMap<u64, u32> = FxHashMap::default();
    index.reserve(external_vertices.len());
    for (offset, &vertex) in external_vertices.iter().enumerate() {
        if index.insert(vertex, offset as u32).is_some() {
            return Err(GeneratorError::DuplicateVertex { vertex });
        }
    }

    let mut degrees = vec![0_u32; external_vertices.len()];
    let mut final_edges = Vec::with_capacity(input_edges.len());
    for edge in &input_edges {
        let source = *index
            .get(&edge.source)
            .ok_or(GeneratorError::UnknownVertex { vertex: edge.source })?;
        let destination = *index
            .get(&edge.destination)
            .ok_or(GeneratorError::UnknownVertex {
                vertex: edge.destination,
            })?;
        degrees[source as usize] += 1;
        degrees[destination as usize] += 1;
        final_edges.push(WeightedEdge::new(source, destination, edge.weight));
    }
    let num_final_edges = final_edges.len() as u64;

    let mut vertices = external_vertices;
    vertices.resize(num_total as usize, 0);

    let mut records: Vec<FrequencyRecord> = degrees
        .iter()
        .enumerate()
        .map(|(offset, &degree)| FrequencyRecord {
            vertex: offset as u32,
            frequency: (f64::from(degree) * sf_frequency) as u32,
        })
        .collect();
    records.resize(num_total as usize, FrequencyRecord::default());

    if num_temporary > 0 {
        synthesize_temporary_vertices(
            &mut records,
            &mut vertices,
            &index,
            num_final,
            num_temporary,
        );
    }

    let mut frequencies = CountingTree::new(num_total)?;
    for record in &records {
        frequencies.set(u64::from(record.vertex), i64::from(record.frequency))?;
    }

    debug!(
        final_vertices = num_final,
        temporary_vertices = num_temporary,
        edges = num_final_edges,
        frequency_mass = frequencies.total_count(),
        "generator state initialized"
    );

    let mut permutation_rng = SmallRng::seed_from_u64(seed.wrapping_add(PERMUTATION_SEED_OFFSET));
    final_edges.shuffle(&mut permutation_rng);

    Ok(InitializedState {
        vertices,
        num_final_vertices: num_final,
        num_temporary_vertices: num_temporary,
        final_edges: SegmentedEdgeList::new(final_edges, EDGES_PER_SEGMENT),
        num_final_edges,
        frequencies,
    })
}

/// Spreads the final vertices across the expanded rank array and fills
/// the gaps with temporary vertices whose frequency interpolates the
/// neighbouring ranks, so the synthesized vertices land uniformly along
/// the degree ranking.
fn synthesize_temporary_vertices(
    records: &mut [FrequencyRecord],
    vertices: &mut [u64],
    taken: &FxHashMap<u64, u32>,
    num_final: u64,
    num_temporary: u64,
) {
    let num_total = num_final + num_temporary;
    records[..num_final as usize].sort_unstable_by(|a, b| b.frequency.cmp(&a.frequency));

    let mut next_external: u64 = 1;
    let mut next_internal = num_final as u32;
    let mut tail = (num_total - 1) as usize;
    let mut head = (num_final - 1) as i64;
    let mut free_slots = num_temporary;

    while free_slots > 0 && tail > 0 {
        debug_assert!(head >= 0);
        if free_slots * num_total >= num_temporary * tail as u64 {
            let mut frequency = records[head as usize].frequency;
            if tail < (num_total - 1) as usize {
                frequency = (frequency + records[tail + 1].frequency) / 2;
            }
            records[tail] = FrequencyRecord {
                vertex: next_internal,
                frequency,
            };
            free_slots -= 1;

            while taken.contains_key(&next_external) {
                next_external += 1;
            }
            vertices[next_internal as usize] = next_external;
            next_internal += 1;
            next_external += 1;
        } else {
            records[tail] = records[head as usize];
            head -= 1;
        }
        tail -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;

    #[test]
    fn segments_free_as_the_cursor_passes() {
        let edges: Vec<WeightedEdge> =
            (0..5).map(|i| WeightedEdge::new(i, i + 1, 1.0)).collect();
        let mut list = SegmentedEdgeList::new(edges, 2);
        assert_eq!(list.remaining(), 5);

        assert_eq!(list.next().expect("edge 0").edge(), Edge::new(0, 1));
        assert!(list.segments[0].is_some());
        assert_eq!(list.next().expect("edge 1").edge(), Edge::new(1, 2));
        assert!(list.segments[0].is_none(), "spent segment must be dropped");

        assert_eq!(list.next().expect("edge 2").edge(), Edge::new(2, 3));
        assert_eq!(list.next().expect("edge 3").edge(), Edge::new(3, 4));
        assert_eq!(list.next().expect("edge 4").edge(), Edge::new(4, 5));
        assert_eq!(list.remaining(), 0);
        assert_eq!(list.next(), None);
        assert_eq!(list.cursor(), 5);
    }
}
