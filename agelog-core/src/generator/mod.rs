//! The update-log generator.
//!
//! Drives the randomized mix of final-edge insertions, temporary-edge
//! insertions, and temporary-edge removals that ages the input graph
//! into itself. The decision rule keeps three quantities in balance:
//! the operations emitted so far, the final edges still to insert, and
//! the temporary edges still alive — their sum can never exceed the
//! operation target, so the run always terminates with every final
//! edge inserted and every temporary edge removed.

mod init;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::{
    counting_tree::CountingTree,
    edge::Edge,
    error::GeneratorError,
    reader::InputGraph,
    sink::{OperationSink, REMOVAL_WEIGHT, TEMPORARY_WEIGHT},
    temp_edges::TemporaryEdges,
};

use init::{initialize, SegmentedEdgeList};

/// Validated generation parameters.
///
/// Produced by [`GeneratorConfigBuilder`].
#[derive(Clone, Copy, Debug)]
pub struct GeneratorConfig {
    sf_frequency: f64,
    ef_vertices: f64,
    ef_edges: f64,
    aging_factor: f64,
    seed: u64,
}

impl GeneratorConfig {
    /// Returns the frequency scaling factor.
    #[must_use]
    pub fn sf_frequency(&self) -> f64 {
        self.sf_frequency
    }

    /// Returns the vertex expansion factor.
    #[must_use]
    pub fn ef_vertices(&self) -> f64 {
        self.ef_vertices
    }

    /// Returns the edge expansion factor.
    #[must_use]
    pub fn ef_edges(&self) -> f64 {
        self.ef_edges
    }

    /// Returns the aging coefficient.
    #[must_use]
    pub fn aging_factor(&self) -> f64 {
        self.aging_factor
    }

    /// Returns the PRNG seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// Configures and validates [`GeneratorConfig`] instances.
///
/// # Examples
/// ```
/// use agelog_core::GeneratorConfigBuilder;
///
/// let config = GeneratorConfigBuilder::new()
///     .with_aging_factor(3.0)
///     .with_seed(42)
///     .build()
///     .expect("configuration is valid");
/// assert_eq!(config.aging_factor(), 3.0);
/// assert_eq!(config.seed(), 42);
/// ```
#[derive(Clone, Debug)]
pub struct GeneratorConfigBuilder {
    sf_frequency: f64,
    ef_vertices: f64,
    ef_edges: f64,
    aging_factor: f64,
    seed: u64,
}

impl Default for GeneratorConfigBuilder {
    fn default() -> Self {
        Self {
            sf_frequency: 1.0,
            ef_vertices: 1.2,
            ef_edges: 1.0,
            aging_factor: 10.0,
            seed: 0,
        }
    }
}

impl GeneratorConfigBuilder {
    /// Creates a builder populated with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the frequency scaling factor (must be positive).
    #[must_use]
    pub fn with_sf_frequency(mut self, sf: f64) -> Self {
        self.sf_frequency = sf;
        self
    }

    /// Overrides the vertex expansion factor (must be ≥ 1).
    #[must_use]
    pub fn with_ef_vertices(mut self, ef: f64) -> Self {
        self.ef_vertices = ef;
        self
    }

    /// Overrides the edge expansion factor (must be ≥ 1).
    #[must_use]
    pub fn with_ef_edges(mut self, ef: f64) -> Self {
        self.ef_edges = ef;
        self
    }

    /// Overrides the aging coefficient (must be ≥ 1).
    #[must_use]
    pub fn with_aging_factor(mut self, aging: f64) -> Self {
        self.aging_factor = aging;
        self
    }

    /// Overrides the PRNG seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validates the parameters and constructs the configuration.
    ///
    /// # Errors
    /// Returns [`GeneratorError::InvalidConfiguration`] when a factor
    /// is below its minimum.
    pub fn build(self) -> Result<GeneratorConfig, GeneratorError> {
        let at_least = |parameter: &'static str, value: f64, minimum: f64| {
            if value.is_finite() && value >= minimum {
                Ok(())
            } else {
                Err(GeneratorError::InvalidConfiguration {
                    parameter,
                    minimum,
                    value,
                })
            }
        };
        at_least("sf_frequency", self.sf_frequency, f64::MIN_POSITIVE)?;
        at_least("ef_vertices", self.ef_vertices, 1.0)?;
        at_least("ef_edges", self.ef_edges, 1.0)?;
        at_least("aging_factor", self.aging_factor, 1.0)?;
        Ok(GeneratorConfig {
            sf_frequency: self.sf_frequency,
            ef_vertices: self.ef_vertices,
            ef_edges: self.ef_edges,
            aging_factor: self.aging_factor,
            seed: self.seed,
        })
    }
}

/// Summary of one completed generation run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GenerationReport {
    /// Operations emitted, equal to the configured target.
    pub operations: u64,
    /// Final-edge insertions (the input edge count).
    pub final_edges: u64,
    /// Temporary-edge insertions.
    pub temporary_insertions: u64,
    /// Deletions, counting both random removals and the deletions that
    /// precede a final insert of a live temporary edge.
    pub deletions: u64,
    /// Largest number of edges live at any point in the stream.
    pub peak_live_edges: u64,
}

/// Generates the aging operation stream for one input graph.
///
/// # Examples
/// ```
/// use agelog_core::{
///     Generator, GeneratorConfigBuilder, OperationSink,
///     reader::{InputEdge, InputGraph}, writer::WriterError,
/// };
///
/// #[derive(Default)]
/// struct Count(u64);
/// impl OperationSink for Count {
///     fn emit(&mut self, _: u64, _: u64, _: f64) -> Result<(), WriterError> {
///         self.0 += 1;
///         Ok(())
///     }
/// }
///
/// let graph = InputGraph {
///     vertices: vec![1, 2, 3],
///     edges: vec![
///         InputEdge { source: 1, destination: 2, weight: 1.0 },
///         InputEdge { source: 2, destination: 3, weight: 1.0 },
///         InputEdge { source: 1, destination: 3, weight: 1.0 },
///     ],
/// };
/// let config = GeneratorConfigBuilder::new()
///     .with_ef_vertices(1.0)
///     .with_aging_factor(1.0)
///     .with_seed(42)
///     .build()?;
/// let mut generator = Generator::from_graph(graph, &config)?;
/// let mut sink = Count::default();
/// let report = generator.generate(&mut sink)?;
/// assert_eq!(report.operations, 3);
/// assert_eq!(sink.0, 3);
/// # Ok::<(), agelog_core::GeneratorError>(())
/// ```
#[derive(Debug)]
pub struct Generator {
    vertices: Vec<u64>,
    num_final_vertices: u64,
    num_temporary_vertices: u64,
    final_edges: SegmentedEdgeList,
    num_final_edges: u64,
    frequencies: CountingTree,
    num_operations: u64,
    max_live_edges: u64,
    rng: SmallRng,
}

impl Generator {
    /// Builds the generation state from a loaded graph.
    ///
    /// # Errors
    /// Returns [`GeneratorError`] for empty graphs, vertex counts
    /// beyond 32 bits, duplicate vertices, or edges over unknown
    /// endpoints.
    pub fn from_graph(
        graph: InputGraph,
        config: &GeneratorConfig,
    ) -> Result<Self, GeneratorError> {
        let state = initialize(
            graph,
            config.sf_frequency,
            config.ef_vertices,
            config.seed,
        )?;

        let num_final_edges = state.num_final_edges;
        let max_live_edges = (config.ef_edges * num_final_edges as f64).ceil() as u64;
        let mut num_operations = (config.aging_factor * num_final_edges as f64).ceil() as u64;
        // Every temporary insertion pairs with exactly one deletion, so
        // the target must have the parity of the final-edge count.
        if (num_operations - num_final_edges) % 2 == 1 {
            num_operations += 1;
            warn!(
                operations = num_operations,
                "operation target bumped by one to make the temporary churn pair up"
            );
        }

        Ok(Self {
            vertices: state.vertices,
            num_final_vertices: state.num_final_vertices,
            num_temporary_vertices: state.num_temporary_vertices,
            final_edges: state.final_edges,
            num_final_edges,
            frequencies: state.frequencies,
            num_operations,
            max_live_edges,
            rng: SmallRng::seed_from_u64(config.seed),
        })
    }

    /// Total vertices, final plus temporary.
    #[must_use]
    pub fn num_vertices(&self) -> u64 {
        self.num_final_vertices + self.num_temporary_vertices
    }

    /// Vertices that belong to the final graph.
    #[must_use]
    pub fn num_final_vertices(&self) -> u64 {
        self.num_final_vertices
    }

    /// Synthesized vertices that only carry temporary edges.
    #[must_use]
    pub fn num_temporary_vertices(&self) -> u64 {
        self.num_temporary_vertices
    }

    /// Edges in the final graph.
    #[must_use]
    pub fn num_edges(&self) -> u64 {
        self.num_final_edges
    }

    /// Operations the run will emit.
    #[must_use]
    pub fn num_operations(&self) -> u64 {
        self.num_operations
    }

    /// External identifiers of the final vertices.
    #[must_use]
    pub fn final_vertex_ids(&self) -> &[u64] {
        &self.vertices[..self.num_final_vertices as usize]
    }

    /// External identifiers of the temporary vertices.
    #[must_use]
    pub fn temporary_vertex_ids(&self) -> &[u64] {
        &self.vertices[self.num_final_vertices as usize..]
    }

    /// Runs the state machine to completion, emitting every operation
    /// into `sink`.
    ///
    /// # Errors
    /// Returns [`GeneratorError`] when the input graph turns out to
    /// hold duplicate edges, when sampling exhausts the frequency
    /// distribution, or when the sink fails.
    pub fn generate<S: OperationSink>(
        &mut self,
        sink: &mut S,
    ) -> Result<GenerationReport, GeneratorError> {
        let target = self.num_operations;
        info!(
            operations = target,
            final_edges = self.num_final_edges,
            max_live_edges = self.max_live_edges,
            "generating operations"
        );

        let mut temporary = TemporaryEdges::new();
        let mut stored: FxHashMap<Edge, u64> = FxHashMap::default();
        stored.reserve(self.max_live_edges as usize);

        let mut ops: u64 = 0;
        let mut temporary_insertions: u64 = 0;
        let mut deletions: u64 = 0;
        let mut peak_live_edges: u64 = 0;
        let mut last_percent: u64 = 0;

        while ops < target {
            let remaining_final = self.final_edges.remaining();
            let live_temporary = temporary.len() as u64;
            let live_edges = stored.len() as u64;
            // Operations already emitted plus the ones this state still
            // owes: one insert per remaining final edge, one removal per
            // live temporary edge. Never exceeds the target.
            let committed = ops + remaining_final + live_temporary;
            debug_assert!(committed <= target);

            let insertion = temporary.is_empty()
                || (live_edges < self.max_live_edges
                    && remaining_final > 0
                    && committed <= target);

            if insertion {
                let forced = committed == target;
                let pacing = (self.final_edges.cursor() as u128) * (target as u128)
                    < (ops as u128) * (self.num_final_edges as u128);
                // Inserting the last final edge while operations are
                // still owed would leave no way to grow the graph again
                // when ef_edges grants no headroom over the final size.
                let strands_slack = remaining_final == 1
                    && committed < target
                    && self.max_live_edges == self.num_final_edges;

                if remaining_final > 0 && (forced || (pacing && !strands_slack)) {
                    let emitted =
                        self.insert_final(&mut temporary, &mut stored, sink)?;
                    if emitted == 2 {
                        deletions += 1;
                    }
                    ops += emitted;
                } else {
                    self.insert_temporary(&mut temporary, &mut stored, sink)?;
                    temporary_insertions += 1;
                    ops += 1;
                }
            } else {
                self.remove_temporary(&mut temporary, &mut stored, sink)?;
                deletions += 1;
                ops += 1;
            }

            peak_live_edges = peak_live_edges.max(stored.len() as u64);

            let percent = ops * 100 / target;
            if percent > last_percent {
                last_percent = percent;
                info!(
                    operations = ops,
                    target,
                    percent,
                    final_cursor = self.final_edges.cursor(),
                    live_temporary = temporary.len(),
                    live_edges = stored.len(),
                    "generation progress"
                );
            }
        }

        debug_assert!(temporary.is_empty(), "temporary edges must all be removed");
        debug_assert_eq!(self.final_edges.remaining(), 0);
        debug_assert_eq!(stored.len() as u64, self.num_final_edges);
        debug_assert_eq!(ops, target);

        Ok(GenerationReport {
            operations: ops,
            final_edges: self.num_final_edges,
            temporary_insertions,
            deletions,
            peak_live_edges,
        })
    }

    /// Inserts the next permuted final edge. When the edge is live as a
    /// temporary, its deletion is emitted first; returns the number of
    /// operations emitted (1 or 2).
    fn insert_final<S: OperationSink>(
        &mut self,
        temporary: &mut TemporaryEdges,
        stored: &mut FxHashMap<Edge, u64>,
        sink: &mut S,
    ) -> Result<u64, GeneratorError> {
        let weighted = self
            .final_edges
            .next()
            .expect("the decision rule only inserts finals while some remain");
        let edge = weighted.edge();
        let source = self.vertices[edge.source() as usize];
        let destination = self.vertices[edge.destination() as usize];

        let mut emitted = 0;
        if let Some(&key) = stored.get(&edge) {
            if key == 0 {
                return Err(GeneratorError::DuplicateEdge {
                    source_vertex: source,
                    destination,
                });
            }
            let removed = temporary
                .remove(key)
                .expect("every non-zero stored key is live in the temporary map");
            debug_assert_eq!(removed, edge);
            sink.emit(source, destination, REMOVAL_WEIGHT)?;
            emitted += 1;
        }

        sink.emit(source, destination, weighted.weight())?;
        stored.insert(edge, 0);
        emitted += 1;
        Ok(emitted)
    }

    /// Samples a fresh temporary edge by two weighted searches,
    /// masking the source's frequency for the second draw so the edge
    /// cannot be a self-loop, and rejecting already-live edges.
    fn insert_temporary<S: OperationSink>(
        &mut self,
        temporary: &mut TemporaryEdges,
        stored: &mut FxHashMap<Edge, u64>,
        sink: &mut S,
    ) -> Result<(), GeneratorError> {
        let edge = loop {
            let mass = self.frequencies.total_count();
            if mass <= 0 {
                return Err(GeneratorError::FrequencyExhausted);
            }
            let source = self.frequencies.search(self.rng.gen_range(0..mass))?;
            let source_frequency = self.frequencies.unset(source)?;

            let rest = self.frequencies.total_count();
            if rest <= 0 {
                self.frequencies.set(source, source_frequency)?;
                return Err(GeneratorError::FrequencyExhausted);
            }
            let destination = self.frequencies.search(self.rng.gen_range(0..rest))?;
            self.frequencies.set(source, source_frequency)?;
            debug_assert_ne!(source, destination);

            let edge = Edge::new(source as u32, destination as u32);
            if !stored.contains_key(&edge) {
                break edge;
            }
        };

        let key = loop {
            let key = self.rng.gen_range(1..=u64::MAX);
            if temporary.try_insert(key, edge) {
                break key;
            }
        };
        stored.insert(edge, key);
        sink.emit(
            self.vertices[edge.source() as usize],
            self.vertices[edge.destination() as usize],
            TEMPORARY_WEIGHT,
        )?;
        Ok(())
    }

    /// Removes the temporary edge at or after a uniformly drawn key.
    fn remove_temporary<S: OperationSink>(
        &mut self,
        temporary: &mut TemporaryEdges,
        stored: &mut FxHashMap<Edge, u64>,
        sink: &mut S,
    ) -> Result<(), GeneratorError> {
        let probe = self.rng.gen_range(1..=u64::MAX);
        let (key, edge) = temporary
            .successor(probe)
            .expect("the removal branch requires live temporary edges");
        let removed = temporary.remove(key);
        debug_assert_eq!(removed, Some(edge));
        debug_assert_eq!(stored.get(&edge), Some(&key));
        stored.remove(&edge);

        sink.emit(
            self.vertices[edge.source() as usize],
            self.vertices[edge.destination() as usize],
            REMOVAL_WEIGHT,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
