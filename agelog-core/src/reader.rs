//! Graphalytics input adapter.
//!
//! Reads the `.properties` descriptor of a Graphalytics dataset plus
//! the plain-text vertex and edge lists it points at. Only undirected
//! graphs are accepted; unweighted graphs get a unit weight on every
//! edge.

use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;

/// Stable codes describing [`ReaderError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ReaderErrorCode {
    /// An input file could not be opened or read.
    Io,
    /// A line did not parse as the expected record.
    Malformed,
    /// A required property was absent from the descriptor.
    MissingProperty,
    /// The descriptor declares a directed graph.
    DirectedGraph,
    /// An edge connects a vertex to itself.
    SelfLoop,
}

impl ReaderErrorCode {
    /// Return the stable machine-readable representation of this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Io => "READER_IO",
            Self::Malformed => "READER_MALFORMED",
            Self::MissingProperty => "READER_MISSING_PROPERTY",
            Self::DirectedGraph => "READER_DIRECTED_GRAPH",
            Self::SelfLoop => "READER_SELF_LOOP",
        }
    }
}

impl fmt::Display for ReaderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised while parsing the input graph.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReaderError {
    /// An input file could not be opened or read.
    #[error("cannot read `{path}`: {source}")]
    Io {
        /// Path that triggered the failure.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// A line did not parse as the expected record.
    #[error("malformed line {line} in `{path}`: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },
    /// A required property was absent from the descriptor.
    #[error("property `{key}` is missing from `{path}`")]
    MissingProperty { key: String, path: PathBuf },
    /// The descriptor declares a directed graph.
    #[error("only undirected graphs are supported; `{path}` is directed")]
    DirectedGraph { path: PathBuf },
    /// An edge connects a vertex to itself.
    #[error("self-loop on vertex {vertex} at line {line} of `{path}`")]
    SelfLoop {
        vertex: u64,
        line: usize,
        path: PathBuf,
    },
}

impl ReaderError {
    /// Retrieve the stable [`ReaderErrorCode`] for this error.
    #[must_use]
    pub const fn code(&self) -> ReaderErrorCode {
        match self {
            Self::Io { .. } => ReaderErrorCode::Io,
            Self::Malformed { .. } => ReaderErrorCode::Malformed,
            Self::MissingProperty { .. } => ReaderErrorCode::MissingProperty,
            Self::DirectedGraph { .. } => ReaderErrorCode::DirectedGraph,
            Self::SelfLoop { .. } => ReaderErrorCode::SelfLoop,
        }
    }
}

/// A weighted edge over external vertex identifiers, as read from the
/// edge list.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputEdge {
    /// External source identifier.
    pub source: u64,
    /// External destination identifier.
    pub destination: u64,
    /// Edge weight; 1.0 for unweighted graphs.
    pub weight: f64,
}

/// The fully loaded input graph.
#[derive(Clone, Debug, Default)]
pub struct InputGraph {
    /// External vertex identifiers in file order.
    pub vertices: Vec<u64>,
    /// Edges in file order, endpoints as external identifiers.
    pub edges: Vec<InputEdge>,
}

/// Parser for a Graphalytics dataset descriptor and its companion
/// vertex/edge lists.
///
/// # Examples
/// ```no_run
/// use agelog_core::GraphalyticsReader;
///
/// let reader = GraphalyticsReader::open("example.properties")?;
/// let graph = reader.read_graph()?;
/// println!("{} vertices", graph.vertices.len());
/// # Ok::<(), agelog_core::ReaderError>(())
/// ```
#[derive(Debug)]
pub struct GraphalyticsReader {
    properties: BTreeMap<String, String>,
    properties_path: PathBuf,
    vertex_path: PathBuf,
    edge_path: PathBuf,
    directed: bool,
    weighted: bool,
}

impl GraphalyticsReader {
    /// Opens and parses a `.properties` descriptor.
    ///
    /// The vertex and edge list paths are taken from the keys ending in
    /// `.vertex-file` and `.edge-file` and resolved relative to the
    /// descriptor's directory. Directedness comes from the key ending
    /// in `.directed`; the graph is treated as weighted when the key
    /// ending in `.edge-properties.names` lists `weight`.
    ///
    /// # Errors
    /// Returns [`ReaderError`] when the descriptor cannot be read, a
    /// line is malformed, or a required key is missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let path = path.as_ref();
        let properties = parse_properties(path)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let vertex_path = resolve_path(base, find_by_suffix(&properties, ".vertex-file", path)?);
        let edge_path = resolve_path(base, find_by_suffix(&properties, ".edge-file", path)?);

        let directed = find_by_suffix(&properties, ".directed", path)?
            .trim()
            .eq_ignore_ascii_case("true");
        let weighted = properties
            .iter()
            .find(|(key, _)| key.ends_with(".edge-properties.names"))
            .is_some_and(|(_, value)| value.split(',').any(|name| name.trim() == "weight"));

        debug!(
            properties = properties.len(),
            vertex_path = %vertex_path.display(),
            edge_path = %edge_path.display(),
            directed,
            weighted,
            "parsed graph descriptor"
        );

        Ok(Self {
            properties,
            properties_path: path.to_path_buf(),
            vertex_path,
            edge_path,
            directed,
            weighted,
        })
    }

    /// Returns the raw property value for `key`, if present.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Returns whether the descriptor declares a directed graph.
    #[must_use]
    pub fn is_directed(&self) -> bool {
        self.directed
    }

    /// Returns whether the edge list carries a weight column.
    #[must_use]
    pub fn is_weighted(&self) -> bool {
        self.weighted
    }

    /// Returns the declared vertex count (`meta.vertices`).
    ///
    /// # Errors
    /// Returns [`ReaderError`] when the property is missing or does not
    /// parse as an integer.
    pub fn declared_vertices(&self) -> Result<u64, ReaderError> {
        self.declared_count("meta.vertices")
    }

    /// Returns the declared edge count (`meta.edges`).
    ///
    /// # Errors
    /// Returns [`ReaderError`] when the property is missing or does not
    /// parse as an integer.
    pub fn declared_edges(&self) -> Result<u64, ReaderError> {
        self.declared_count("meta.edges")
    }

    fn declared_count(&self, suffix: &str) -> Result<u64, ReaderError> {
        let value = find_by_suffix(&self.properties, suffix, &self.properties_path)?;
        value
            .trim()
            .parse()
            .map_err(|_| ReaderError::Malformed {
                path: self.properties_path.clone(),
                line: 0,
                message: format!("`{suffix}` value `{value}` is not an integer"),
            })
    }

    /// Loads the vertex and edge lists into memory.
    ///
    /// # Errors
    /// Returns [`ReaderError::DirectedGraph`] for directed inputs,
    /// [`ReaderError::SelfLoop`] for degenerate edges, and the parse
    /// and I/O errors of the underlying files.
    pub fn read_graph(&self) -> Result<InputGraph, ReaderError> {
        if self.directed {
            return Err(ReaderError::DirectedGraph {
                path: self.properties_path.clone(),
            });
        }

        let vertices = self.read_vertices()?;
        let edges = self.read_edges()?;
        Ok(InputGraph { vertices, edges })
    }

    fn read_vertices(&self) -> Result<Vec<u64>, ReaderError> {
        let mut vertices = Vec::new();
        if let Ok(declared) = self.declared_vertices() {
            vertices.reserve(declared as usize);
        }

        for (line_no, line) in read_lines(&self.vertex_path)?.enumerate() {
            let line = map_io(&self.vertex_path, line)?;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            let vertex = text.parse().map_err(|_| ReaderError::Malformed {
                path: self.vertex_path.clone(),
                line: line_no + 1,
                message: format!("`{text}` is not a vertex identifier"),
            })?;
            vertices.push(vertex);
        }
        Ok(vertices)
    }

    fn read_edges(&self) -> Result<Vec<InputEdge>, ReaderError> {
        let mut edges = Vec::new();
        if let Ok(declared) = self.declared_edges() {
            edges.reserve(declared as usize);
        }

        for (line_no, line) in read_lines(&self.edge_path)?.enumerate() {
            let line = map_io(&self.edge_path, line)?;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            let edge = self.parse_edge_line(text, line_no + 1)?;
            edges.push(edge);
        }
        Ok(edges)
    }

    fn parse_edge_line(&self, text: &str, line: usize) -> Result<InputEdge, ReaderError> {
        let malformed = |message: String| ReaderError::Malformed {
            path: self.edge_path.clone(),
            line,
            message,
        };

        let mut fields = text.split_whitespace();
        let source: u64 = fields
            .next()
            .ok_or_else(|| malformed("missing source field".into()))?
            .parse()
            .map_err(|_| malformed("source is not an identifier".into()))?;
        let destination: u64 = fields
            .next()
            .ok_or_else(|| malformed("missing destination field".into()))?
            .parse()
            .map_err(|_| malformed("destination is not an identifier".into()))?;

        let weight = if self.weighted {
            fields
                .next()
                .ok_or_else(|| malformed("missing weight field".into()))?
                .parse()
                .map_err(|_| malformed("weight is not a number".into()))?
        } else {
            1.0
        };
        if fields.next().is_some() {
            return Err(malformed("trailing fields after the edge record".into()));
        }

        if source == destination {
            return Err(ReaderError::SelfLoop {
                vertex: source,
                line,
                path: self.edge_path.clone(),
            });
        }
        Ok(InputEdge {
            source,
            destination,
            weight,
        })
    }
}

fn parse_properties(path: &Path) -> Result<BTreeMap<String, String>, ReaderError> {
    let mut properties = BTreeMap::new();
    for (line_no, line) in read_lines(path)?.enumerate() {
        let line = map_io(path, line)?;
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        let (key, value) = text.split_once('=').ok_or_else(|| ReaderError::Malformed {
            path: path.to_path_buf(),
            line: line_no + 1,
            message: "expected `key = value`".into(),
        })?;
        properties.insert(key.trim().to_owned(), value.trim().to_owned());
    }
    Ok(properties)
}

fn find_by_suffix<'a>(
    properties: &'a BTreeMap<String, String>,
    suffix: &str,
    path: &Path,
) -> Result<&'a str, ReaderError> {
    properties
        .iter()
        .find(|(key, _)| key.ends_with(suffix))
        .map(|(_, value)| value.as_str())
        .ok_or_else(|| ReaderError::MissingProperty {
            key: format!("*{suffix}"),
            path: path.to_path_buf(),
        })
}

fn resolve_path(base: &Path, value: &str) -> PathBuf {
    let candidate = Path::new(value);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

fn read_lines(path: &Path) -> Result<impl Iterator<Item = io::Result<String>>, ReaderError> {
    let file = File::open(path).map_err(|source| ReaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file).lines())
}

fn map_io(path: &Path, line: io::Result<String>) -> Result<String, ReaderError> {
    line.map_err(|source| ReaderError::Io {
        path: path.to_path_buf(),
        source,
    })
}
