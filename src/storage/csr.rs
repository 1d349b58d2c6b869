//! CSR (Compressed Sparse Row) graph representation
//!
//! Based on `GraphBLAST` (Yang et al., ACM `ToMS` 2022) for GPU-optimized sparse matrix operations.
//!
//! # CSR Format
//!
//! ```text
//! Graph: 0 → 1, 0 → 2, 1 → 2
//!
//! CSR:
//!   row_offsets:    [0, 2, 3, 3]  // Node 0: edges [0..2), Node 1: [2..3), Node 2: [3..3)
//!   column_indices: [1, 2, 2]     // Edge 0 → node 1, edge 1 → node 2, edge 2 → node 2
//!   edge_values:    [1.0, 1.0, 1.0]
//! ```
//!
//! Every array is an [`Array1D`], so a graph can live on the host, on one
//! device, or both. Host-side queries read the host copy and fail if it is
//! stale.

use crate::device::{Array1D, Location};
use crate::error::{Result as StateResult, StateError};
use anyhow::{anyhow, Result};

/// Nodes needed to address ids `0..=max_id`
const fn node_count(max_id: u32) -> usize {
    max_id as usize + 1
}

/// Node identifier (zero-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Immutable CSR graph with location-tagged arrays
///
/// # Example
///
/// ```
/// use trueno_graph_state::{CsrGraph, NodeId};
///
/// let edges = [(NodeId(0), NodeId(1), 1.0), (NodeId(0), NodeId(2), 1.0)];
/// let graph = CsrGraph::from_edge_list(&edges).unwrap();
///
/// let neighbors = graph.outgoing_neighbors(NodeId(0)).unwrap();
/// assert_eq!(neighbors.len(), 2);
/// ```
#[derive(Debug)]
pub struct CsrGraph {
    nodes: usize,
    edges: usize,
    directed: bool,

    /// Row offsets, length `nodes + 1`
    pub row_offsets: Array1D<u32>,

    /// Edge targets, length `edges`
    pub column_indices: Array1D<u32>,

    /// Per-edge values aligned with `column_indices`
    pub edge_values: Array1D<f32>,

    /// Per-vertex values, length `nodes`
    pub node_values: Array1D<f32>,
}

impl CsrGraph {
    /// Create new empty (directed, host-resident) graph
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: 0,
            edges: 0,
            directed: true,
            row_offsets: Array1D::from_vec("row_offsets", vec![0]),
            column_indices: Array1D::from_vec("column_indices", Vec::new()),
            edge_values: Array1D::from_vec("edge_values", Vec::new()),
            node_values: Array1D::from_vec("node_values", Vec::new()),
        }
    }

    /// Create directed graph from edge list
    ///
    /// Node count is `max id + 1`.
    ///
    /// # Errors
    ///
    /// Returns error if the edge list cannot be laid out
    pub fn from_edge_list(edges: &[(NodeId, NodeId, f32)]) -> Result<Self> {
        if edges.is_empty() {
            return Ok(Self::new());
        }

        let max_node = edges
            .iter()
            .flat_map(|(src, dst, _)| [src.0, dst.0])
            .max()
            .ok_or_else(|| anyhow!("Empty edge list"))?;

        Self::from_edge_list_with_nodes(node_count(max_node), edges, true)
    }

    /// Create graph with an explicit node count
    ///
    /// Undirected graphs store both directions of every non-loop edge.
    ///
    /// # Errors
    ///
    /// Returns error if an endpoint is `>= num_nodes`
    pub fn from_edge_list_with_nodes(
        num_nodes: usize,
        edges: &[(NodeId, NodeId, f32)],
        directed: bool,
    ) -> Result<Self> {
        // Build adjacency lists (temporary)
        let mut adj_list: Vec<Vec<(u32, f32)>> = vec![Vec::new(); num_nodes];

        for (src, dst, value) in edges {
            for id in [src.0, dst.0] {
                if id as usize >= num_nodes {
                    return Err(anyhow!("Node ID {id} out of bounds ({num_nodes} nodes)"));
                }
            }
            adj_list[src.0 as usize].push((dst.0, *value));
            if !directed && src != dst {
                adj_list[dst.0 as usize].push((src.0, *value));
            }
        }

        let mut row_offsets = Vec::with_capacity(num_nodes + 1);
        let mut column_indices = Vec::new();
        let mut edge_values = Vec::new();

        let mut offset = 0_u32;
        row_offsets.push(offset);

        for neighbors in &adj_list {
            #[allow(clippy::cast_possible_truncation)] // Graphs >4B edges not supported yet
            let len_u32 = neighbors.len() as u32;
            offset += len_u32;
            row_offsets.push(offset);

            for (target, value) in neighbors {
                column_indices.push(*target);
                edge_values.push(*value);
            }
        }

        Ok(Self::from_parts(
            row_offsets,
            column_indices,
            edge_values,
            vec![0.0; num_nodes],
            directed,
        )?)
    }

    /// Assemble a host-resident graph from raw CSR arrays
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the arrays violate the CSR invariants
    pub fn from_parts(
        row_offsets: Vec<u32>,
        column_indices: Vec<u32>,
        edge_values: Vec<f32>,
        node_values: Vec<f32>,
        directed: bool,
    ) -> StateResult<Self> {
        let graph = Self {
            nodes: row_offsets.len().saturating_sub(1),
            edges: column_indices.len(),
            directed,
            row_offsets: Array1D::from_vec("row_offsets", row_offsets),
            column_indices: Array1D::from_vec("column_indices", column_indices),
            edge_values: Array1D::from_vec("edge_values", edge_values),
            node_values: Array1D::from_vec("node_values", node_values),
        };
        graph.validate(Location::HOST)?;
        Ok(graph)
    }

    /// Get number of nodes
    #[must_use]
    pub const fn num_nodes(&self) -> usize {
        self.nodes
    }

    /// Get number of edges
    #[must_use]
    pub const fn num_edges(&self) -> usize {
        self.edges
    }

    /// Whether edges are one-way
    #[must_use]
    pub const fn is_directed(&self) -> bool {
        self.directed
    }

    /// Set directedness (no symmetrization is performed)
    pub fn set_directed(&mut self, directed: bool) {
        self.directed = directed;
    }

    pub(crate) fn set_counts(&mut self, nodes: usize, edges: usize) {
        self.nodes = nodes;
        self.edges = edges;
    }

    /// Get outgoing neighbors of a node (host copy)
    ///
    /// # Errors
    ///
    /// Returns error if node ID is out of bounds or the host copy is stale
    pub fn outgoing_neighbors(&self, node: NodeId) -> Result<&[u32]> {
        let (start, end) = self.edge_range(node)?;
        Ok(&self.column_indices.host_slice()?[start..end])
    }

    /// Get values of a node's outgoing edges (host copy)
    ///
    /// # Errors
    ///
    /// Returns error if node ID is out of bounds or the host copy is stale
    pub fn outgoing_values(&self, node: NodeId) -> Result<&[f32]> {
        let (start, end) = self.edge_range(node)?;
        Ok(&self.edge_values.host_slice()?[start..end])
    }

    fn edge_range(&self, node: NodeId) -> Result<(usize, usize)> {
        if (node.0 as usize) >= self.nodes {
            return Err(anyhow!("Node ID {} out of bounds", node.0));
        }
        let offsets = self.row_offsets.host_slice()?;
        let idx = node.0 as usize;
        Ok((offsets[idx] as usize, offsets[idx + 1] as usize))
    }

    /// All `(source, destination, value)` triples read from `side`
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `side` holds no valid copy
    pub fn edge_triples(&self, side: Location) -> StateResult<Vec<(u32, u32, f32)>> {
        let offsets = self.row_offsets.valid_slice(side)?;
        let columns = self.column_indices.valid_slice(side)?;
        let values = self.edge_values.valid_slice(side)?;

        let mut triples = Vec::with_capacity(self.edges);
        for (src, window) in offsets.windows(2).enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let src = src as u32;
            for e in window[0] as usize..window[1] as usize {
                triples.push((src, columns[e], values[e]));
            }
        }
        Ok(triples)
    }

    /// Get host CSR components
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the host copy is stale
    pub fn csr_components(&self) -> StateResult<(&[u32], &[u32], &[f32])> {
        Ok((
            self.row_offsets.host_slice()?,
            self.column_indices.host_slice()?,
            self.edge_values.host_slice()?,
        ))
    }

    /// Check the CSR invariants on the copy at `side`
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` describing the first violation
    pub fn validate(&self, side: Location) -> StateResult<()> {
        let offsets = self.row_offsets.valid_slice(side)?;
        let columns = self.column_indices.valid_slice(side)?;
        let edge_values = self.edge_values.valid_slice(side)?;
        let node_values = self.node_values.valid_slice(side)?;
        let invalid = |msg: String| Err(StateError::InvalidArgument(msg));

        if offsets.len() != self.nodes + 1 {
            return invalid(format!(
                "row_offsets has {} entries for {} nodes",
                offsets.len(),
                self.nodes
            ));
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return invalid("row_offsets is not non-decreasing".to_string());
        }
        if offsets.last().copied().unwrap_or(0) as usize != self.edges {
            return invalid(format!("row_offsets does not end at {} edges", self.edges));
        }
        if edge_values.len() != columns.len() || node_values.len() != self.nodes {
            return invalid("value arrays misaligned".to_string());
        }
        if let Some(bad) = columns.iter().find(|&&c| c as usize >= self.nodes) {
            return invalid(format!("column index {bad} >= {} nodes", self.nodes));
        }
        Ok(())
    }

    /// Residencies where every array holds storage
    #[must_use]
    pub fn allocated(&self) -> Location {
        self.row_offsets.allocated()
            & self.column_indices.allocated()
            & self.edge_values.allocated()
            & self.node_values.allocated()
    }

    /// Residencies where any array still holds storage
    #[must_use]
    pub fn held(&self) -> Location {
        self.row_offsets.allocated()
            | self.column_indices.allocated()
            | self.edge_values.allocated()
            | self.node_values.allocated()
    }

    /// Ordinal of the device holding the adjacency
    #[must_use]
    pub fn device_ordinal(&self) -> Option<usize> {
        self.column_indices.device_ordinal()
    }

    /// Allocate storage for `nodes`/`edges` at `location`
    ///
    /// # Errors
    ///
    /// Returns allocation errors
    pub fn allocate(&mut self, nodes: usize, edges: usize, location: Location) -> StateResult<()> {
        self.row_offsets.allocate(nodes + 1, location)?;
        self.column_indices.allocate(edges, location)?;
        self.edge_values.allocate(edges, location)?;
        self.node_values.allocate(nodes, location)?;
        self.set_counts(nodes, edges);
        Ok(())
    }

    /// Grow storage at `location` for `nodes`/`edges`
    ///
    /// # Errors
    ///
    /// Returns allocation errors
    pub fn ensure_size(&mut self, nodes: usize, edges: usize, location: Location) -> StateResult<()> {
        self.row_offsets.ensure_size(nodes + 1, location)?;
        self.column_indices.ensure_size(edges, location)?;
        self.edge_values.ensure_size(edges, location)?;
        self.node_values.ensure_size(nodes, location)?;
        self.set_counts(nodes, edges);
        Ok(())
    }

    /// Move every array from `src` to `dst`
    ///
    /// # Errors
    ///
    /// Returns transfer errors
    pub fn move_to(&mut self, src: Location, dst: Location) -> StateResult<()> {
        self.row_offsets.move_to(src, dst)?;
        self.column_indices.move_to(src, dst)?;
        self.edge_values.move_to(src, dst)?;
        self.node_values.move_to(src, dst)?;
        Ok(())
    }

    /// Free every array at `location`
    ///
    /// # Errors
    ///
    /// Returns `DeviceContext` if device storage is freed under the wrong device
    pub fn release(&mut self, location: Location) -> StateResult<()> {
        self.row_offsets.release(location)?;
        self.column_indices.release(location)?;
        self.edge_values.release(location)?;
        self.node_values.release(location)?;
        Ok(())
    }

    /// Deep copy of the host arrays into a new host-only graph
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the host copy is stale
    pub fn host_copy(&self) -> StateResult<Self> {
        let mut copy = Self::from_parts(
            self.row_offsets.host_slice()?.to_vec(),
            self.column_indices.host_slice()?.to_vec(),
            self.edge_values.host_slice()?.to_vec(),
            self.node_values.host_slice()?.to_vec(),
            self.directed,
        )?;
        copy.set_counts(self.nodes, self.edges);
        Ok(copy)
    }
}

impl Default for CsrGraph {
    fn default() -> Self {
        Self::new()
    }
}
