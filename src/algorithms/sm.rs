//! Subgraph matching of small query graphs
//!
//! Counts, for every vertex, the embeddings of a fixed query rooted at that
//! vertex. The per-vertex counts are the slice's result array, so this
//! module exercises the whole problem lifecycle (init, reset, run, extract).
//!
//! # Queries
//!
//! - [`Query::Wedge`]: two distinct out-neighbours (`a ← v → b`). Only reads
//!   the root's own adjacency, so it runs on renumbered partitions.
//! - [`Query::Triangle`]: a wedge closed by `a → b`. Reads neighbours'
//!   adjacency, so each slice needs the full graph (duplicate partitioning);
//!   [`run`] rejects it on renumbered partitions.
//!
//! # References
//! - Kim et al. (2023): "Efficient Subgraph Matching on Large Graphs"
//! - Wang et al. (2017): Gunrock subgraph matching primitive

use crate::device::{Array1D, Location, Stream};
use crate::dynamic::{DynamicGraph, Dyn};
use crate::error::{Result, StateError};
use crate::problem::{DataSlice, Flags, Problem, SliceState};
use crate::storage::CsrGraph;
use rayon::prelude::*;
use tracing::debug;

/// Query graph shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Path of length two centred on the root
    Wedge,
    /// Three-cycle through the root
    Triangle,
}

/// Per-device subgraph-matching state
#[derive(Debug)]
pub struct SmSlice {
    /// Embedding count per local vertex
    pub counts: Array1D<u64>,
}

impl Default for SmSlice {
    fn default() -> Self {
        Self {
            counts: Array1D::new("sm_counts"),
        }
    }
}

impl SliceState for SmSlice {
    type Value = u64;

    fn init(&mut self, graph: &CsrGraph, target: Location, _flags: Flags) -> Result<()> {
        self.counts.allocate(graph.num_nodes(), target)
    }

    fn reset(&mut self, graph: &CsrGraph, target: Location, stream: &Stream) -> Result<()> {
        self.counts.ensure_size(graph.num_nodes(), target)?;
        self.counts.fill(0, target, stream)
    }

    fn release(&mut self, target: Location) -> Result<()> {
        self.counts.release(target)
    }

    fn result(&self) -> &Array1D<u64> {
        &self.counts
    }

    fn result_mut(&mut self) -> &mut Array1D<u64> {
        &mut self.counts
    }
}

/// Subgraph-matching problem
pub type SmProblem<D = Dyn> = Problem<SmSlice, D>;

fn neighbors<'a>(offsets: &[u32], columns: &'a [u32], v: usize) -> &'a [u32] {
    &columns[offsets[v] as usize..offsets[v + 1] as usize]
}

/// Distinct neighbours of `v`, excluding `v` itself, in ascending order
fn distinct_neighbors(offsets: &[u32], columns: &[u32], v: usize) -> Vec<u32> {
    let mut out: Vec<u32> = neighbors(offsets, columns, v)
        .iter()
        .copied()
        .filter(|&n| n as usize != v)
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

fn count_wedges(offsets: &[u32], columns: &[u32], v: usize) -> u64 {
    let degree = distinct_neighbors(offsets, columns, v).len() as u64;
    degree * degree.saturating_sub(1) / 2
}

fn count_triangles(offsets: &[u32], columns: &[u32], v: usize) -> u64 {
    let adj = distinct_neighbors(offsets, columns, v);
    let mut count = 0;
    for (i, &a) in adj.iter().enumerate() {
        let a_adj = neighbors(offsets, columns, a as usize);
        count += adj[i + 1..].iter().filter(|b| a_adj.contains(b)).count() as u64;
    }
    count
}

/// Run `query` over a reset slice, writing counts at `location`
///
/// Reads the subgraph copy at the same residency; afterwards only that
/// residency of the counts is valid.
///
/// # Errors
///
/// Returns `InvalidArgument` for [`Query::Triangle`] on a renumbered
/// partition, `InvalidState` if the slice is not initialized or the subgraph
/// has no valid copy at `location`
pub fn run<D: DynamicGraph>(
    slice: &mut DataSlice<SmSlice, D>,
    query: Query,
    location: Location,
) -> Result<()> {
    if query == Query::Triangle && slice.is_renumbered() {
        return Err(StateError::InvalidArgument(format!(
            "triangle matching on device {} needs the full graph; \
             partition with DuplicatePartitioner",
            slice.gpu_idx()
        )));
    }
    let side = if location.contains(Location::DEVICE) {
        Location::DEVICE
    } else {
        Location::HOST
    };
    let (graph, state, stream) = slice.parts_mut()?;
    let _guard = stream.device().activate()?;

    let offsets = graph.csr.row_offsets.valid_slice(side)?;
    let columns = graph.csr.column_indices.valid_slice(side)?;
    let counts = state.counts.write_slice(side)?;

    stream.issue(|| {
        counts.par_iter_mut().enumerate().for_each(|(v, count)| {
            *count = match query {
                Query::Wedge => count_wedges(offsets, columns, v),
                Query::Triangle => count_triangles(offsets, columns, v),
            };
        });
    });
    debug!(gpu = stream.ordinal(), ?query, %side, "subgraph matching kernel issued");
    Ok(())
}
