//! Dynamic (mutable) graph engine
//!
//! A [`DynamicGraph`] owns a concurrently-updatable adjacency structure that
//! can be bulk-built from a [`CsrGraph`], grown by batch edge insertion, and
//! materialized back into CSR form.
//!
//! Two implementations share the trait and are picked at compile time:
//!
//! - [`SlabDyn`] (feature `dynamic`, on by default): slab-backed store
//! - [`DisabledDyn`]: zero-sized stub whose operations succeed and do nothing
//!
//! Algorithm code is written against [`Dyn`], which names whichever variant
//! the build selected.

mod disabled;
#[cfg(feature = "dynamic")]
mod slab;

pub use disabled::DisabledDyn;
#[cfg(feature = "dynamic")]
pub use slab::{SlabDyn, SlabStore, SLAB_BYTES, SLAB_WIDTH};

use crate::device::Array1D;
use crate::error::Result;
use crate::storage::CsrGraph;

/// `(source, destination)` pair used by batch insertion
pub type EdgePair = [u32; 2];

/// Dynamic graph variant selected by the `dynamic` feature
#[cfg(feature = "dynamic")]
pub type Dyn = SlabDyn;

/// Dynamic graph variant selected by the `dynamic` feature
#[cfg(not(feature = "dynamic"))]
pub type Dyn = DisabledDyn;

/// Contract of the mutable graph wrapper
///
/// `init`/`from_csr` charge the device current on the calling thread; later
/// operations make the structure's own device current themselves.
pub trait DynamicGraph: Default + Send + Sync + std::fmt::Debug {
    /// False for the stub variant
    const ENABLED: bool;

    /// Create an empty structure for `nodes` vertices
    ///
    /// # Errors
    ///
    /// Returns allocation errors
    fn init(&mut self, nodes: usize, directed: bool) -> Result<()>;

    /// Insert the first `batch_size` edges of `pairs`/`values`
    ///
    /// Both buffers are moved to the structure's device first (a visible side
    /// effect on the caller's buffers); buffers already resident on another
    /// device are rejected with `DeviceContext`. Undirected graphs also
    /// receive every reverse edge within the same call. Edges inserted before
    /// a failure stay.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` before `init`/`from_csr`, `InvalidArgument` if
    /// `batch_size` exceeds a buffer, and errors reported by the structure
    fn insert_edges_batch(
        &mut self,
        pairs: &mut Array1D<EdgePair>,
        values: &mut Array1D<f32>,
        batch_size: usize,
    ) -> Result<()>;

    /// Bulk build from the host copy of `csr`, adopting its directedness
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the host copy is stale, or allocation errors
    fn from_csr(&mut self, csr: &CsrGraph) -> Result<()>;

    /// Build from combined CSR + COO input (reserved)
    ///
    /// # Errors
    ///
    /// Never fails in the base contract
    fn from_csr_and_coo(&mut self, _csr: &CsrGraph, _coo: &Array1D<EdgePair>) -> Result<()> {
        Ok(())
    }

    /// Materialize the structure into `csr`'s device arrays
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the structure does not exist, or allocation
    /// errors for the output arrays
    fn to_csr(&self, csr: &mut CsrGraph) -> Result<()>;

    /// Free the structure (idempotent)
    ///
    /// # Errors
    ///
    /// Never fails for the provided variants
    fn release(&mut self) -> Result<()>;

    /// Vertex count
    fn num_nodes(&self) -> usize;

    /// Stored edge count
    fn num_edges(&self) -> usize;

    /// Whether insertion skips symmetrization
    fn is_directed(&self) -> bool;
}
