//! Graph = static CSR + dynamic wrapper

use super::CsrGraph;
use crate::device::Location;
use crate::dynamic::{DynamicGraph, Dyn};
use crate::error::Result;

/// A CSR graph together with the dynamic structure built from it
///
/// The dynamic wrapper is owned exclusively by the graph for its whole life.
#[derive(Debug, Default)]
pub struct Graph<D: DynamicGraph = Dyn> {
    /// Immutable analytics form
    pub csr: CsrGraph,
    /// Mutable form (stub when dynamic support is compiled out)
    pub dynamic: D,
}

impl<D: DynamicGraph> Graph<D> {
    /// Wrap a CSR graph with an empty dynamic structure
    #[must_use]
    pub fn new(csr: CsrGraph) -> Self {
        Self {
            csr,
            dynamic: D::default(),
        }
    }

    /// Node count of the CSR form
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.csr.num_nodes()
    }

    /// Edge count of the CSR form
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.csr.num_edges()
    }

    /// Build the dynamic form from the CSR host copy
    ///
    /// # Errors
    ///
    /// Propagates dynamic-graph errors
    pub fn build_dynamic(&mut self) -> Result<()> {
        self.dynamic.from_csr(&self.csr)
    }

    /// Rewrite the CSR device arrays from the dynamic form
    ///
    /// # Errors
    ///
    /// Propagates dynamic-graph errors
    pub fn sync_csr_from_dynamic(&mut self) -> Result<()> {
        self.dynamic.to_csr(&mut self.csr)
    }

    /// Free CSR storage at `location`; the dynamic structure goes with the
    /// device side
    ///
    /// # Errors
    ///
    /// Returns `DeviceContext` if freed under the wrong device
    pub fn release(&mut self, location: Location) -> Result<()> {
        self.csr.release(location)?;
        if location.contains(Location::DEVICE) {
            self.dynamic.release()?;
        }
        Ok(())
    }
}
