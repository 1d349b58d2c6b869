//! Stub dynamic graph for builds without dynamic-graph support

use super::{DynamicGraph, EdgePair};
use crate::device::Array1D;
use crate::error::Result;
use crate::storage::CsrGraph;

/// Zero-sized dynamic graph; every operation succeeds without effect
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisabledDyn;

impl DynamicGraph for DisabledDyn {
    const ENABLED: bool = false;

    fn init(&mut self, _nodes: usize, _directed: bool) -> Result<()> {
        Ok(())
    }

    fn insert_edges_batch(
        &mut self,
        _pairs: &mut Array1D<EdgePair>,
        _values: &mut Array1D<f32>,
        _batch_size: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn from_csr(&mut self, _csr: &CsrGraph) -> Result<()> {
        Ok(())
    }

    fn to_csr(&self, _csr: &mut CsrGraph) -> Result<()> {
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }

    fn num_nodes(&self) -> usize {
        0
    }

    fn num_edges(&self) -> usize {
        0
    }

    fn is_directed(&self) -> bool {
        true
    }
}
