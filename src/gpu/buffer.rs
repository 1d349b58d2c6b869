//! wgpu storage buffers for a device-resident CSR graph

use super::{GpuDevice, GpuDeviceError};
use crate::storage::CsrGraph;

/// CSR arrays mirrored into wgpu storage buffers
#[derive(Debug)]
pub struct GpuCsrBuffers {
    /// Number of nodes in the graph
    pub num_nodes: usize,

    /// Number of edges in the graph
    pub num_edges: usize,

    /// Row offsets (`num_nodes + 1` entries)
    pub row_offsets: wgpu::Buffer,

    /// Column indices (`num_edges` entries)
    pub column_indices: wgpu::Buffer,

    /// Edge values; `None` for an edgeless graph
    pub edge_values: Option<wgpu::Buffer>,
}

impl GpuCsrBuffers {
    /// Upload the valid device copy of `graph`
    ///
    /// # Errors
    ///
    /// Returns `State` if the graph's device copy is missing or stale
    pub fn from_csr_graph(device: &GpuDevice, graph: &CsrGraph) -> Result<Self, GpuDeviceError> {
        let offsets = graph.row_offsets.device_slice()?;
        let columns = graph.column_indices.device_slice()?;
        let values = graph.edge_values.device_slice()?;

        let row_offsets = device.storage_buffer("CSR row_offsets", bytemuck::cast_slice(offsets));
        let column_indices =
            device.storage_buffer("CSR column_indices", bytemuck::cast_slice(columns));
        let edge_values = (!values.is_empty())
            .then(|| device.storage_buffer("CSR edge_values", bytemuck::cast_slice(values)));

        tracing::debug!(
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            "CSR mirrored to wgpu"
        );
        Ok(Self {
            num_nodes: graph.num_nodes(),
            num_edges: graph.num_edges(),
            row_offsets,
            column_indices,
            edge_values,
        })
    }

    /// Number of nodes
    #[must_use]
    pub const fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of edges
    #[must_use]
    pub const fn num_edges(&self) -> usize {
        self.num_edges
    }
}
