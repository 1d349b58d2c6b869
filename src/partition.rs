//! Graph partitioning across accelerators
//!
//! A [`Partitioner`] splits one host-resident [`CsrGraph`] into one subgraph
//! per accelerator and reports which accelerator owns each global vertex.
//! Partitioners that renumber vertices also return a global → local id
//! table; the owning [`crate::Problem`] uses both tables only when gathering
//! results.

use crate::error::{Result, StateError};
use crate::storage::CsrGraph;
use std::collections::HashMap;
use tracing::debug;

/// Result of partitioning a graph
#[derive(Debug)]
pub struct Partition {
    /// One host-resident subgraph per part
    pub subgraphs: Vec<CsrGraph>,
    /// Owning part of every global vertex
    pub partition_table: Vec<u32>,
    /// Owner-local id of every global vertex (`None` when ids are preserved)
    pub conversion_table: Option<Vec<u32>>,
}

impl Partition {
    /// Check the tables against a graph of `nodes` vertices split `num_parts` ways
    ///
    /// # Errors
    ///
    /// Returns `Partition` describing the first inconsistency
    pub fn validate(&self, nodes: usize, num_parts: usize) -> Result<()> {
        let invalid = |msg: String| Err(StateError::Partition(msg));
        if self.subgraphs.len() != num_parts {
            return invalid(format!(
                "{} subgraphs for {num_parts} parts",
                self.subgraphs.len()
            ));
        }
        if self.partition_table.len() != nodes {
            return invalid(format!(
                "partition table has {} entries for {nodes} nodes",
                self.partition_table.len()
            ));
        }
        if let Some(table) = &self.conversion_table {
            if table.len() != nodes {
                return invalid(format!(
                    "conversion table has {} entries for {nodes} nodes",
                    table.len()
                ));
            }
        }
        for (v, &owner) in self.partition_table.iter().enumerate() {
            let Some(sub) = self.subgraphs.get(owner as usize) else {
                return invalid(format!("vertex {v} owned by missing part {owner}"));
            };
            let local = self
                .conversion_table
                .as_ref()
                .map_or(v, |table| table[v] as usize);
            if local >= sub.num_nodes() {
                return invalid(format!(
                    "vertex {v} maps to local {local}, part {owner} has {} nodes",
                    sub.num_nodes()
                ));
            }
        }
        Ok(())
    }
}

/// Splits a graph into per-accelerator subgraphs
pub trait Partitioner: Send + Sync + std::fmt::Debug {
    /// Partition `graph` into `num_parts` subgraphs
    ///
    /// # Errors
    ///
    /// Returns `Partition` for an unusable request, or `InvalidState` if the
    /// host copy of `graph` is stale
    fn partition(&self, graph: &CsrGraph, num_parts: usize) -> Result<Partition>;
}

fn check_parts(num_parts: usize) -> Result<()> {
    if num_parts == 0 {
        return Err(StateError::Partition("zero parts requested".to_string()));
    }
    u32::try_from(num_parts)
        .map(|_| ())
        .map_err(|_| StateError::Partition(format!("{num_parts} parts exceed u32 ids")))
}

/// Every part holds a full copy; vertex `v` is owned by part `v % num_parts`
///
/// Vertex ids are preserved, so no conversion table is produced.
#[derive(Debug, Default, Clone, Copy)]
pub struct DuplicatePartitioner;

impl Partitioner for DuplicatePartitioner {
    fn partition(&self, graph: &CsrGraph, num_parts: usize) -> Result<Partition> {
        check_parts(num_parts)?;
        let subgraphs = (0..num_parts)
            .map(|_| graph.host_copy())
            .collect::<Result<Vec<_>>>()?;

        #[allow(clippy::cast_possible_truncation)] // num_parts checked against u32
        let partition_table = (0..graph.num_nodes())
            .map(|v| (v % num_parts) as u32)
            .collect();

        Ok(Partition {
            subgraphs,
            partition_table,
            conversion_table: None,
        })
    }
}

/// Contiguous vertex ranges per part, renumbered to part-local ids
///
/// Local ids list owned vertices first (in global order) followed by proxy
/// copies of remote neighbours. Proxies carry no out-edges.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockPartitioner;

impl BlockPartitioner {
    fn block_size(nodes: usize, num_parts: usize) -> usize {
        nodes.div_ceil(num_parts).max(1)
    }
}

impl Partitioner for BlockPartitioner {
    #[allow(clippy::cast_possible_truncation)] // vertex ids are u32 by construction
    fn partition(&self, graph: &CsrGraph, num_parts: usize) -> Result<Partition> {
        check_parts(num_parts)?;
        let (row_offsets, column_indices, edge_values) = graph.csr_components()?;
        let node_values = graph.node_values.host_slice()?;
        let nodes = graph.num_nodes();
        let block = Self::block_size(nodes, num_parts);

        let mut partition_table = vec![0_u32; nodes];
        let mut conversion_table = vec![0_u32; nodes];
        let mut subgraphs = Vec::with_capacity(num_parts);

        for part in 0..num_parts {
            let lo = (part * block).min(nodes);
            let hi = ((part + 1) * block).min(nodes);
            let owned = hi - lo;

            let mut proxies: HashMap<u32, u32> = HashMap::new();
            let mut proxy_order: Vec<u32> = Vec::new();
            let mut local_offsets = Vec::with_capacity(owned + 1);
            let mut local_columns = Vec::new();
            let mut local_values = Vec::new();
            local_offsets.push(0_u32);

            for v in lo..hi {
                partition_table[v] = part as u32;
                conversion_table[v] = (v - lo) as u32;
                let (start, end) = (row_offsets[v] as usize, row_offsets[v + 1] as usize);
                for e in start..end {
                    let dst = column_indices[e] as usize;
                    let local = if (lo..hi).contains(&dst) {
                        (dst - lo) as u32
                    } else {
                        *proxies.entry(dst as u32).or_insert_with(|| {
                            proxy_order.push(dst as u32);
                            (owned + proxy_order.len() - 1) as u32
                        })
                    };
                    local_columns.push(local);
                    local_values.push(edge_values[e]);
                }
                local_offsets.push(local_columns.len() as u32);
            }

            // Proxy rows are empty
            let last = local_columns.len() as u32;
            local_offsets.extend(std::iter::repeat(last).take(proxy_order.len()));

            let local_node_values = node_values[lo..hi]
                .iter()
                .copied()
                .chain(proxy_order.iter().map(|&g| node_values[g as usize]))
                .collect();

            debug!(
                part,
                owned,
                proxies = proxy_order.len(),
                edges = local_columns.len(),
                "block partition built"
            );
            subgraphs.push(CsrGraph::from_parts(
                local_offsets,
                local_columns,
                local_values,
                local_node_values,
                graph.is_directed(),
            )?);
        }

        Ok(Partition {
            subgraphs,
            partition_table,
            conversion_table: Some(conversion_table),
        })
    }
}
