//! Multi-accelerator problem orchestration
//!
//! A [`Problem`] partitions a graph across its accelerators, owns one
//! [`DataSlice`] per accelerator, and drives the shared lifecycle:
//!
//! ```text
//! init ──► reset ──► (algorithm) ──► extract ──► reset ──► ... ──► release
//! ```
//!
//! Every step fails fast: the first failing slice's error is returned
//! unchanged and later slices are not touched.

mod data_slice;

pub use data_slice::{DataSlice, SliceLifecycle, SliceState};

use crate::device::{Location, Platform};
use crate::dynamic::{DynamicGraph, Dyn};
use crate::error::{Result, StateError};
use crate::partition::{BlockPartitioner, DuplicatePartitioner, Partitioner};
use crate::storage::CsrGraph;
use rayon::prelude::*;
use std::ops::BitOr;
use std::sync::Arc;
use tracing::{debug, info};

/// Problem behaviour flags shared by every slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u32);

impl Flags {
    /// No options
    pub const NONE: Self = Self(0);
    /// Round-trip each device subgraph through the dynamic graph at init
    pub const BUILD_DYNAMIC: Self = Self(1);

    /// True if every bit of `other` is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Slice storage plus the residency markers of the slice table itself
///
/// The table is marked at host and device; it is only dropped once the
/// device-side marker has been cleared and the host side is released.
#[derive(Debug)]
struct SliceTable<S: SliceState, D: DynamicGraph> {
    entries: Option<Vec<DataSlice<S, D>>>,
    shadow: Location,
}

/// Orchestrates one algorithm's state across accelerators
#[derive(Debug)]
pub struct Problem<S: SliceState, D: DynamicGraph = Dyn> {
    platform: Arc<Platform>,
    gpu_idx: Vec<usize>,
    flags: Flags,
    partitioner: Box<dyn Partitioner>,
    data_slices: SliceTable<S, D>,
    org_nodes: usize,
    partition_table: Vec<u32>,
    conversion_table: Option<Vec<u32>>,
}

impl<S: SliceState, D: DynamicGraph> Problem<S, D> {
    /// Problem over devices `gpu_idx` of `platform`
    ///
    /// Uses [`DuplicatePartitioner`] for one device and [`BlockPartitioner`]
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty device list and
    /// `DeviceContext` for an unknown ordinal
    pub fn new(platform: Arc<Platform>, gpu_idx: Vec<usize>, flags: Flags) -> Result<Self> {
        if gpu_idx.is_empty() {
            return Err(StateError::InvalidArgument(
                "problem needs at least one device".to_string(),
            ));
        }
        for &ordinal in &gpu_idx {
            platform.device(ordinal)?;
        }
        let partitioner: Box<dyn Partitioner> = if gpu_idx.len() == 1 {
            Box::new(DuplicatePartitioner)
        } else {
            Box::new(BlockPartitioner)
        };
        Ok(Self {
            platform,
            gpu_idx,
            flags,
            partitioner,
            data_slices: SliceTable {
                entries: None,
                shadow: Location::NONE,
            },
            org_nodes: 0,
            partition_table: Vec::new(),
            conversion_table: None,
        })
    }

    /// Replace the partitioner
    #[must_use]
    pub fn with_partitioner(mut self, partitioner: impl Partitioner + 'static) -> Self {
        self.partitioner = Box::new(partitioner);
        self
    }

    /// Partition `graph` and initialize one slice per device
    ///
    /// On failure every slice created so far is dropped (freeing its memory)
    /// and the problem stays uninitialized.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already initialized, `Partition` for a
    /// partition whose tables do not match the graph, partitioner errors,
    /// or the first slice failure unchanged
    pub fn init(&mut self, graph: &CsrGraph, target: Location) -> Result<()> {
        if self.data_slices.entries.is_some() {
            return Err(StateError::InvalidState(
                "problem already initialized".to_string(),
            ));
        }
        let num_gpus = self.gpu_idx.len();
        let partition = self.partitioner.partition(graph, num_gpus)?;
        partition.validate(graph.num_nodes(), num_gpus)?;
        let renumbered = partition.conversion_table.is_some();

        let mut slices = Vec::with_capacity(num_gpus);
        for (gpu, sub_graph) in partition.subgraphs.into_iter().enumerate() {
            let mut slice = DataSlice::new();
            slice.init(
                &self.platform,
                sub_graph,
                num_gpus,
                self.gpu_idx[gpu],
                target,
                self.flags,
            )?;
            slice.set_renumbered(renumbered);
            slices.push(slice);
        }

        self.data_slices = SliceTable {
            entries: Some(slices),
            shadow: Location::ALL,
        };
        self.org_nodes = graph.num_nodes();
        self.partition_table = partition.partition_table;
        self.conversion_table = partition.conversion_table;
        info!(
            gpus = num_gpus,
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            "problem initialized"
        );
        Ok(())
    }

    /// Reset every slice in device order, then synchronize all devices
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` before init, the first slice failure, or a
    /// pending stream failure reported at the barrier
    pub fn reset(&mut self, target: Location) -> Result<()> {
        let slices = self
            .data_slices
            .entries
            .as_mut()
            .ok_or_else(|| StateError::InvalidState("problem not initialized".to_string()))?;
        for slice in slices.iter_mut() {
            let _guard = self.platform.activate(slice.gpu_idx())?;
            slice.reset(target)?;
        }
        self.platform.synchronize(&self.gpu_idx)?;
        debug!(gpus = self.gpu_idx.len(), "problem reset");
        Ok(())
    }

    /// Gather per-vertex results into `out` (indexed by global vertex id)
    ///
    /// With one device, `DEVICE` issues a single bulk device → host copy and
    /// `HOST` copies elementwise from the host copy. With several devices each
    /// slice's result is staged on the host (moved from the device when
    /// `target` includes it) and scattered through the partition tables.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `out` is shorter than the original node
    /// count, `InvalidState` if a result copy is missing or stale
    pub fn extract(&mut self, out: &mut [S::Value], target: Location) -> Result<()> {
        let org_nodes = self.org_nodes;
        if out.len() < org_nodes {
            return Err(StateError::InvalidArgument(format!(
                "output holds {} values, graph has {org_nodes} nodes",
                out.len()
            )));
        }
        let platform = Arc::clone(&self.platform);
        let slices = self
            .data_slices
            .entries
            .as_mut()
            .ok_or_else(|| StateError::InvalidState("problem not initialized".to_string()))?;

        if let [slice] = slices.as_mut_slice() {
            let _guard = platform.activate(slice.gpu_idx())?;
            let (_, state, stream) = slice.parts_mut()?;
            let result = state.result();
            if target.contains(Location::DEVICE) {
                result.copy_to_slice(&mut out[..org_nodes], Location::DEVICE)?;
            } else if target.contains(Location::HOST) {
                result.for_each_into(&mut out[..org_nodes], |d, h| *h = *d, Location::HOST, &stream)?;
                stream.synchronize()?;
            } else {
                return Err(StateError::InvalidArgument(format!(
                    "cannot extract from {target}"
                )));
            }
            return Ok(());
        }

        for slice in slices.iter_mut() {
            let _guard = platform.activate(slice.gpu_idx())?;
            let (_, state, _) = slice.parts_mut()?;
            let result = state.result_mut();
            if target.contains(Location::DEVICE) && !result.valid().contains(Location::HOST) {
                result.move_to(Location::DEVICE, Location::HOST)?;
            }
        }
        let staged = slices
            .iter()
            .map(|slice| slice.state().result().host_slice())
            .collect::<Result<Vec<_>>>()?;

        let partition_table = &self.partition_table;
        let conversion_table = self.conversion_table.as_deref();
        out[..org_nodes]
            .par_iter_mut()
            .enumerate()
            .try_for_each(|(v, dst)| {
                let missing = || StateError::Partition(format!("vertex {v} has no owner entry"));
                let owner = *partition_table.get(v).ok_or_else(missing)? as usize;
                let local = match conversion_table {
                    Some(table) => *table.get(v).ok_or_else(missing)? as usize,
                    None => v,
                };
                *dst = staged
                    .get(owner)
                    .and_then(|values| values.get(local))
                    .copied()
                    .ok_or_else(|| {
                        StateError::InvalidState(format!(
                            "vertex {v}: no staged value at device {owner} local {local}"
                        ))
                    })?;
                Ok(())
            })
    }

    /// Release every slice at `target`
    ///
    /// The slice table is dropped only when `target` includes the host and
    /// the table's device marker is already cleared (or cleared by this
    /// call). `DEFAULT` releases everything. Releasing a released problem is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first slice failure unchanged
    pub fn release(&mut self, target: Location) -> Result<()> {
        let target = target.resolve(Location::ALL);
        let Some(slices) = self.data_slices.entries.as_mut() else {
            return Ok(());
        };
        for slice in slices.iter_mut() {
            slice.release(target)?;
        }
        if target.contains(Location::DEVICE) {
            self.data_slices.shadow = self.data_slices.shadow.without(Location::DEVICE);
        }
        if target.contains(Location::HOST) && !self.data_slices.shadow.contains(Location::DEVICE) {
            self.data_slices.entries = None;
            self.data_slices.shadow = Location::NONE;
            debug!(gpus = self.gpu_idx.len(), "problem released");
        }
        Ok(())
    }

    /// Number of devices
    #[must_use]
    pub fn num_gpus(&self) -> usize {
        self.gpu_idx.len()
    }

    /// Device ordinals, one per slice
    #[must_use]
    pub fn gpu_idx(&self) -> &[usize] {
        &self.gpu_idx
    }

    /// Whether slices are allocated
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.data_slices.entries.is_some()
    }

    /// Flags shared by every slice
    #[must_use]
    pub const fn flags(&self) -> Flags {
        self.flags
    }

    /// Node count of the unpartitioned graph
    #[must_use]
    pub const fn num_nodes(&self) -> usize {
        self.org_nodes
    }

    /// Slice `gpu`
    #[must_use]
    pub fn data_slice(&self, gpu: usize) -> Option<&DataSlice<S, D>> {
        self.data_slices.entries.as_ref()?.get(gpu)
    }

    /// Mutable slice `gpu`
    pub fn data_slice_mut(&mut self, gpu: usize) -> Option<&mut DataSlice<S, D>> {
        self.data_slices.entries.as_mut()?.get_mut(gpu)
    }

    /// Owning device index of every global vertex
    #[must_use]
    pub fn partition_table(&self) -> &[u32] {
        &self.partition_table
    }

    /// Global → owner-local id table, when the partitioner renumbers
    #[must_use]
    pub fn conversion_table(&self) -> Option<&[u32]> {
        self.conversion_table.as_deref()
    }

    /// Platform the problem runs on
    #[must_use]
    pub fn platform(&self) -> &Arc<Platform> {
        &self.platform
    }
}
