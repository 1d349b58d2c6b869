//! Slab-backed dynamic graph
//!
//! Each vertex owns a bucket of destination → value entries guarded by its
//! own lock, so batch insertion runs in parallel across sources. Buckets are
//! charged to the device in fixed-size slabs; a bucket grows by one slab when
//! its slabs are full.
//!
//! Inserting an edge that already exists overwrites its value (entries are
//! merged, never duplicated). Which writer wins when one batch carries the
//! same edge twice is unspecified.

use super::{DynamicGraph, EdgePair};
use crate::device::{current_device, Accelerator, Array1D, Element, Location};
use crate::error::{Result, StateError};
use crate::storage::CsrGraph;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Entries per slab
pub const SLAB_WIDTH: usize = 31;

/// Device bytes per slab (entries plus next-slab link)
pub const SLAB_BYTES: usize =
    SLAB_WIDTH * (std::mem::size_of::<u32>() + std::mem::size_of::<f32>()) + std::mem::size_of::<u64>();

fn slabs_for(entries: usize) -> usize {
    entries.div_ceil(SLAB_WIDTH).max(1)
}

#[derive(Debug, Default)]
struct Bucket {
    entries: BTreeMap<u32, f32>,
    slabs: usize,
}

/// Concurrent per-vertex adjacency store resident on one device
#[derive(Debug)]
pub struct SlabStore {
    buckets: Vec<Mutex<Bucket>>,
    node_values: Vec<f32>,
    device: Arc<Accelerator>,
    reserved: AtomicUsize,
    edges: AtomicUsize,
}

impl SlabStore {
    /// Empty store for `nodes` vertices on the current device
    ///
    /// # Errors
    ///
    /// Returns `NoActiveDevice` or `OutOfMemory`
    pub fn with_nodes(nodes: usize) -> Result<Self> {
        let buckets = (0..nodes)
            .map(|_| {
                Mutex::new(Bucket {
                    entries: BTreeMap::new(),
                    slabs: 1,
                })
            })
            .collect();
        Self::on_current_device(buckets, vec![0.0; nodes], 0)
    }

    /// Bulk build from host CSR arrays with a single device reservation
    ///
    /// # Errors
    ///
    /// Returns `NoActiveDevice` or `OutOfMemory`
    pub fn from_csr_arrays(
        row_offsets: &[u32],
        column_indices: &[u32],
        edge_values: &[f32],
        node_values: &[f32],
    ) -> Result<Self> {
        let nodes = row_offsets.len().saturating_sub(1);
        let buckets: Vec<Bucket> = (0..nodes)
            .into_par_iter()
            .map(|v| {
                let (start, end) = (row_offsets[v] as usize, row_offsets[v + 1] as usize);
                let entries: BTreeMap<u32, f32> = column_indices[start..end]
                    .iter()
                    .copied()
                    .zip(edge_values[start..end].iter().copied())
                    .collect();
                let slabs = slabs_for(entries.len());
                Bucket { entries, slabs }
            })
            .collect();

        let edges = buckets.iter().map(|b| b.entries.len()).sum();
        Self::on_current_device(
            buckets.into_iter().map(Mutex::new).collect(),
            node_values.to_vec(),
            edges,
        )
    }

    fn on_current_device(
        buckets: Vec<Mutex<Bucket>>,
        node_values: Vec<f32>,
        edges: usize,
    ) -> Result<Self> {
        let device = current_device()?;
        let slabs: usize = buckets.iter().map(|b| b.lock().slabs).sum();
        let bytes = slabs
            .checked_mul(SLAB_BYTES)
            .ok_or(StateError::HostAllocation(slabs))?;
        device.reserve(bytes)?;
        Ok(Self {
            buckets,
            node_values,
            device,
            reserved: AtomicUsize::new(bytes),
            edges: AtomicUsize::new(edges),
        })
    }

    /// Insert or overwrite one edge
    ///
    /// # Errors
    ///
    /// Returns `VertexOutOfRange` or `OutOfMemory` when a new slab is needed
    pub fn insert(&self, src: u32, dst: u32, value: f32) -> Result<()> {
        let nodes = self.buckets.len();
        for vertex in [src, dst] {
            if vertex as usize >= nodes {
                return Err(StateError::VertexOutOfRange { vertex, nodes });
            }
        }

        let mut bucket = self.buckets[src as usize].lock();
        if let Some(slot) = bucket.entries.get_mut(&dst) {
            *slot = value;
            return Ok(());
        }
        if bucket.entries.len() >= bucket.slabs * SLAB_WIDTH {
            self.device.reserve(SLAB_BYTES)?;
            self.reserved.fetch_add(SLAB_BYTES, Ordering::AcqRel);
            bucket.slabs += 1;
        }
        bucket.entries.insert(dst, value);
        self.edges.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Insert a batch in parallel; stops at the first failure without undo
    ///
    /// # Errors
    ///
    /// Returns the first insertion error observed
    pub fn insert_batch(&self, pairs: &[EdgePair], values: &[f32]) -> Result<()> {
        pairs
            .par_iter()
            .zip(values.par_iter())
            .try_for_each(|(pair, value)| self.insert(pair[0], pair[1], *value))
    }

    /// CSR arrays with each row sorted by destination
    #[must_use]
    pub fn to_csr_arrays(&self) -> (Vec<u32>, Vec<u32>, Vec<f32>) {
        let mut row_offsets = Vec::with_capacity(self.buckets.len() + 1);
        let mut column_indices = Vec::with_capacity(self.num_edges());
        let mut edge_values = Vec::with_capacity(self.num_edges());

        row_offsets.push(0_u32);
        for bucket in &self.buckets {
            let bucket = bucket.lock();
            for (&dst, &value) in &bucket.entries {
                column_indices.push(dst);
                edge_values.push(value);
            }
            #[allow(clippy::cast_possible_truncation)] // Graphs >4B edges not supported yet
            row_offsets.push(column_indices.len() as u32);
        }
        (row_offsets, column_indices, edge_values)
    }

    /// Vertex count
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.buckets.len()
    }

    /// Stored edge count
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges.load(Ordering::Acquire)
    }

    /// Per-vertex values captured at build time
    #[must_use]
    pub fn node_values(&self) -> &[f32] {
        &self.node_values
    }

    /// Device bytes held by the store
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Ordinal of the device holding the store
    #[must_use]
    pub fn device_ordinal(&self) -> usize {
        self.device.ordinal()
    }
}

impl Drop for SlabStore {
    fn drop(&mut self) {
        self.device.free(*self.reserved.get_mut());
    }
}

/// Device storage of `array`, if any, must live on device `ordinal`
fn check_device<T: Element>(array: &Array1D<T>, ordinal: usize) -> Result<()> {
    match array.device_ordinal() {
        Some(held) if held != ordinal => Err(StateError::DeviceContext {
            ordinal,
            reason: format!("{} lives on device {held}", array.name()),
        }),
        _ => Ok(()),
    }
}

/// Move `array` onto device `ordinal`, which must be current
fn ensure_on_device<T: Element>(array: &mut Array1D<T>, ordinal: usize) -> Result<()> {
    check_device(array, ordinal)?;
    if !array.valid().contains(Location::DEVICE) {
        array.move_to(Location::HOST, Location::DEVICE)?;
    }
    Ok(())
}

fn symmetrize(pairs: &[EdgePair], values: &[f32]) -> (Vec<EdgePair>, Vec<f32>) {
    let mut sym_pairs = Vec::with_capacity(pairs.len() * 2);
    let mut sym_values = Vec::with_capacity(values.len() * 2);
    for (&[src, dst], &value) in pairs.iter().zip(values) {
        sym_pairs.push([src, dst]);
        sym_values.push(value);
        if src != dst {
            sym_pairs.push([dst, src]);
            sym_values.push(value);
        }
    }
    (sym_pairs, sym_values)
}

/// Dynamic graph wrapper owning a [`SlabStore`]
#[derive(Debug, Default)]
pub struct SlabDyn {
    store: Option<SlabStore>,
    directed: bool,
}

impl SlabDyn {
    /// Underlying store, if built
    #[must_use]
    pub fn store(&self) -> Option<&SlabStore> {
        self.store.as_ref()
    }

    fn built(&self) -> Result<&SlabStore> {
        self.store
            .as_ref()
            .ok_or_else(|| StateError::InvalidState("dynamic graph not built".to_string()))
    }
}

impl DynamicGraph for SlabDyn {
    const ENABLED: bool = true;

    fn init(&mut self, nodes: usize, directed: bool) -> Result<()> {
        self.store = None;
        self.store = Some(SlabStore::with_nodes(nodes)?);
        self.directed = directed;
        debug!(nodes, directed, "dynamic graph initialized");
        Ok(())
    }

    fn insert_edges_batch(
        &mut self,
        pairs: &mut Array1D<EdgePair>,
        values: &mut Array1D<f32>,
        batch_size: usize,
    ) -> Result<()> {
        let store = self.built()?;
        if batch_size > pairs.len() || batch_size > values.len() {
            return Err(StateError::InvalidArgument(format!(
                "batch of {batch_size} exceeds buffers ({} pairs, {} values)",
                pairs.len(),
                values.len()
            )));
        }

        let _guard = store.device.activate()?;
        let ordinal = store.device_ordinal();
        ensure_on_device(pairs, ordinal)?;
        ensure_on_device(values, ordinal)?;
        let pairs = &pairs.device_slice()?[..batch_size];
        let values = &values.device_slice()?[..batch_size];

        if self.directed {
            store.insert_batch(pairs, values)?;
        } else {
            let (sym_pairs, sym_values) = symmetrize(pairs, values);
            store.insert_batch(&sym_pairs, &sym_values)?;
        }
        debug!(
            gpu = store.device_ordinal(),
            batch = batch_size,
            directed = self.directed,
            edges = store.num_edges(),
            "edge batch inserted"
        );
        Ok(())
    }

    fn from_csr(&mut self, csr: &CsrGraph) -> Result<()> {
        let (row_offsets, column_indices, edge_values) = csr.csr_components()?;
        let node_values = csr.node_values.host_slice()?;

        self.store = None;
        self.store = Some(SlabStore::from_csr_arrays(
            row_offsets,
            column_indices,
            edge_values,
            node_values,
        )?);
        self.directed = csr.is_directed();
        debug!(
            nodes = csr.num_nodes(),
            edges = csr.num_edges(),
            "dynamic graph built from csr"
        );
        Ok(())
    }

    fn to_csr(&self, csr: &mut CsrGraph) -> Result<()> {
        let store = self.built()?;
        let _guard = store.device.activate()?;
        let ordinal = store.device_ordinal();
        check_device(&csr.row_offsets, ordinal)?;
        check_device(&csr.column_indices, ordinal)?;
        check_device(&csr.edge_values, ordinal)?;
        check_device(&csr.node_values, ordinal)?;
        let (row_offsets, column_indices, edge_values) = store.to_csr_arrays();

        csr.ensure_size(store.num_nodes(), column_indices.len(), Location::DEVICE)?;
        csr.row_offsets.device_slice_mut()?.copy_from_slice(&row_offsets);
        csr.column_indices.device_slice_mut()?.copy_from_slice(&column_indices);
        csr.edge_values.device_slice_mut()?.copy_from_slice(&edge_values);
        csr.node_values.device_slice_mut()?.copy_from_slice(store.node_values());
        csr.set_directed(self.directed);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        self.store = None;
        Ok(())
    }

    fn num_nodes(&self) -> usize {
        self.store.as_ref().map_or(0, SlabStore::num_nodes)
    }

    fn num_edges(&self) -> usize {
        self.store.as_ref().map_or(0, SlabStore::num_edges)
    }

    fn is_directed(&self) -> bool {
        self.directed
    }
}
