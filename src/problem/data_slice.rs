//! Per-accelerator problem state
//!
//! A [`DataSlice`] binds one accelerator to its subgraph and to the
//! algorithm-specific arrays ([`SliceState`]) sized to that subgraph.
//!
//! Lifecycle: unallocated → initialized → (reset ⇄ used) → released.

use super::Flags;
use crate::device::{Array1D, Element, Location, Platform, Stream};
use crate::dynamic::{DynamicGraph, Dyn};
use crate::error::{Result, StateError};
use crate::storage::{CsrGraph, Graph};
use tracing::{debug, info};

/// Algorithm-specific arrays held by a [`DataSlice`]
///
/// Implementations allocate, reset and free their own arrays. Methods are
/// called with the slice's device already current.
pub trait SliceState: Default + Send + std::fmt::Debug {
    /// Per-vertex result element
    type Value: Element + PartialEq + std::fmt::Debug;

    /// Allocate arrays for `graph` at `target`
    ///
    /// # Errors
    ///
    /// Returns allocation errors
    fn init(&mut self, graph: &CsrGraph, target: Location, flags: Flags) -> Result<()>;

    /// Resize arrays to `graph` (grow only) and fill them with defaults
    ///
    /// # Errors
    ///
    /// Returns allocation errors
    fn reset(&mut self, graph: &CsrGraph, target: Location, stream: &Stream) -> Result<()>;

    /// Free arrays at `target`
    ///
    /// # Errors
    ///
    /// Returns `DeviceContext` if freed under the wrong device
    fn release(&mut self, target: Location) -> Result<()>;

    /// Per-vertex result array gathered by `Problem::extract`
    fn result(&self) -> &Array1D<Self::Value>;

    /// Mutable per-vertex result array
    fn result_mut(&mut self) -> &mut Array1D<Self::Value>;
}

/// Lifecycle state of a [`DataSlice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SliceLifecycle {
    /// Never initialized
    #[default]
    Unallocated,
    /// Bound to a device with arrays allocated
    Initialized,
    /// All memory freed
    Released,
}

/// One accelerator's share of a problem
#[derive(Debug, Default)]
pub struct DataSlice<S: SliceState, D: DynamicGraph = Dyn> {
    sub_graph: Option<Graph<D>>,
    num_gpus: usize,
    gpu_idx: usize,
    stream: Option<Stream>,
    target: Location,
    held: Location,
    renumbered: bool,
    lifecycle: SliceLifecycle,
    state: S,
}

impl<S: SliceState, D: DynamicGraph> DataSlice<S, D> {
    /// Unallocated slice
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to device `gpu_idx`, take ownership of `sub_graph`, move it to
    /// the device when `target` includes it, and allocate algorithm arrays
    ///
    /// The device is made current before anything is allocated.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if already initialized, `DeviceContext` for a
    /// bad device, and the first allocation or transfer failure
    pub fn init(
        &mut self,
        platform: &Platform,
        sub_graph: CsrGraph,
        num_gpus: usize,
        gpu_idx: usize,
        target: Location,
        flags: Flags,
    ) -> Result<()> {
        if self.lifecycle == SliceLifecycle::Initialized {
            return Err(StateError::InvalidState(format!(
                "data slice on device {} already initialized",
                self.gpu_idx
            )));
        }
        let target = target.resolve(Location::ALL);
        let device = platform.device(gpu_idx)?;
        let _guard = device.activate()?;

        self.num_gpus = num_gpus;
        self.gpu_idx = gpu_idx;
        self.stream = Some(device.stream());
        self.target = target;

        let mut graph = Graph::<D>::new(sub_graph);
        if target.contains(Location::DEVICE) {
            graph.csr.move_to(Location::HOST, Location::DEVICE)?;
            if flags.contains(Flags::BUILD_DYNAMIC) && D::ENABLED {
                graph.build_dynamic()?;
                graph.sync_csr_from_dynamic()?;
            }
        }
        if !target.contains(Location::HOST) {
            graph.csr.release(Location::HOST)?;
        }
        self.state.init(&graph.csr, target, flags)?;

        info!(
            gpu = gpu_idx,
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            %target,
            "data slice initialized"
        );
        self.sub_graph = Some(graph);
        self.held = target;
        self.lifecycle = SliceLifecycle::Initialized;
        Ok(())
    }

    /// Prepare arrays for a fresh run (idempotent)
    ///
    /// `target` is clipped to the residencies the slice still holds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless initialized, plus allocation errors
    pub fn reset(&mut self, target: Location) -> Result<()> {
        let target = target.resolve(self.held) & self.held;
        let (graph, state, stream) = self.parts_mut()?;
        let _guard = stream.device().activate()?;
        state.reset(&graph.csr, target, &stream)?;
        debug!(gpu = stream.ordinal(), nodes = graph.num_nodes(), %target, "data slice reset");
        Ok(())
    }

    /// Free memory at `target`; a no-op once nothing is held
    ///
    /// # Errors
    ///
    /// Returns `DeviceContext` if the bound device cannot be made current
    pub fn release(&mut self, target: Location) -> Result<()> {
        if self.lifecycle != SliceLifecycle::Initialized {
            return Ok(());
        }
        let target = target.resolve(self.held);
        let _guard = match (&self.stream, target.contains(Location::DEVICE)) {
            (Some(stream), true) => Some(stream.device().activate()?),
            _ => None,
        };

        self.state.release(target)?;
        if let Some(graph) = self.sub_graph.as_mut() {
            graph.release(target)?;
        }

        self.held = self.held.without(target);
        if self.held.is_empty() {
            self.sub_graph = None;
            self.lifecycle = SliceLifecycle::Released;
            debug!(gpu = self.gpu_idx, "data slice released");
        }
        Ok(())
    }

    /// Subgraph, algorithm state and stream, borrowed together
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless initialized
    pub fn parts_mut(&mut self) -> Result<(&Graph<D>, &mut S, Stream)> {
        if self.lifecycle != SliceLifecycle::Initialized {
            return Err(self.not_initialized());
        }
        let graph = self.sub_graph.as_ref().ok_or_else(|| self.not_initialized())?;
        let stream = self.stream.clone().ok_or_else(|| self.not_initialized())?;
        Ok((graph, &mut self.state, stream))
    }

    fn not_initialized(&self) -> StateError {
        StateError::InvalidState(format!(
            "data slice on device {} is {:?}",
            self.gpu_idx, self.lifecycle
        ))
    }

    /// Lifecycle state
    #[must_use]
    pub const fn lifecycle(&self) -> SliceLifecycle {
        self.lifecycle
    }

    /// Device ordinal this slice is bound to
    #[must_use]
    pub const fn gpu_idx(&self) -> usize {
        self.gpu_idx
    }

    /// Number of devices in the owning problem
    #[must_use]
    pub const fn num_gpus(&self) -> usize {
        self.num_gpus
    }

    /// Residency chosen at init
    #[must_use]
    pub const fn target(&self) -> Location {
        self.target
    }

    /// Whether the subgraph uses part-local ids with proxy vertices
    ///
    /// Proxies carry no out-edges, so kernels that read a neighbour's
    /// adjacency see an incomplete graph.
    #[must_use]
    pub const fn is_renumbered(&self) -> bool {
        self.renumbered
    }

    pub(crate) fn set_renumbered(&mut self, renumbered: bool) {
        self.renumbered = renumbered;
    }

    /// Residencies still holding memory
    #[must_use]
    pub const fn held(&self) -> Location {
        self.held
    }

    /// Execution stream of the bound device
    #[must_use]
    pub fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    /// Local subgraph
    #[must_use]
    pub fn sub_graph(&self) -> Option<&Graph<D>> {
        self.sub_graph.as_ref()
    }

    /// Mutable local subgraph (e.g. for batch insertion)
    pub fn sub_graph_mut(&mut self) -> Option<&mut Graph<D>> {
        self.sub_graph.as_mut()
    }

    /// Algorithm-specific state
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// Mutable algorithm-specific state
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::SmSlice;
    use crate::device::PlatformConfig;
    use crate::NodeId;
    use std::sync::Arc;

    fn platform() -> Arc<Platform> {
        Platform::new(&PlatformConfig::default().with_devices(2).with_device_memory(4096)).unwrap()
    }

    fn path() -> CsrGraph {
        CsrGraph::from_edge_list(&[(NodeId(0), NodeId(1), 1.0), (NodeId(1), NodeId(2), 1.0)])
            .unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let platform = platform();
        let mut slice: DataSlice<SmSlice> = DataSlice::new();
        assert_eq!(slice.lifecycle(), SliceLifecycle::Unallocated);
        assert!(slice.reset(Location::ALL).is_err());

        slice
            .init(&platform, path(), 1, 1, Location::ALL, Flags::NONE)
            .unwrap();
        assert_eq!(slice.lifecycle(), SliceLifecycle::Initialized);
        assert_eq!(slice.gpu_idx(), 1);
        assert_eq!(slice.stream().unwrap().ordinal(), 1);
        assert_eq!(platform.device(0).unwrap().allocated(), 0);
        assert!(platform.device(1).unwrap().allocated() > 0);

        slice.reset(Location::ALL).unwrap();
        assert_eq!(slice.state().counts.host_slice().unwrap(), &[0, 0, 0]);

        slice.release(Location::ALL).unwrap();
        assert_eq!(slice.lifecycle(), SliceLifecycle::Released);
        assert!(slice.sub_graph().is_none());
        assert_eq!(platform.device(1).unwrap().allocated(), 0);

        slice.release(Location::ALL).unwrap();
        assert!(slice.reset(Location::ALL).is_err());
    }

    #[test]
    fn test_release_unallocated_is_noop() {
        let mut slice: DataSlice<SmSlice> = DataSlice::new();
        slice.release(Location::ALL).unwrap();
        assert_eq!(slice.lifecycle(), SliceLifecycle::Unallocated);
    }

    #[test]
    fn test_double_init_rejected() {
        let platform = platform();
        let mut slice: DataSlice<SmSlice> = DataSlice::new();
        slice
            .init(&platform, path(), 1, 0, Location::ALL, Flags::NONE)
            .unwrap();
        let err = slice
            .init(&platform, path(), 1, 0, Location::ALL, Flags::NONE)
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidState(_)));
    }

    #[test]
    fn test_reset_clipped_to_held() {
        let platform = platform();
        let mut slice: DataSlice<SmSlice> = DataSlice::new();
        slice
            .init(&platform, path(), 1, 0, Location::DEVICE, Flags::NONE)
            .unwrap();

        slice.reset(Location::ALL).unwrap();
        assert_eq!(slice.state().counts.allocated(), Location::DEVICE);
        assert_eq!(slice.state().counts.device_slice().unwrap(), &[0, 0, 0]);
    }

    #[test]
    fn test_unknown_device_rejected() {
        let platform = platform();
        let mut slice: DataSlice<SmSlice> = DataSlice::new();
        let err = slice
            .init(&platform, path(), 1, 5, Location::ALL, Flags::NONE)
            .unwrap_err();
        assert!(matches!(err, StateError::DeviceContext { ordinal: 5, .. }));
        assert_eq!(slice.lifecycle(), SliceLifecycle::Unallocated);
    }
}
