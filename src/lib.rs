//! trueno-graph-state: accelerator-resident graph storage and problem state
//!
//! # Overview
//!
//! Storage and state layer for running graph algorithms across one or more
//! accelerators: location-tagged arrays, a static CSR graph, a mutable
//! slab-backed dynamic graph, and the per-device [`DataSlice`] /
//! multi-device [`Problem`] lifecycle that algorithms plug into.
//!
//! # Quick Start
//!
//! ```no_run
//! use trueno_graph_state::algorithms::sm::{self, Query};
//! use trueno_graph_state::{CsrGraph, Flags, Location, NodeId, Platform, PlatformConfig, SmProblem};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let platform = Platform::new(&PlatformConfig::default())?;
//! let graph = CsrGraph::from_edge_list_with_nodes(
//!     3,
//!     &[(NodeId(0), NodeId(1), 1.0), (NodeId(1), NodeId(2), 1.0), (NodeId(2), NodeId(0), 1.0)],
//!     false,
//! )?;
//!
//! let mut problem = SmProblem::<trueno_graph_state::Dyn>::new(platform, vec![0], Flags::NONE)?;
//! problem.init(&graph, Location::ALL)?;
//! problem.reset(Location::DEVICE)?;
//! if let Some(slice) = problem.data_slice_mut(0) {
//!     sm::run(slice, Query::Triangle, Location::DEVICE)?;
//! }
//!
//! let mut triangles = vec![0_u64; 3];
//! problem.extract(&mut triangles, Location::DEVICE)?;
//! assert_eq!(triangles, vec![1, 1, 1]);
//! problem.release(Location::ALL)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **device**: residency flags, simulated accelerators with memory
//!   accounting, streams, [`Array1D`]
//! - **storage**: [`CsrGraph`] and the CSR + dynamic [`Graph`] pair
//! - **dynamic**: [`DynamicGraph`] contract, slab engine (feature `dynamic`)
//!   and the zero-sized stub
//! - **partition**: duplicate and block partitioners
//! - **problem**: [`DataSlice`] and [`Problem`] lifecycle
//! - **gpu** (feature `gpu`): mirror device CSR arrays into wgpu buffers

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod algorithms;
pub mod device;
pub mod dynamic;
pub mod error;
pub mod partition;
pub mod problem;
pub mod storage;

// Real GPU buffers (optional)
#[cfg(feature = "gpu")]
pub mod gpu;

// Re-export core types
pub use algorithms::{Query, SmProblem, SmSlice};
pub use device::{Array1D, Location, Platform, PlatformConfig, Stream};
#[cfg(feature = "dynamic")]
pub use dynamic::SlabDyn;
pub use dynamic::{DisabledDyn, Dyn, DynamicGraph, EdgePair};
pub use partition::{BlockPartitioner, DuplicatePartitioner, Partition, Partitioner};
pub use problem::{DataSlice, Flags, Problem, SliceLifecycle, SliceState};
pub use storage::{CsrGraph, Graph, NodeId};

#[cfg(feature = "gpu")]
pub use gpu::{GpuCsrBuffers, GpuDevice};

// Error type
pub use error::{Result, StateError};
