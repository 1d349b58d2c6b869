//! Error taxonomy for the state-management layer
//!
//! Every lifecycle operation returns [`Result`]. The first failing
//! sub-operation is returned unchanged to the caller; nothing is retried or
//! rolled back.

use thiserror::Error;

/// Failures reported by buffers, accelerators, dynamic graphs and problems
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// Accelerator memory exhausted
    #[error("out of memory on device {ordinal}: requested {requested} bytes, {available} available")]
    OutOfMemory {
        /// Accelerator ordinal
        ordinal: usize,
        /// Bytes requested
        requested: usize,
        /// Bytes still free
        available: usize,
    },

    /// Host allocation failed (size overflow)
    #[error("host allocation of {0} elements failed")]
    HostAllocation(usize),

    /// Operation invoked on an unallocated or released object
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Selecting a nonexistent or faulted accelerator
    #[error("device {ordinal} unavailable: {reason}")]
    DeviceContext {
        /// Accelerator ordinal
        ordinal: usize,
        /// Why the context could not be used
        reason: String,
    },

    /// Device memory touched with no accelerator context active
    #[error("no device context is active on this thread")]
    NoActiveDevice,

    /// A pending asynchronous operation failed, reported at a barrier
    #[error("synchronization failed on device {ordinal}: {message}")]
    Synchronization {
        /// Accelerator ordinal
        ordinal: usize,
        /// Deferred failure message
        message: String,
    },

    /// Vertex id outside the graph
    #[error("vertex {vertex} out of range (graph has {nodes} nodes)")]
    VertexOutOfRange {
        /// Offending vertex id
        vertex: u32,
        /// Node count of the graph
        nodes: usize,
    },

    /// Caller passed inconsistent arguments
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The partitioner could not split the graph
    #[error("partition failed: {0}")]
    Partition(String),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, StateError>;
