//! Graph storage layer
//!
//! Provides the CSR representation and the [`Graph`] pairing of CSR with a
//! dynamic structure.

pub mod csr;
pub mod graph;

pub use csr::{CsrGraph, NodeId};
pub use graph::Graph;
