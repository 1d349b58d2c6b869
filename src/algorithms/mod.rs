//! Algorithms built on the problem/data-slice lifecycle
//!
//! Each algorithm supplies a [`crate::SliceState`] with its per-device
//! arrays and kernels that run on a slice's stream.

pub mod sm;

pub use sm::{Query, SmProblem, SmSlice};
