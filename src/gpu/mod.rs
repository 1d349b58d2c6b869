//! Real GPU mirror of device-resident graph arrays
//!
//! The simulated accelerators in [`crate::device`] do the accounting; this
//! module uploads a slice's device copy into wgpu storage buffers so that
//! WGSL kernels can consume it.
//!
//! # Architecture
//!
//! - `device`: wgpu adapter/device/queue initialization
//! - `buffer`: CSR storage buffers built from [`crate::CsrGraph`] device arrays
//!
//! # Feature Flag
//!
//! This module is only available with the `gpu` feature flag:
//! ```bash
//! cargo build --features gpu
//! ```

mod buffer;
mod device;

pub use buffer::GpuCsrBuffers;
pub use device::{GpuDevice, GpuDeviceError};
