//! Accelerator memory model
//!
//! # Architecture
//!
//! - `location`: residency flags (`HOST`, `DEVICE`, `ALL`, `DEFAULT`)
//! - `platform`: devices, memory accounting, scoped current-device guard
//! - `stream`: per-device in-order execution streams with deferred errors
//! - `array`: location-tagged typed arrays with explicit moves
//!
//! Every device allocation is charged to the device made current through
//! [`Platform::activate`]. Allocating with no current device is an error,
//! never a silent fallback to device 0.

mod array;
mod location;
mod platform;
mod stream;

pub use array::{Array1D, Element};
pub use location::Location;
pub use platform::{
    current_device, Accelerator, DeviceGuard, Platform, PlatformConfig, DEFAULT_DEVICE_MEMORY,
    ENV_DEVICE_MEMORY, ENV_NUM_DEVICES,
};
pub use stream::Stream;
