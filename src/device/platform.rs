//! Accelerator platform: device enumeration, memory accounting and the
//! thread-local current-device context
//!
//! Accelerator memory is accounted per device so that allocation on the
//! wrong device or past capacity is observable. The current device can only
//! be changed through [`DeviceGuard`], which restores the previous context
//! when dropped.

use super::stream::{Stream, StreamState};
use crate::error::{Result, StateError};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default per-device memory (1 GiB)
pub const DEFAULT_DEVICE_MEMORY: usize = 1 << 30;

/// Environment variable overriding the device count
pub const ENV_NUM_DEVICES: &str = "TRUENO_NUM_DEVICES";

/// Environment variable overriding per-device memory (bytes)
pub const ENV_DEVICE_MEMORY: &str = "TRUENO_DEVICE_MEMORY";

thread_local! {
    static CURRENT: RefCell<Option<Arc<Accelerator>>> = const { RefCell::new(None) };
}

/// Platform configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Number of accelerators
    pub num_devices: usize,
    /// Memory capacity of each accelerator in bytes
    pub device_memory_bytes: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            num_devices: 1,
            device_memory_bytes: DEFAULT_DEVICE_MEMORY,
        }
    }
}

impl PlatformConfig {
    /// Read overrides from `TRUENO_NUM_DEVICES` / `TRUENO_DEVICE_MEMORY`
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a variable is set but not a number
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(n) = read_env(ENV_NUM_DEVICES)? {
            config.num_devices = n;
        }
        if let Some(bytes) = read_env(ENV_DEVICE_MEMORY)? {
            config.device_memory_bytes = bytes;
        }
        Ok(config)
    }

    /// Set the device count
    #[must_use]
    pub const fn with_devices(mut self, num_devices: usize) -> Self {
        self.num_devices = num_devices;
        self
    }

    /// Set per-device memory
    #[must_use]
    pub const fn with_device_memory(mut self, bytes: usize) -> Self {
        self.device_memory_bytes = bytes;
        self
    }
}

fn read_env(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| StateError::InvalidArgument(format!("{key}={raw} is not a number"))),
        Err(_) => Ok(None),
    }
}

/// One accelerator: capacity, allocation accounting and stream state
#[derive(Debug)]
pub struct Accelerator {
    ordinal: usize,
    capacity: usize,
    allocated: AtomicUsize,
    faulted: AtomicBool,
    pub(crate) stream_state: StreamState,
}

impl Accelerator {
    fn new(ordinal: usize, capacity: usize) -> Self {
        Self {
            ordinal,
            capacity,
            allocated: AtomicUsize::new(0),
            faulted: AtomicBool::new(false),
            stream_state: StreamState::default(),
        }
    }

    /// Device ordinal
    #[must_use]
    pub const fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Total capacity in bytes
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently allocated
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Bytes still free
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.allocated())
    }

    /// Mark the device faulted (subsequent activation and stream work fails)
    pub fn set_faulted(&self, faulted: bool) {
        if faulted {
            warn!(gpu = self.ordinal, "device marked faulted");
        }
        self.faulted.store(faulted, Ordering::Release);
    }

    /// Whether the device is faulted
    #[must_use]
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Reserve `bytes` of device memory
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the reservation exceeds capacity
    pub fn reserve(&self, bytes: usize) -> Result<()> {
        let mut current = self.allocated.load(Ordering::Acquire);
        loop {
            let next = current
                .checked_add(bytes)
                .filter(|next| *next <= self.capacity)
                .ok_or_else(|| {
                    debug!(gpu = self.ordinal, requested = bytes, "device allocation failed");
                    StateError::OutOfMemory {
                        ordinal: self.ordinal,
                        requested: bytes,
                        available: self.capacity.saturating_sub(current),
                    }
                })?;
            match self.allocated.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Return `bytes` to the device
    pub fn free(&self, bytes: usize) {
        let _ = self
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                Some(cur.saturating_sub(bytes))
            });
    }

    /// Execution stream handle for this device
    #[must_use]
    pub fn stream(self: &Arc<Self>) -> Stream {
        Stream::new(Arc::clone(self))
    }

    /// Make this device current on the calling thread
    ///
    /// # Errors
    ///
    /// Returns `DeviceContext` if the device is faulted
    pub fn activate(self: &Arc<Self>) -> Result<DeviceGuard> {
        if self.is_faulted() {
            return Err(StateError::DeviceContext {
                ordinal: self.ordinal,
                reason: "device is faulted".to_string(),
            });
        }
        let previous = CURRENT.with(|cur| cur.borrow_mut().replace(Arc::clone(self)));
        Ok(DeviceGuard {
            previous,
            _not_send: PhantomData,
        })
    }
}

/// Scoped current-device context; restores the previous device on drop
#[derive(Debug)]
#[must_use = "the device is only current while the guard is alive"]
pub struct DeviceGuard {
    previous: Option<Arc<Accelerator>>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|cur| *cur.borrow_mut() = previous);
    }
}

/// The device current on the calling thread
///
/// # Errors
///
/// Returns `NoActiveDevice` if no [`DeviceGuard`] is alive on this thread
pub fn current_device() -> Result<Arc<Accelerator>> {
    CURRENT
        .with(|cur| cur.borrow().clone())
        .ok_or(StateError::NoActiveDevice)
}

/// Set of accelerators visible to the process
#[derive(Debug)]
pub struct Platform {
    devices: Vec<Arc<Accelerator>>,
}

impl Platform {
    /// Create a platform from configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `num_devices` is zero
    pub fn new(config: &PlatformConfig) -> Result<Arc<Self>> {
        if config.num_devices == 0 {
            return Err(StateError::InvalidArgument(
                "platform needs at least one device".to_string(),
            ));
        }
        let devices = (0..config.num_devices)
            .map(|ordinal| Arc::new(Accelerator::new(ordinal, config.device_memory_bytes)))
            .collect();
        debug!(
            devices = config.num_devices,
            memory = config.device_memory_bytes,
            "platform created"
        );
        Ok(Arc::new(Self { devices }))
    }

    /// Platform configured from the environment
    ///
    /// # Errors
    ///
    /// Propagates configuration errors
    pub fn from_env() -> Result<Arc<Self>> {
        Self::new(&PlatformConfig::from_env()?)
    }

    /// Number of devices
    #[must_use]
    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    /// Look up a device
    ///
    /// # Errors
    ///
    /// Returns `DeviceContext` for an unknown ordinal
    pub fn device(&self, ordinal: usize) -> Result<&Arc<Accelerator>> {
        self.devices
            .get(ordinal)
            .ok_or_else(|| StateError::DeviceContext {
                ordinal,
                reason: format!("platform has {} devices", self.devices.len()),
            })
    }

    /// Make device `ordinal` current until the guard drops
    ///
    /// # Errors
    ///
    /// Returns `DeviceContext` for an unknown or faulted device
    pub fn activate(&self, ordinal: usize) -> Result<DeviceGuard> {
        self.device(ordinal)?.activate()
    }

    /// Barrier over the given devices' streams; first failure wins
    ///
    /// # Errors
    ///
    /// Returns the first pending `Synchronization` error
    pub fn synchronize(&self, ordinals: &[usize]) -> Result<()> {
        for &ordinal in ordinals {
            self.device(ordinal)?.stream().synchronize()?;
        }
        Ok(())
    }

    /// Barrier over every device
    ///
    /// # Errors
    ///
    /// Returns the first pending `Synchronization` error
    pub fn synchronize_all(&self) -> Result<()> {
        for device in &self.devices {
            device.stream().synchronize()?;
        }
        Ok(())
    }
}
