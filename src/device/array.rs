//! Location-tagged typed arrays
//!
//! An [`Array1D`] may hold storage on the host, on one device, or both, and
//! tracks which of those copies currently holds valid data. Data only moves
//! between residencies through [`Array1D::move_to`]; writing through one
//! side's accessor invalidates the other side.
//!
//! Device storage is charged to the device current on the calling thread
//! (see [`crate::device::Platform::activate`]) and returned when the storage
//! is released or dropped.

use super::location::Location;
use super::platform::{current_device, Accelerator};
use super::stream::Stream;
use crate::error::{Result, StateError};
use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Element types storable in an [`Array1D`]
pub trait Element: Copy + Default + Send + Sync + 'static {}

impl<T: Copy + Default + Send + Sync + 'static> Element for T {}

struct DeviceStorage<T> {
    data: Vec<T>,
    device: Arc<Accelerator>,
    bytes: usize,
}

impl<T: Element> DeviceStorage<T> {
    fn allocate(capacity: usize) -> Result<Self> {
        let device = current_device()?;
        let bytes = capacity
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(StateError::HostAllocation(capacity))?;
        device.reserve(bytes)?;
        let data = match host_vec(capacity) {
            Ok(data) => data,
            Err(err) => {
                device.free(bytes);
                return Err(err);
            }
        };
        Ok(Self {
            data,
            device,
            bytes,
        })
    }
}

impl<T> Drop for DeviceStorage<T> {
    fn drop(&mut self) {
        self.device.free(self.bytes);
    }
}

fn host_vec<T: Element>(capacity: usize) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(capacity)
        .map_err(|_| StateError::HostAllocation(capacity))?;
    data.resize(capacity, T::default());
    Ok(data)
}

fn single_side(location: Location) -> Result<Location> {
    if location == Location::HOST || location == Location::DEVICE {
        Ok(location)
    } else {
        Err(StateError::InvalidArgument(format!(
            "expected host or device, got {location}"
        )))
    }
}

/// Typed array with explicit host/device residency
pub struct Array1D<T> {
    name: String,
    size: usize,
    host: Option<Vec<T>>,
    device: Option<DeviceStorage<T>>,
    valid: Location,
}

impl<T: Element> Array1D<T> {
    /// Empty, unallocated array
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            host: None,
            device: None,
            valid: Location::NONE,
        }
    }

    /// Host-resident array adopting `data`
    #[must_use]
    pub fn from_vec(name: impl Into<String>, data: Vec<T>) -> Self {
        let mut array = Self::new(name);
        array.set_host(data);
        array
    }

    /// Adopt an existing host buffer; the host copy becomes the only valid one
    pub fn set_host(&mut self, data: Vec<T>) {
        self.size = data.len();
        self.host = Some(data);
        self.valid = Location::HOST;
    }

    /// Array name (for diagnostics)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logical length
    #[must_use]
    pub const fn len(&self) -> usize {
        self.size
    }

    /// True if the logical length is zero
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Residencies holding storage
    #[must_use]
    pub fn allocated(&self) -> Location {
        let mut location = Location::NONE;
        if self.host.is_some() {
            location = location | Location::HOST;
        }
        if self.device.is_some() {
            location = location | Location::DEVICE;
        }
        location
    }

    /// Residencies holding valid data
    #[must_use]
    pub const fn valid(&self) -> Location {
        self.valid
    }

    /// Ordinal of the device holding the device copy
    #[must_use]
    pub fn device_ordinal(&self) -> Option<usize> {
        self.device.as_ref().map(|storage| storage.device.ordinal())
    }

    /// Storage capacity at one residency
    #[must_use]
    pub fn capacity_at(&self, side: Location) -> Option<usize> {
        if side == Location::HOST {
            self.host.as_ref().map(Vec::len)
        } else if side == Location::DEVICE {
            self.device.as_ref().map(|storage| storage.data.len())
        } else {
            None
        }
    }

    /// (Re)allocate `size` elements at `location`
    ///
    /// # Errors
    ///
    /// Returns `NoActiveDevice`/`OutOfMemory` for device allocation failures
    pub fn allocate(&mut self, size: usize, location: Location) -> Result<()> {
        let location = location.resolve(self.allocated_or_host());
        for side in location.sides() {
            self.allocate_side(size, side)?;
        }
        self.size = size;
        Ok(())
    }

    /// Grow storage at `location` to hold `size` elements; never shrinks
    ///
    /// Sides outside `location` keep their capacity. If that capacity is now
    /// too small, their accessors fail until they are grown or moved into.
    ///
    /// # Errors
    ///
    /// Returns allocation errors
    pub fn ensure_size(&mut self, size: usize, location: Location) -> Result<()> {
        let location = location.resolve(self.allocated_or_host());
        for side in location.sides() {
            if self.capacity_at(side).map_or(true, |cap| cap < size) {
                self.allocate_side(size, side)?;
            }
        }
        self.size = size;
        Ok(())
    }

    /// Free storage at `location`
    ///
    /// Freeing device storage requires its device to be current.
    ///
    /// # Errors
    ///
    /// Returns `DeviceContext`/`NoActiveDevice` if the wrong device is current
    pub fn release(&mut self, location: Location) -> Result<()> {
        let location = location.resolve(self.allocated());
        if location.contains(Location::DEVICE) {
            if let Some(storage) = &self.device {
                let current = current_device()?;
                if current.ordinal() != storage.device.ordinal() {
                    return Err(StateError::DeviceContext {
                        ordinal: current.ordinal(),
                        reason: format!(
                            "{} lives on device {}",
                            self.name,
                            storage.device.ordinal()
                        ),
                    });
                }
            }
            self.device = None;
        }
        if location.contains(Location::HOST) {
            self.host = None;
        }
        self.valid = self.valid & self.allocated();
        if self.allocated().is_empty() {
            self.size = 0;
        }
        Ok(())
    }

    /// Blocking transfer of the valid `src` copy into `dst`
    ///
    /// Allocates (or grows) the destination if needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `src` holds no valid data
    pub fn move_to(&mut self, src: Location, dst: Location) -> Result<()> {
        let (src, dst) = (single_side(src)?, single_side(dst)?);
        if src == dst {
            return Ok(());
        }
        self.check_valid(src)?;
        let size = self.size;
        if self.capacity_at(dst).map_or(true, |cap| cap < size) {
            self.allocate_side(size, dst)?;
        }

        let name = &self.name;
        let missing = |side: Location| StateError::InvalidState(format!("{name} not allocated at {side}"));
        let host = self.host.as_mut().ok_or_else(|| missing(Location::HOST))?;
        let device = self.device.as_mut().ok_or_else(|| missing(Location::DEVICE))?;
        if device.device.is_faulted() {
            return Err(StateError::DeviceContext {
                ordinal: device.device.ordinal(),
                reason: "transfer on faulted device".to_string(),
            });
        }
        if src == Location::HOST {
            device.data[..size].copy_from_slice(&host[..size]);
        } else {
            host[..size].copy_from_slice(&device.data[..size]);
        }

        self.valid = self.valid | dst;
        trace!(array = %self.name, %src, %dst, size, "array moved");
        Ok(())
    }

    /// Apply `op` to every element at `location` on `stream`
    ///
    /// Only the written residencies are valid afterwards.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `location` is not allocated
    pub fn for_each<F>(&mut self, op: F, location: Location, stream: &Stream) -> Result<()>
    where
        F: Fn(&mut T) + Send + Sync,
    {
        let location = location.resolve(self.allocated());
        let mut written = Location::NONE;
        for side in location.sides() {
            let data = self.side_slice_mut(side)?;
            stream.issue(|| data.par_iter_mut().for_each(&op));
            written = written | side;
        }
        if !written.is_empty() {
            self.valid = written;
        }
        Ok(())
    }

    /// Fill every element at `location` with `value`
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `location` is not allocated
    pub fn fill(&mut self, value: T, location: Location, stream: &Stream) -> Result<()> {
        self.for_each(move |x| *x = value, location, stream)
    }

    /// Bulk copy of the valid `src` copy into a caller buffer
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `dst` is shorter than the array
    pub fn copy_to_slice(&self, dst: &mut [T], src: Location) -> Result<()> {
        let data = self.valid_slice(single_side(src)?)?;
        self.output_prefix(dst, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Elementwise parallel copy from the valid `src` copy into a caller
    /// buffer of possibly different element type
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `dst` is shorter than the array
    pub fn for_each_into<U, F>(
        &self,
        dst: &mut [U],
        op: F,
        src: Location,
        stream: &Stream,
    ) -> Result<()>
    where
        U: Send,
        F: Fn(&T, &mut U) + Send + Sync,
    {
        let data = self.valid_slice(single_side(src)?)?;
        let out = self.output_prefix(dst, data.len())?;
        stream.issue(|| {
            out.par_iter_mut()
                .zip(data.par_iter())
                .for_each(|(d, s)| op(s, d));
        });
        Ok(())
    }

    /// Valid host data
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the host copy is missing, stale or too small
    pub fn host_slice(&self) -> Result<&[T]> {
        self.valid_slice(Location::HOST)
    }

    /// Valid device data
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the device copy is missing, stale or too small
    pub fn device_slice(&self) -> Result<&[T]> {
        self.valid_slice(Location::DEVICE)
    }

    /// Host data for writing; the device copy becomes stale
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the host copy is missing or too small
    pub fn host_slice_mut(&mut self) -> Result<&mut [T]> {
        self.write_slice(Location::HOST)
    }

    /// Device data for writing; the host copy becomes stale
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the device copy is missing or too small
    pub fn device_slice_mut(&mut self) -> Result<&mut [T]> {
        self.write_slice(Location::DEVICE)
    }

    /// Valid data at `side`
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the copy is missing, stale or too small
    pub fn valid_slice(&self, side: Location) -> Result<&[T]> {
        self.check_valid(side)?;
        self.side_slice(side)
    }

    /// Writable data at `side`; other residencies become stale
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the copy is missing or too small
    pub fn write_slice(&mut self, side: Location) -> Result<&mut [T]> {
        self.side_slice(side)?;
        self.valid = side;
        self.side_slice_mut(side)
    }

    fn allocated_or_host(&self) -> Location {
        let allocated = self.allocated();
        if allocated.is_empty() {
            Location::HOST
        } else {
            allocated
        }
    }

    fn allocate_side(&mut self, capacity: usize, side: Location) -> Result<()> {
        let other_valid = !self.valid.without(side).is_empty();
        if side == Location::HOST {
            self.host = Some(host_vec(capacity)?);
        } else {
            self.device = None;
            self.device = Some(DeviceStorage::allocate(capacity)?);
        }
        self.valid = if other_valid {
            self.valid.without(side)
        } else {
            self.valid | side
        };
        Ok(())
    }

    fn check_valid(&self, side: Location) -> Result<()> {
        if self.valid.contains(side) {
            Ok(())
        } else {
            Err(StateError::InvalidState(format!(
                "{}: no valid data at {side} (valid: {})",
                self.name, self.valid
            )))
        }
    }

    fn side_slice(&self, side: Location) -> Result<&[T]> {
        let data = if side == Location::HOST {
            self.host.as_deref()
        } else {
            self.device.as_ref().map(|storage| storage.data.as_slice())
        };
        let data = data.ok_or_else(|| {
            StateError::InvalidState(format!("{} not allocated at {side}", self.name))
        })?;
        let capacity = data.len();
        data.get(..self.size).ok_or_else(|| {
            StateError::InvalidState(format!(
                "{}: capacity {capacity} at {side} is stale for size {}",
                self.name, self.size
            ))
        })
    }

    fn side_slice_mut(&mut self, side: Location) -> Result<&mut [T]> {
        let size = self.size;
        let name = &self.name;
        let data = if side == Location::HOST {
            self.host.as_deref_mut()
        } else {
            self.device.as_mut().map(|storage| storage.data.as_mut_slice())
        };
        let data = data.ok_or_else(|| {
            StateError::InvalidState(format!("{name} not allocated at {side}"))
        })?;
        let capacity = data.len();
        data.get_mut(..size).ok_or_else(|| {
            StateError::InvalidState(format!(
                "{name}: capacity {capacity} at {side} is stale for size {size}"
            ))
        })
    }

    fn output_prefix<'a, U>(&self, dst: &'a mut [U], len: usize) -> Result<&'a mut [U]> {
        let dst_len = dst.len();
        dst.get_mut(..len).ok_or_else(|| {
            StateError::InvalidArgument(format!(
                "{}: output buffer holds {dst_len} elements, need {len}",
                self.name
            ))
        })
    }
}

impl<T> fmt::Debug for Array1D<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array1D")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("host", &self.host.as_ref().map(Vec::len))
            .field(
                "device",
                &self
                    .device
                    .as_ref()
                    .map(|storage| (storage.device.ordinal(), storage.data.len())),
            )
            .field("valid", &self.valid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Platform, PlatformConfig};

    fn platform(n: usize) -> Arc<Platform> {
        Platform::new(&PlatformConfig::default().with_devices(n).with_device_memory(4096)).unwrap()
    }

    #[test]
    fn test_device_allocation_requires_context() {
        let mut array = Array1D::<u32>::new("labels");
        let err = array.allocate(4, Location::DEVICE).unwrap_err();
        assert_eq!(err, StateError::NoActiveDevice);

        // Host allocation needs no device
        array.allocate(4, Location::HOST).unwrap();
        assert_eq!(array.allocated(), Location::HOST);
        assert_eq!(array.host_slice().unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_allocation_charges_current_device() {
        let platform = platform(2);
        let mut array = Array1D::<u64>::new("counts");
        {
            let _guard = platform.activate(1).unwrap();
            array.allocate(8, Location::DEVICE).unwrap();
        }
        assert_eq!(array.device_ordinal(), Some(1));
        assert_eq!(platform.device(1).unwrap().allocated(), 64);
        assert_eq!(platform.device(0).unwrap().allocated(), 0);

        drop(array);
        assert_eq!(platform.device(1).unwrap().allocated(), 0);
    }

    #[test]
    fn test_move_round_trip_tracks_validity() {
        let platform = platform(1);
        let _guard = platform.activate(0).unwrap();

        let mut array = Array1D::from_vec("values", vec![1_u32, 2, 3]);
        assert_eq!(array.valid(), Location::HOST);
        assert!(array.device_slice().is_err());

        array.move_to(Location::HOST, Location::DEVICE).unwrap();
        assert_eq!(array.valid(), Location::ALL);
        assert_eq!(array.device_slice().unwrap(), &[1, 2, 3]);

        array.device_slice_mut().unwrap()[0] = 9;
        assert_eq!(array.valid(), Location::DEVICE);
        assert!(array.host_slice().is_err());

        array.move_to(Location::DEVICE, Location::HOST).unwrap();
        assert_eq!(array.host_slice().unwrap(), &[9, 2, 3]);
    }

    #[test]
    fn test_fill_and_for_each() {
        let platform = platform(1);
        let _guard = platform.activate(0).unwrap();
        let stream = platform.device(0).unwrap().stream();

        let mut array = Array1D::<u32>::new("frontier");
        array.allocate(5, Location::ALL).unwrap();
        array.fill(7, Location::DEVICE, &stream).unwrap();
        assert_eq!(array.valid(), Location::DEVICE);
        assert_eq!(array.device_slice().unwrap(), &[7; 5]);

        array.for_each(|x| *x += 1, Location::DEVICE, &stream).unwrap();
        assert_eq!(array.device_slice().unwrap(), &[8; 5]);
    }

    #[test]
    fn test_ensure_size_grows_without_shrinking() {
        let platform = platform(1);
        let _guard = platform.activate(0).unwrap();

        let mut array = Array1D::<u32>::new("visited");
        array.allocate(4, Location::DEVICE).unwrap();
        array.ensure_size(2, Location::DEVICE).unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array.capacity_at(Location::DEVICE), Some(4));

        array.ensure_size(6, Location::DEVICE).unwrap();
        assert_eq!(array.capacity_at(Location::DEVICE), Some(6));
        assert_eq!(platform.device(0).unwrap().allocated(), 24);
    }

    #[test]
    fn test_stale_capacity_is_not_readable() {
        let platform = platform(1);
        let _guard = platform.activate(0).unwrap();

        let mut array = Array1D::from_vec("ids", vec![1_u32, 2]);
        array.move_to(Location::HOST, Location::DEVICE).unwrap();
        array.ensure_size(3, Location::DEVICE).unwrap();
        assert!(array.host_slice().is_err());
    }

    #[test]
    fn test_out_of_memory() {
        let platform = platform(1);
        let _guard = platform.activate(0).unwrap();

        let mut array = Array1D::<u64>::new("big");
        let err = array.allocate(1024, Location::DEVICE).unwrap_err();
        assert!(matches!(err, StateError::OutOfMemory { ordinal: 0, .. }));
        assert_eq!(array.allocated(), Location::NONE);
    }

    #[test]
    fn test_release_requires_owning_device() {
        let platform = platform(2);
        let mut array = Array1D::<u32>::new("counts");
        {
            let _guard = platform.activate(0).unwrap();
            array.allocate(4, Location::ALL).unwrap();
        }
        {
            let _guard = platform.activate(1).unwrap();
            assert!(matches!(
                array.release(Location::DEVICE),
                Err(StateError::DeviceContext { .. })
            ));
        }
        let _guard = platform.activate(0).unwrap();
        array.release(Location::ALL).unwrap();
        array.release(Location::ALL).unwrap();
        assert_eq!(array.allocated(), Location::NONE);
        assert!(array.is_empty());
    }

    #[test]
    fn test_copy_out_paths_agree() {
        let platform = platform(1);
        let _guard = platform.activate(0).unwrap();
        let stream = platform.device(0).unwrap().stream();

        let mut array = Array1D::from_vec("result", vec![3_u64, 1, 4, 1, 5]);
        array.move_to(Location::HOST, Location::DEVICE).unwrap();

        let mut bulk = vec![0_u64; 5];
        array.copy_to_slice(&mut bulk, Location::DEVICE).unwrap();

        let mut elementwise = vec![0_u64; 5];
        array
            .for_each_into(&mut elementwise, |s, d| *d = *s, Location::HOST, &stream)
            .unwrap();

        assert_eq!(bulk, elementwise);
        assert!(array.copy_to_slice(&mut [0_u64; 2], Location::HOST).is_err());
    }
}
