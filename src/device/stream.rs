//! Per-device execution streams
//!
//! Work issued on a stream runs in issue order. A failure inside issued work
//! is not returned to the issuer; it stays pending on the stream and is
//! reported by the next [`Stream::synchronize`].

use super::platform::Accelerator;
use crate::error::{Result, StateError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub(crate) struct StreamState {
    issued: AtomicU64,
    pending: Mutex<Option<StateError>>,
}

/// Handle to a device's execution stream
#[derive(Debug, Clone)]
pub struct Stream {
    device: Arc<Accelerator>,
}

impl Stream {
    pub(crate) fn new(device: Arc<Accelerator>) -> Self {
        Self { device }
    }

    /// Device this stream belongs to
    #[must_use]
    pub fn device(&self) -> &Arc<Accelerator> {
        &self.device
    }

    /// Ordinal of the owning device
    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.device.ordinal()
    }

    /// Number of operations issued so far
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.device.stream_state.issued.load(Ordering::Acquire)
    }

    /// Issue work on the stream
    ///
    /// On a faulted device the work is dropped and a synchronization error
    /// is left pending.
    pub fn issue<F: FnOnce()>(&self, op: F) {
        let state = &self.device.stream_state;
        state.issued.fetch_add(1, Ordering::AcqRel);
        if self.device.is_faulted() {
            self.record(StateError::Synchronization {
                ordinal: self.ordinal(),
                message: "kernel launched on faulted device".to_string(),
            });
            return;
        }
        op();
    }

    /// Leave `error` pending; the first pending error is kept
    pub fn record(&self, error: StateError) {
        let mut pending = self.device.stream_state.pending.lock();
        if pending.is_none() {
            warn!(gpu = self.ordinal(), %error, "stream error pending");
            *pending = Some(error);
        }
    }

    /// Block until issued work completes and report any pending failure
    ///
    /// # Errors
    ///
    /// Returns the first error recorded since the last synchronization
    pub fn synchronize(&self) -> Result<()> {
        let pending = self.device.stream_state.pending.lock().take();
        match pending {
            Some(error) => Err(error),
            None => {
                debug!(gpu = self.ordinal(), issued = self.issued(), "stream synchronized");
                Ok(())
            }
        }
    }
}
