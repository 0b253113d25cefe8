//! Exclusive, time-bounded access to the capture device

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::handle::DeviceHandle;
use crate::error::{AppError, Result};

/// Holds longer than this are reported at debug level
const LONG_HOLD: Duration = Duration::from_secs(1);

/// Mutual exclusion over the [`DeviceHandle`].
///
/// Every acquisition is bounded by a timeout; giving up yields
/// [`AppError::ResourceBusy`] naming the current holder. Waiters are served
/// in FIFO order.
#[derive(Clone)]
pub struct ResourceLock {
    device: Arc<Mutex<DeviceHandle>>,
    holder: Arc<SyncMutex<Option<&'static str>>>,
    timeout: Duration,
}

/// Exclusive access to the device; released on drop
pub struct DeviceGuard {
    guard: OwnedMutexGuard<DeviceHandle>,
    holder: Arc<SyncMutex<Option<&'static str>>>,
    name: &'static str,
    acquired_at: Instant,
}

impl ResourceLock {
    pub fn new(device: DeviceHandle, timeout: Duration) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            holder: Arc::new(SyncMutex::new(None)),
            timeout,
        }
    }

    /// Configured acquisition timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire with the configured timeout
    pub async fn acquire(&self, name: &'static str) -> Result<DeviceGuard> {
        self.acquire_within(name, self.timeout).await
    }

    /// Acquire, giving up after `timeout`
    pub async fn acquire_within(&self, name: &'static str, timeout: Duration) -> Result<DeviceGuard> {
        match tokio::time::timeout(timeout, self.device.clone().lock_owned()).await {
            Ok(guard) => Ok(self.wrap(guard, name)),
            Err(_) => {
                let holder = (*self.holder.lock()).unwrap_or("unknown");
                debug!("{} gave up waiting for device held by {}", name, holder);
                Err(AppError::ResourceBusy { holder, timeout })
            }
        }
    }

    /// Acquire only if the device is free right now
    pub fn try_acquire(&self, name: &'static str) -> Option<DeviceGuard> {
        self.device
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| self.wrap(guard, name))
    }

    /// Name of the current holder, if any
    pub fn holder(&self) -> Option<&'static str> {
        *self.holder.lock()
    }

    fn wrap(&self, guard: OwnedMutexGuard<DeviceHandle>, name: &'static str) -> DeviceGuard {
        *self.holder.lock() = Some(name);
        trace!("Device acquired by {}", name);
        DeviceGuard {
            guard,
            holder: self.holder.clone(),
            name,
            acquired_at: Instant::now(),
        }
    }
}

impl Deref for DeviceGuard {
    type Target = DeviceHandle;

    fn deref(&self) -> &DeviceHandle {
        &self.guard
    }
}

impl DerefMut for DeviceGuard {
    fn deref_mut(&mut self) -> &mut DeviceHandle {
        &mut self.guard
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        // Runs before the owned guard field releases the mutex
        *self.holder.lock() = None;
        let held = self.acquired_at.elapsed();
        if held > LONG_HOLD {
            debug!("Device released by {} after {:?}", self.name, held);
        } else {
            trace!("Device released by {} after {:?}", self.name, held);
        }
    }
}
