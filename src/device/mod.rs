//! The shared capture device
//!
//! A single [`DeviceHandle`] wraps the active [`CaptureBackend`]. It is only
//! reachable through the [`ResourceLock`], which serializes the preview
//! stream, still captures and lifecycle transitions.

pub mod backend;
pub mod handle;
pub mod lock;
pub mod synthetic;

#[cfg(feature = "v4l2")]
pub mod v4l2;

#[cfg(test)]
pub mod mock;

pub use backend::{CaptureBackend, Controls, DeviceSettings, FocusMode};
pub use handle::{DeviceHandle, DeviceStats};
pub use lock::{DeviceGuard, ResourceLock};
pub use synthetic::SyntheticBackend;

#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Backend;

use crate::config::{BackendKind, DeviceConfig};
use crate::error::Result;

/// Build the backend selected in the configuration
pub fn create_backend(config: &DeviceConfig) -> Result<Box<dyn CaptureBackend>> {
    match config.backend {
        BackendKind::Synthetic => Ok(Box::new(SyntheticBackend::new())),
        #[cfg(feature = "v4l2")]
        BackendKind::V4l2 => Ok(Box::new(V4l2Backend::new(&config.path))),
        #[cfg(not(feature = "v4l2"))]
        BackendKind::V4l2 => Err(crate::error::AppError::Config(
            "V4L2 backend requested but camkeeper was built without the `v4l2` feature".into(),
        )),
    }
}
