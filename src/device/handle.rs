//! Lifecycle wrapper around a capture backend

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::backend::{CaptureBackend, Controls, DeviceSettings};
use crate::error::DeviceError;
use crate::video::{Resolution, VideoFrame};

/// Lifecycle counters, exposed for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub initializations: u64,
    pub init_failures: u64,
    pub shutdowns: u64,
}

/// The single capture device.
///
/// Tracks whether the backend is open and re-creates it on demand. Only ever
/// reached through a [`super::DeviceGuard`], so every method here runs with
/// exclusive access.
pub struct DeviceHandle {
    backend: Box<dyn CaptureBackend>,
    settings: DeviceSettings,
    settle: Duration,
    initialized: bool,
    stats: DeviceStats,
}

impl DeviceHandle {
    pub fn new(backend: Box<dyn CaptureBackend>, settings: DeviceSettings, settle: Duration) -> Self {
        Self {
            backend,
            settings,
            settle,
            initialized: false,
            stats: DeviceStats::default(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Make sure the device is open and producing frames.
    ///
    /// An initialized device is probed with a single frame grab; a failed
    /// probe tears it down and re-initializes. Returns whether the device is
    /// ready afterwards. Failures are logged, never propagated.
    pub async fn ensure_ready(&mut self) -> bool {
        if self.initialized {
            match self.backend.grab_frame().await {
                Ok(_) => return true,
                Err(e) => {
                    warn!("Device probe failed, re-initializing: {}", e);
                    self.teardown().await;
                }
            }
        }
        self.initialize().await
    }

    async fn initialize(&mut self) -> bool {
        debug!(
            "Opening {} device: {} {}",
            self.backend.name(),
            self.settings.resolution,
            self.settings.format
        );
        match self.backend.open(&self.settings, &Controls::preview()).await {
            Ok(()) => {
                tokio::time::sleep(self.settle).await;
                self.initialized = true;
                self.stats.initializations += 1;
                info!(
                    "Device initialized ({} {} @ {}, {} buffers)",
                    self.backend.name(),
                    self.settings.format,
                    self.settings.resolution,
                    self.settings.buffer_count
                );
                true
            }
            Err(e) => {
                error!("Device initialization failed: {}", e);
                if let Err(e) = self.backend.close().await {
                    debug!("Cleanup after failed open: {}", e);
                }
                self.initialized = false;
                self.stats.init_failures += 1;
                false
            }
        }
    }

    /// Stop and release the device. No-op when it is not initialized.
    pub async fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        self.teardown().await;
        self.stats.shutdowns += 1;
        info!("Device shut down");
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.backend.close().await {
            warn!("Error while closing device: {}", e);
        }
        self.initialized = false;
    }

    /// Grab one preview frame from an initialized device
    pub async fn grab_frame(&mut self) -> Result<Option<VideoFrame>, DeviceError> {
        if !self.initialized {
            return Err(DeviceError::NotReady);
        }
        self.backend.grab_frame().await
    }

    pub async fn set_controls(&mut self, controls: &Controls) -> Result<(), DeviceError> {
        if !self.initialized {
            return Err(DeviceError::NotReady);
        }
        self.backend.set_controls(controls).await
    }

    /// Take a full-resolution still; the preview configuration is restored
    /// by the backend afterwards
    pub async fn capture_still(&mut self, resolution: Resolution) -> Result<VideoFrame, DeviceError> {
        if !self.initialized {
            return Err(DeviceError::NotReady);
        }
        self.backend.capture_still(resolution).await
    }
}
