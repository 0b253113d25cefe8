//! Scriptable capture backend for tests

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::backend::{CaptureBackend, Controls, DeviceSettings};
use crate::error::DeviceError;
use crate::video::{PixelFormat, Resolution, VideoFrame};

/// Shared counters and failure switches of a [`MockBackend`]
#[derive(Default)]
pub struct MockProbe {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub grabs: AtomicUsize,
    pub stills: AtomicUsize,
    pub fail_open: AtomicBool,
    /// Number of upcoming grabs that fail with an error
    pub fail_grabs: AtomicU32,
    /// Every grab returns an empty buffer
    pub empty_frames: AtomicBool,
    pub fail_still: AtomicBool,
    /// Simulated driver latency per grab, in milliseconds
    pub grab_delay_ms: AtomicU64,
    pub last_controls: Mutex<Option<Controls>>,
}

pub struct MockBackend {
    probe: Arc<MockProbe>,
    settings: Option<DeviceSettings>,
    sequence: u64,
}

impl MockBackend {
    pub fn new() -> (Self, Arc<MockProbe>) {
        let probe = Arc::new(MockProbe::default());
        (
            Self {
                probe: probe.clone(),
                settings: None,
                sequence: 0,
            },
            probe,
        )
    }

    fn frame(&mut self, resolution: Resolution) -> VideoFrame {
        self.sequence += 1;
        let len = resolution.pixels() as usize * 3;
        VideoFrame::from_vec(vec![0x80; len], resolution, PixelFormat::Rgb24, self.sequence)
    }
}

#[async_trait]
impl CaptureBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&mut self, settings: &DeviceSettings, controls: &Controls) -> Result<(), DeviceError> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        if self.probe.fail_open.load(Ordering::SeqCst) {
            return Err(DeviceError::Open {
                device: "mock".into(),
                reason: "scripted failure".into(),
            });
        }
        *self.probe.last_controls.lock() = Some(controls.clone());
        self.settings = Some(settings.clone());
        Ok(())
    }

    async fn set_controls(&mut self, controls: &Controls) -> Result<(), DeviceError> {
        *self.probe.last_controls.lock() = Some(controls.clone());
        Ok(())
    }

    async fn grab_frame(&mut self) -> Result<Option<VideoFrame>, DeviceError> {
        self.probe.grabs.fetch_add(1, Ordering::SeqCst);
        let delay = self.probe.grab_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let settings = self.settings.clone().ok_or(DeviceError::NotReady)?;

        let pending = self.probe.fail_grabs.load(Ordering::SeqCst);
        if pending > 0 {
            self.probe.fail_grabs.store(pending - 1, Ordering::SeqCst);
            return Err(DeviceError::Capture("scripted failure".into()));
        }
        if self.probe.empty_frames.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(self.frame(settings.resolution)))
    }

    async fn capture_still(&mut self, resolution: Resolution) -> Result<VideoFrame, DeviceError> {
        self.probe.stills.fetch_add(1, Ordering::SeqCst);
        if self.settings.is_none() {
            return Err(DeviceError::NotReady);
        }
        if self.probe.fail_still.load(Ordering::SeqCst) {
            return Err(DeviceError::Capture("still mode unavailable".into()));
        }
        Ok(self.frame(resolution))
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.settings = None;
        Ok(())
    }
}
