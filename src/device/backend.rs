//! Capture backend abstraction

use async_trait::async_trait;

use crate::error::DeviceError;
use crate::video::{PixelFormat, Resolution, VideoFrame};

/// Preview stream configuration applied when a device is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    pub resolution: Resolution,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

/// Autofocus behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusMode {
    /// Continuously refocus while streaming
    Continuous,
    /// Focus once when triggered
    Auto,
}

/// Image controls applied to an open device
#[derive(Debug, Clone, PartialEq)]
pub struct Controls {
    pub focus: FocusMode,
    /// Start an autofocus cycle now (only meaningful with `FocusMode::Auto`)
    pub trigger_focus: bool,
    pub auto_exposure: bool,
    /// Fixed exposure time in microseconds, when auto exposure is off
    pub exposure_us: Option<u32>,
    pub analogue_gain: Option<f32>,
}

impl Controls {
    /// Controls for the live preview
    pub fn preview() -> Self {
        Self {
            focus: FocusMode::Continuous,
            trigger_focus: false,
            auto_exposure: true,
            exposure_us: None,
            analogue_gain: None,
        }
    }

    /// Controls for a still capture: single autofocus cycle, fixed exposure
    pub fn still(exposure_us: u32, analogue_gain: f32) -> Self {
        Self {
            focus: FocusMode::Auto,
            trigger_focus: true,
            auto_exposure: false,
            exposure_us: Some(exposure_us),
            analogue_gain: Some(analogue_gain),
        }
    }
}

/// Driver-facing interface of a capture device.
///
/// Every method is called with exclusive access to the device; callers
/// serialize through [`super::ResourceLock`].
#[async_trait]
pub trait CaptureBackend: Send {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Open the device, configure the preview stream and start it
    async fn open(&mut self, settings: &DeviceSettings, controls: &Controls)
        -> Result<(), DeviceError>;

    /// Apply image controls to the open device
    async fn set_controls(&mut self, controls: &Controls) -> Result<(), DeviceError>;

    /// Dequeue one preview frame.
    ///
    /// `Ok(None)` means the driver handed back an empty buffer.
    async fn grab_frame(&mut self) -> Result<Option<VideoFrame>, DeviceError>;

    /// Switch to a full-resolution still configuration, take one frame and
    /// return to the preview configuration
    async fn capture_still(&mut self, resolution: Resolution) -> Result<VideoFrame, DeviceError>;

    /// Stop streaming and release the device
    async fn close(&mut self) -> Result<(), DeviceError>;
}
