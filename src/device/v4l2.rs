//! V4L2 capture backend
//!
//! Memory-mapped capture through the `v4l` crate. Driver calls block, so each
//! operation runs on the blocking pool with the open session behind a mutex.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::Format;

use super::backend::{CaptureBackend, Controls, DeviceSettings, FocusMode};
use crate::error::DeviceError;
use crate::video::{PixelFormat, Resolution, VideoFrame};

const V4L2_CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const V4L2_CID_FOCUS_AUTO: u32 = 0x009a_090c;
const V4L2_CID_AUTO_FOCUS_START: u32 = 0x009a_091c;
const V4L2_CID_ANALOGUE_GAIN: u32 = 0x009e_0903;

/// `V4L2_EXPOSURE_AUTO` / `V4L2_EXPOSURE_MANUAL`
const EXPOSURE_AUTO: i64 = 0;
const EXPOSURE_MANUAL: i64 = 1;

/// Frames discarded after a format switch before a still is kept
const STILL_WARMUP_FRAMES: usize = 3;

struct Session {
    device: Device,
    stream: Option<Stream<'static>>,
    settings: DeviceSettings,
    /// Format actually negotiated with the driver
    format: PixelFormat,
    resolution: Resolution,
    sequence: u64,
}

impl Session {
    fn open(path: &Path, settings: &DeviceSettings) -> Result<Self, DeviceError> {
        let device = Device::with_path(path).map_err(|e| DeviceError::Open {
            device: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut session = Self {
            device,
            stream: None,
            settings: settings.clone(),
            format: settings.format,
            resolution: settings.resolution,
            sequence: 0,
        };
        session.start(settings.resolution, settings.buffer_count)?;
        Ok(session)
    }

    /// Negotiate a format and start a fresh mmap stream
    fn start(&mut self, resolution: Resolution, buffer_count: u32) -> Result<(), DeviceError> {
        self.stream = None;

        let requested = Format::new(resolution.width, resolution.height, self.settings.format.to_fourcc());
        let actual = self.device.set_format(&requested)?;
        let format = PixelFormat::from_fourcc(actual.fourcc).ok_or_else(|| {
            DeviceError::Configure(format!("driver selected unsupported format {}", actual.fourcc))
        })?;
        if actual.width != resolution.width || actual.height != resolution.height {
            warn!(
                "Driver adjusted resolution {} -> {}x{}",
                resolution, actual.width, actual.height
            );
        }
        self.format = format;
        self.resolution = Resolution::new(actual.width, actual.height);

        let stream = Stream::with_buffers(&self.device, Type::VideoCapture, buffer_count.max(1))?;
        self.stream = Some(stream);
        debug!("V4L2 stream started: {} {}", self.format, self.resolution);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<VideoFrame>, DeviceError> {
        let stream = self.stream.as_mut().ok_or(DeviceError::NotReady)?;
        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Ok(None);
        }
        self.sequence += 1;
        Ok(Some(VideoFrame::from_vec(
            buf[..used].to_vec(),
            self.resolution,
            self.format,
            self.sequence,
        )))
    }

    fn apply_controls(&self, controls: &Controls) {
        let mut wanted = vec![
            (
                V4L2_CID_FOCUS_AUTO,
                Value::Boolean(controls.focus == FocusMode::Continuous),
            ),
            (
                V4L2_CID_EXPOSURE_AUTO,
                Value::Integer(if controls.auto_exposure {
                    EXPOSURE_AUTO
                } else {
                    EXPOSURE_MANUAL
                }),
            ),
        ];
        if let Some(us) = controls.exposure_us {
            // V4L2 exposure is in 100us units
            wanted.push((V4L2_CID_EXPOSURE_ABSOLUTE, Value::Integer((us / 100).max(1) as i64)));
        }
        if let Some(gain) = controls.analogue_gain {
            wanted.push((V4L2_CID_ANALOGUE_GAIN, Value::Integer((gain * 100.0).round() as i64)));
        }
        if controls.trigger_focus {
            wanted.push((V4L2_CID_AUTO_FOCUS_START, Value::Integer(1)));
        }

        // Not every sensor exposes every control
        for (id, value) in wanted {
            if let Err(e) = self.device.set_control(Control { id, value }) {
                debug!("Control {:#x} not applied: {}", id, e);
            }
        }
    }
}

/// Capture backend for a V4L2 device node
pub struct V4l2Backend {
    path: PathBuf,
    session: Arc<Mutex<Option<Session>>>,
}

impl V4l2Backend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            session: Arc::new(Mutex::new(None)),
        }
    }

    async fn with_session<T, F>(&self, op: F) -> Result<T, DeviceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> Result<T, DeviceError> + Send + 'static,
    {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = session.lock();
            let session = guard.as_mut().ok_or(DeviceError::NotReady)?;
            op(session)
        })
        .await
        .map_err(|e| DeviceError::Capture(format!("capture task failed: {}", e)))?
    }
}

#[async_trait]
impl CaptureBackend for V4l2Backend {
    fn name(&self) -> &str {
        "v4l2"
    }

    async fn open(&mut self, settings: &DeviceSettings, controls: &Controls) -> Result<(), DeviceError> {
        let path = self.path.clone();
        let settings = settings.clone();
        let controls = controls.clone();
        let slot = self.session.clone();

        tokio::task::spawn_blocking(move || {
            let session = Session::open(&path, &settings)?;
            session.apply_controls(&controls);
            info!(
                "Opened {} ({} {})",
                path.display(),
                session.format,
                session.resolution
            );
            *slot.lock() = Some(session);
            Ok(())
        })
        .await
        .map_err(|e| DeviceError::Open {
            device: self.path.display().to_string(),
            reason: e.to_string(),
        })?
    }

    async fn set_controls(&mut self, controls: &Controls) -> Result<(), DeviceError> {
        let controls = controls.clone();
        self.with_session(move |session| {
            session.apply_controls(&controls);
            Ok(())
        })
        .await
    }

    async fn grab_frame(&mut self) -> Result<Option<VideoFrame>, DeviceError> {
        self.with_session(|session| session.next_frame()).await
    }

    async fn capture_still(&mut self, resolution: Resolution) -> Result<VideoFrame, DeviceError> {
        self.with_session(move |session| {
            let preview = session.settings.clone();
            session.start(resolution, 2)?;

            let mut result = Err(DeviceError::Capture("no still frame delivered".into()));
            for _ in 0..STILL_WARMUP_FRAMES {
                match session.next_frame() {
                    Ok(Some(frame)) if frame.is_complete() => result = Ok(frame),
                    Ok(_) => continue,
                    Err(e) => result = Err(e),
                }
            }

            // Always return to the preview configuration
            if let Err(e) = session.start(preview.resolution, preview.buffer_count) {
                warn!("Failed to restore preview format: {}", e);
            }
            result
        })
        .await
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        let slot = self.session.clone();
        tokio::task::spawn_blocking(move || {
            // Dropping the stream issues STREAMOFF and unmaps the buffers
            slot.lock().take();
        })
        .await
        .map_err(|e| DeviceError::Capture(format!("close task failed: {}", e)))
    }
}
