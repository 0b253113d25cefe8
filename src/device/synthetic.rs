//! Test-pattern backend used when no camera hardware is configured

use async_trait::async_trait;
use tracing::debug;

use super::backend::{CaptureBackend, Controls, DeviceSettings};
use crate::error::DeviceError;
use crate::video::{PixelFormat, Resolution, VideoFrame};

/// Generates a moving colour gradient in RGB24 or BGR24
#[derive(Default)]
pub struct SyntheticBackend {
    settings: Option<DeviceSettings>,
    sequence: u64,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn render(&mut self, resolution: Resolution, format: PixelFormat) -> VideoFrame {
        self.sequence += 1;
        let (w, h) = (resolution.width.max(1), resolution.height.max(1));
        let shift = ((self.sequence * 4) % w as u64) as u32;
        let b = (self.sequence % 256) as u8;

        let mut data = Vec::with_capacity(resolution.pixels() as usize * 3);
        for y in 0..resolution.height {
            for x in 0..resolution.width {
                let r = (((x + shift) % w) * 255 / w) as u8;
                let g = (y * 255 / h) as u8;
                match format {
                    PixelFormat::Bgr24 => data.extend_from_slice(&[b, g, r]),
                    _ => data.extend_from_slice(&[r, g, b]),
                }
            }
        }
        VideoFrame::from_vec(data, resolution, format, self.sequence)
    }
}

#[async_trait]
impl CaptureBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn open(&mut self, settings: &DeviceSettings, controls: &Controls) -> Result<(), DeviceError> {
        if !matches!(settings.format, PixelFormat::Rgb24 | PixelFormat::Bgr24) {
            return Err(DeviceError::Configure(format!(
                "synthetic backend produces RGB24/BGR24 only, not {}",
                settings.format
            )));
        }
        if settings.resolution.pixels() == 0 {
            return Err(DeviceError::Configure("zero resolution".into()));
        }
        self.settings = Some(settings.clone());
        debug!("Synthetic device opened with {:?}", controls);
        Ok(())
    }

    async fn set_controls(&mut self, controls: &Controls) -> Result<(), DeviceError> {
        debug!("Synthetic controls: {:?}", controls);
        Ok(())
    }

    async fn grab_frame(&mut self) -> Result<Option<VideoFrame>, DeviceError> {
        let settings = self.settings.clone().ok_or(DeviceError::NotReady)?;
        Ok(Some(self.render(settings.resolution, settings.format)))
    }

    async fn capture_still(&mut self, resolution: Resolution) -> Result<VideoFrame, DeviceError> {
        let settings = self.settings.clone().ok_or(DeviceError::NotReady)?;
        Ok(self.render(resolution, settings.format))
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.settings = None;
        Ok(())
    }
}
