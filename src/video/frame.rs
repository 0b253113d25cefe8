//! Video frame data structures

use bytes::Bytes;
use tokio::time::Instant;

use super::format::{PixelFormat, Resolution};

/// Minimum plausible size of a compressed frame
const MIN_JPEG_SIZE: usize = 125;

/// A captured frame with metadata
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Raw frame data
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Frame sequence number
    pub sequence: u64,
    /// Timestamp when frame was captured
    pub capture_ts: Instant,
}

impl VideoFrame {
    /// Create a new video frame
    pub fn new(data: Bytes, resolution: Resolution, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            resolution,
            format,
            sequence,
            capture_ts: Instant::now(),
        }
    }

    /// Create a frame from a Vec<u8>
    pub fn from_vec(
        data: Vec<u8>,
        resolution: Resolution,
        format: PixelFormat,
        sequence: u64,
    ) -> Self {
        Self::new(Bytes::from(data), resolution, format, sequence)
    }

    /// Get frame data as bytes slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get frame data as Bytes (cheap clone)
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if format is JPEG/MJPEG
    pub fn is_jpeg(&self) -> bool {
        self.format.is_compressed()
    }

    /// Whether the buffer holds a whole frame.
    ///
    /// Raw formats must fill the expected plane size; compressed frames must
    /// look like a JPEG image.
    pub fn is_complete(&self) -> bool {
        match self.format.frame_size(self.resolution) {
            Some(expected) => expected > 0 && self.data.len() >= expected,
            None => self.is_valid_jpeg(),
        }
    }

    /// Validate JPEG frame data
    pub fn is_valid_jpeg(&self) -> bool {
        is_valid_jpeg(&self.data)
    }
}

/// Check SOI marker and a plausible end marker.
///
/// Some UVC devices pad the end of a JPEG buffer, so `0xD900` and `0x0000`
/// are accepted as trailing bytes alongside a proper EOI.
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    if data.len() < MIN_JPEG_SIZE {
        return false;
    }
    if data[0] != 0xFF || data[1] != 0xD8 {
        return false;
    }
    let end = data.len();
    let end_marker = ((data[end - 2] as u16) << 8) | data[end - 1] as u16;
    matches!(end_marker, 0xFFD9 | 0xD900 | 0x0000)
}
