//! Pixel format definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel formats a capture backend may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// MJPEG compressed format
    Mjpeg,
    /// YUYV 4:2:2 packed format
    Yuyv,
    /// RGB24 format (3 bytes per pixel)
    Rgb24,
    /// BGR24 format (3 bytes per pixel)
    Bgr24,
}

impl PixelFormat {
    /// Convert to V4L2 FourCC
    #[cfg(feature = "v4l2")]
    pub fn to_fourcc(&self) -> v4l::format::fourcc::FourCC {
        match self {
            PixelFormat::Mjpeg => v4l::format::fourcc::FourCC::new(b"MJPG"),
            PixelFormat::Yuyv => v4l::format::fourcc::FourCC::new(b"YUYV"),
            PixelFormat::Rgb24 => v4l::format::fourcc::FourCC::new(b"RGB3"),
            PixelFormat::Bgr24 => v4l::format::fourcc::FourCC::new(b"BGR3"),
        }
    }

    /// Try to convert from V4L2 FourCC
    #[cfg(feature = "v4l2")]
    pub fn from_fourcc(fourcc: v4l::format::fourcc::FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"MJPG" | b"JPEG" => Some(PixelFormat::Mjpeg),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"BGR3" => Some(PixelFormat::Bgr24),
            _ => None,
        }
    }

    /// Check if format is compressed (MJPEG)
    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Mjpeg)
    }

    /// Calculate expected frame size for a given resolution
    /// Returns None for compressed formats (variable size)
    pub fn frame_size(&self, resolution: Resolution) -> Option<usize> {
        let pixels = resolution.pixels() as usize;
        match self {
            PixelFormat::Mjpeg => None,
            PixelFormat::Yuyv => Some(pixels * 2),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(pixels * 3),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Mjpeg => "MJPEG",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Bgr24 => "BGR24",
        };
        write!(f, "{}", name)
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Get total pixels
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        let res = Resolution::new(320, 480);
        assert_eq!(PixelFormat::Rgb24.frame_size(res), Some(320 * 480 * 3));
        assert_eq!(PixelFormat::Yuyv.frame_size(res), Some(320 * 480 * 2));
        assert_eq!(PixelFormat::Mjpeg.frame_size(res), None);
    }

    #[test]
    fn test_serde_names() {
        let fmt: PixelFormat = serde_json::from_str("\"YUYV\"").unwrap();
        assert_eq!(fmt, PixelFormat::Yuyv);
        assert_eq!(serde_json::to_string(&PixelFormat::Rgb24).unwrap(), "\"RGB24\"");
    }
}
