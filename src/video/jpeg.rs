//! JPEG encoder for raw capture frames
//!
//! Raw frames (RGB24, BGR24, YUYV) are converted to packed RGB and encoded
//! with the `image` crate. MJPEG frames from the device are already JPEG and
//! pass through after marker validation.

use std::io::Cursor;

use bytes::Bytes;

use super::format::PixelFormat;
use super::frame::VideoFrame;
use crate::error::{AppError, Result};

/// Reusable JPEG encoder
///
/// Keeps its RGB scratch buffer between frames so a streaming session does not
/// reallocate per frame.
pub struct JpegEncoder {
    quality: u8,
    rgb: Vec<u8>,
}

impl JpegEncoder {
    /// Create an encoder with the given quality (clamped to 1-100)
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            rgb: Vec::new(),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode a frame to JPEG
    pub fn encode(&mut self, frame: &VideoFrame) -> Result<Bytes> {
        let width = frame.resolution.width;
        let height = frame.resolution.height;

        let Some(expected) = frame.format.frame_size(frame.resolution) else {
            // Compressed input is already JPEG
            if !frame.is_valid_jpeg() {
                return Err(AppError::Encode("corrupt MJPEG frame".into()));
            }
            return Ok(frame.data_bytes());
        };
        if expected == 0 || frame.len() < expected {
            return Err(AppError::Encode(format!(
                "incomplete {} frame: {} bytes, expected {} for {}",
                frame.format,
                frame.len(),
                expected,
                frame.resolution
            )));
        }

        let raw = &frame.data()[..expected];
        let rgb: &[u8] = match frame.format {
            PixelFormat::Bgr24 => {
                bgr_to_rgb(raw, &mut self.rgb);
                &self.rgb
            }
            PixelFormat::Yuyv => {
                yuyv_to_rgb(raw, &mut self.rgb);
                &self.rgb
            }
            PixelFormat::Rgb24 | PixelFormat::Mjpeg => raw,
        };

        let mut out = Cursor::new(Vec::with_capacity(expected / 8));
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(rgb, width, height, image::ExtendedColorType::Rgb8)
            .map_err(|e| AppError::Encode(format!("JPEG encoding failed: {}", e)))?;

        Ok(Bytes::from(out.into_inner()))
    }
}

fn bgr_to_rgb(src: &[u8], dst: &mut Vec<u8>) {
    dst.clear();
    dst.reserve(src.len());
    for px in src.chunks_exact(3) {
        dst.extend_from_slice(&[px[2], px[1], px[0]]);
    }
}

/// YUYV 4:2:2 to RGB24, BT.601 limited range
fn yuyv_to_rgb(src: &[u8], dst: &mut Vec<u8>) {
    dst.clear();
    dst.reserve(src.len() / 2 * 3);
    for chunk in src.chunks_exact(4) {
        let u = chunk[1] as i32 - 128;
        let v = chunk[3] as i32 - 128;
        for y in [chunk[0], chunk[2]] {
            let c = 298 * (y as i32 - 16);
            dst.extend_from_slice(&[
                clamp_u8((c + 409 * v + 128) >> 8),
                clamp_u8((c - 100 * u - 208 * v + 128) >> 8),
                clamp_u8((c + 516 * u + 128) >> 8),
            ]);
        }
    }
}

#[inline]
fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{is_valid_jpeg, Resolution};

    fn gradient(res: Resolution) -> Vec<u8> {
        let mut data = Vec::with_capacity(res.pixels() as usize * 3);
        for y in 0..res.height {
            for x in 0..res.width {
                data.extend_from_slice(&[(x * 8) as u8, (y * 8) as u8, 128]);
            }
        }
        data
    }

    #[test]
    fn test_encode_rgb() {
        let res = Resolution::new(16, 16);
        let frame = VideoFrame::from_vec(gradient(res), res, PixelFormat::Rgb24, 0);
        let jpeg = JpegEncoder::new(50).encode(&frame).unwrap();
        assert!(is_valid_jpeg(&jpeg));
    }

    #[test]
    fn test_encode_yuyv() {
        let res = Resolution::new(16, 8);
        // Mid-grey YUYV
        let data = [128u8, 128, 128, 128].repeat(res.pixels() as usize / 2);
        let frame = VideoFrame::from_vec(data, res, PixelFormat::Yuyv, 0);
        let jpeg = JpegEncoder::new(80).encode(&frame).unwrap();
        assert!(is_valid_jpeg(&jpeg));
    }

    #[test]
    fn test_yuyv_conversion_values() {
        let mut rgb = Vec::new();
        // Black (Y=16) and white (Y=235) with neutral chroma
        yuyv_to_rgb(&[16, 128, 235, 128], &mut rgb);
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_bgr_swap() {
        let mut rgb = Vec::new();
        bgr_to_rgb(&[1, 2, 3, 4, 5, 6], &mut rgb);
        assert_eq!(rgb, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_rejects_truncated_frame() {
        let res = Resolution::new(16, 16);
        let frame = VideoFrame::from_vec(vec![0; 100], res, PixelFormat::Rgb24, 0);
        assert!(matches!(
            JpegEncoder::new(50).encode(&frame),
            Err(AppError::Encode(_))
        ));
    }

    #[test]
    fn test_mjpeg_passthrough() {
        let res = Resolution::new(16, 16);
        let frame = VideoFrame::from_vec(gradient(res), res, PixelFormat::Rgb24, 0);
        let jpeg = JpegEncoder::new(50).encode(&frame).unwrap();

        let mjpeg = VideoFrame::new(jpeg.clone(), res, PixelFormat::Mjpeg, 1);
        assert_eq!(JpegEncoder::new(90).encode(&mjpeg).unwrap(), jpeg);

        let broken = VideoFrame::from_vec(vec![0; 300], res, PixelFormat::Mjpeg, 2);
        assert!(JpegEncoder::new(90).encode(&broken).is_err());
    }

    #[test]
    fn test_quality_clamped() {
        assert_eq!(JpegEncoder::new(0).quality(), 1);
        assert_eq!(JpegEncoder::new(200).quality(), 100);
    }
}
