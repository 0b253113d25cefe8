//! Frame types and JPEG encoding

pub mod format;
pub mod frame;
pub mod jpeg;

pub use format::{PixelFormat, Resolution};
pub use frame::{is_valid_jpeg, VideoFrame};
pub use jpeg::JpegEncoder;
