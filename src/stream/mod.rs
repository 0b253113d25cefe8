//! Live video streaming
//!
//! - `mjpeg` - multipart framing and response headers
//! - `session` - per-feed capture loop with failure budget and pacing

pub mod mjpeg;
pub mod session;

pub use mjpeg::{create_mjpeg_part, no_cache_headers, CONTENT_TYPE};
pub use session::StreamingPipeline;
