//! MJPEG over HTTP multipart framing

use axum::http::{header, HeaderValue};
use bytes::{BufMut, Bytes, BytesMut};

/// Multipart boundary between frames
pub const BOUNDARY: &str = "frame";

/// Response content type of a video feed
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Headers that keep proxies and browsers from caching the feed
pub fn no_cache_headers() -> [(header::HeaderName, HeaderValue); 3] {
    [
        (
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ),
        (header::PRAGMA, HeaderValue::from_static("no-cache")),
        (header::EXPIRES, HeaderValue::from_static("0")),
    ]
}

/// Create MJPEG multipart frame bytes
pub fn create_mjpeg_part(jpeg_data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + jpeg_data.len());

    buf.put_slice(b"--");
    buf.put_slice(BOUNDARY.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Content-Type: image/jpeg\r\n");
    buf.put_slice(format!("Content-Length: {}\r\n", jpeg_data.len()).as_bytes());
    buf.put_slice(b"\r\n");

    buf.put_slice(jpeg_data);
    buf.put_slice(b"\r\n");

    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_layout() {
        let part = create_mjpeg_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let header = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n";
        assert!(part.starts_with(header));
        assert_eq!(&part[header.len()..], &[0xFF, 0xD8, 0xFF, 0xD9, b'\r', b'\n']);
    }

    #[test]
    fn test_content_type_names_boundary() {
        assert!(CONTENT_TYPE.ends_with(&format!("boundary={}", BOUNDARY)));
        let headers = no_cache_headers();
        assert_eq!(headers[0].1, "no-cache, no-store, must-revalidate");
    }
}
