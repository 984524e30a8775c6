//! `multipart/x-mixed-replace` framing for MJPEG streams.
//!
//! Browsers render a response of this type by replacing the displayed image
//! with each new part, so an `<img src="/stream">` is enough to watch it.
//! Each part looks like:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <N>\r\n
//! \r\n
//! <N bytes of JPEG data>\r\n
//! ```

/// Boundary marker separating parts.
pub const BOUNDARY: &str = "frame";

/// Response content type declaring the boundary.
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Content type of every part.
pub const PART_CONTENT_TYPE: &str = "image/jpeg";

/// Bytes closing each part.
pub const PART_TERMINATOR: &[u8] = b"\r\n";

/// Build the header for a part carrying `len` payload bytes.
///
/// The length must come from the frame about to be sent; JPEG sizes vary
/// from frame to frame.
pub fn part_header(len: usize) -> String {
    format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY, PART_CONTENT_TYPE, len
    )
}
