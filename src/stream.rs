//! Multipart JPEG streaming.
//!
//! Each processed frame becomes one part of a `multipart/x-mixed-replace`
//! body: the boundary line, a `Content-Type: image/jpeg` header, a blank
//! line, the JPEG bytes and a trailing CRLF.

use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};
use crossbeam::channel::Receiver;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;

/// Multipart boundary marker.
pub const BOUNDARY: &str = "frame";

/// `Content-Type` of the streaming response.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// JPEG-encode an RGB image.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
    Ok(Bytes::from(buffer))
}

/// Wrap one JPEG image as a multipart segment.
pub fn multipart_segment(jpeg: &[u8]) -> Bytes {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut segment = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    segment.put_slice(header.as_bytes());
    segment.put_slice(jpeg);
    segment.put_slice(b"\r\n");
    segment.freeze()
}

/// One client's view of the live stream.
///
/// Yields multipart segments as the monitor produces them, starting with
/// the next frame after subscription. Iteration ends once the monitor stops.
/// Dropping the stream unsubscribes it.
pub struct FrameStream {
    segments: Receiver<Bytes>,
}

impl FrameStream {
    pub(crate) fn new(segments: Receiver<Bytes>) -> Self {
        Self { segments }
    }
}

impl Iterator for FrameStream {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.segments.recv().ok()
    }
}
