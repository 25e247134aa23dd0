use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Frame data with zero-copy semantics.
///
/// Frames are moved, never cloned: capture thread, pacing buffer, publish
/// task and sink each own a frame in turn.
#[derive(Debug)]
pub struct Frame {
    /// Immutable pixel data
    pub data: Bytes,

    /// Frame metadata
    pub meta: FrameMetadata,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,

    /// Wall-clock capture time in milliseconds since the Unix epoch
    pub captured_at_ms: u64,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgba,
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for compressed ones.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgba => Some(4),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}

/// Mutable pixel buffer as produced by a frame source, before the capture
/// driver stamps it and freezes it into a [`Frame`].
#[derive(Debug)]
pub struct DecodedFrame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl DecodedFrame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            pixels,
            width,
            height,
            format,
        }
    }

    /// Expected byte length for packed formats.
    pub fn expected_len(&self) -> Option<usize> {
        self.format
            .bytes_per_pixel()
            .map(|bpp| self.width as usize * self.height as usize * bpp as usize)
    }
}

impl Frame {
    /// Freeze a decoded buffer. `Vec<u8>` to `Bytes` does not copy.
    pub fn from_decoded(decoded: DecodedFrame, sequence: u64, captured_at_ms: u64) -> Self {
        let stride = decoded.width * decoded.format.bytes_per_pixel().unwrap_or(1);
        Self {
            data: Bytes::from(decoded.pixels),
            meta: FrameMetadata {
                sequence,
                width: decoded.width,
                height: decoded.height,
                stride,
                format: decoded.format,
            },
            timestamp: Instant::now(),
            captured_at_ms,
        }
    }

    /// Age of the frame since capture.
    pub fn age(&self) -> std::time::Duration {
        self.timestamp.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_decoded_keeps_payload() {
        let pixels: Vec<u8> = (0..16).collect();
        let decoded = DecodedFrame::new(pixels.clone(), 2, 2, PixelFormat::Rgba);
        assert_eq!(decoded.expected_len(), Some(16));

        let frame = Frame::from_decoded(decoded, 7, 1_700_000_000_000);
        assert_eq!(&frame.data[..], &pixels[..]);
        assert_eq!(frame.meta.sequence, 7);
        assert_eq!(frame.meta.stride, 8);
        assert_eq!(frame.captured_at_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_compressed_formats_have_no_fixed_size() {
        let decoded = DecodedFrame::new(vec![0xff, 0xd8], 640, 480, PixelFormat::Mjpeg);
        assert_eq!(decoded.expected_len(), None);
    }
}
