//! Frame source abstraction and the synthetic test-pattern source

use tracing::info;

use super::frame::{DecodedFrame, PixelFormat};
use crate::error::CaptureError;

/// A blocking, sequential producer of decoded frames.
///
/// `next_frame` may block for as long as the backend needs to decode a frame.
/// `Ok(None)` signals end of stream. Any error is fatal to the capture loop.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, CaptureError>;

    /// Native frame rate of the source, once known.
    fn framerate(&self) -> Option<f64>;

    /// Release the underlying handle. Must be safe to call more than once.
    fn close(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, CaptureError> {
        (**self).next_frame()
    }

    fn framerate(&self) -> Option<f64> {
        (**self).framerate()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Solid-color frames cycling through the hue wheel.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    fps: f64,
    hue: f64,
    produced: u64,
    limit: Option<u64>,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            hue: 0.0,
            produced: 0,
            limit: None,
            closed: false,
        }
    }

    /// Stop after `limit` frames instead of running forever.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn frames_produced(&self) -> u64 {
        self.produced
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, CaptureError> {
        if self.closed || self.limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }

        let [r, g, b] = hsv_to_rgb(self.hue);
        let pixels = [r, g, b, 255].repeat(self.width as usize * self.height as usize);

        // one full turn of the wheel every three seconds
        self.hue = (self.hue + 1.0 / (3.0 * self.fps)) % 1.0;
        self.produced += 1;

        Ok(Some(DecodedFrame::new(pixels, self.width, self.height, PixelFormat::Rgba)))
    }

    fn framerate(&self) -> Option<f64> {
        Some(self.fps)
    }

    fn close(&mut self) {
        if !self.closed {
            info!(frames = self.produced, "Synthetic source closed");
            self.closed = true;
        }
    }
}

/// Fully saturated, full value HSV to RGB. `hue` in `[0, 1)`.
fn hsv_to_rgb(hue: f64) -> [u8; 3] {
    let h = (hue * 6.0) % 6.0;
    let sector = h.floor() as u8;
    let f = h - h.floor();
    let (up, down) = ((f * 255.0).round() as u8, ((1.0 - f) * 255.0).round() as u8);
    match sector {
        0 => [255, up, 0],
        1 => [down, 255, 0],
        2 => [0, 255, up],
        3 => [0, down, 255],
        4 => [up, 0, 255],
        _ => [255, 0, down],
    }
}
