//! Capture thread: pulls frames from a blocking source and feeds the pacing buffer

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use metrics::counter;
use tokio::sync::watch;
use tracing::{error, info, instrument, trace, warn};

use super::frame::{DecodedFrame, Frame, PixelFormat};
use super::overlay;
use super::source::FrameSource;
use crate::error::CaptureError;
use crate::pipeline::{Pacer, PacingBuffer, ShutdownListener};
use crate::CaptureConfig;

/// Knobs for the capture loop that do not belong to any particular source.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Used when the source cannot report its own frame rate
    pub fallback_fps: f64,
    /// Burn the capture time into each frame
    pub overlay_timestamp: bool,
    /// Pin the capture thread to this core
    pub cpu_core: Option<usize>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            fallback_fps: 30.0,
            overlay_timestamp: true,
            cpu_core: None,
        }
    }
}

impl From<&CaptureConfig> for CaptureSettings {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            fallback_fps: config.fps,
            overlay_timestamp: config.overlay_timestamp,
            cpu_core: config.cpu_core,
        }
    }
}

/// Why the capture loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEnd {
    EndOfStream,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    pub frames_captured: u64,
    pub frames_evicted: u64,
    pub end: CaptureEnd,
}

/// Drives a [`FrameSource`] on its own thread.
pub struct CaptureDriver<S> {
    source: S,
    buffer: Arc<PacingBuffer>,
    shutdown: ShutdownListener,
    framerate: watch::Sender<Option<f64>>,
    settings: CaptureSettings,
}

impl<S: FrameSource + 'static> CaptureDriver<S> {
    pub fn new(
        source: S,
        buffer: Arc<PacingBuffer>,
        shutdown: ShutdownListener,
        settings: CaptureSettings,
    ) -> Self {
        let (framerate, _) = watch::channel(None);
        Self {
            source,
            buffer,
            shutdown,
            framerate,
            settings,
        }
    }

    /// Receiver for the one-time frame rate announcement.
    pub fn framerate(&self) -> watch::Receiver<Option<f64>> {
        self.framerate.subscribe()
    }

    /// Run the capture loop on a dedicated thread.
    pub fn spawn(self) -> Result<CaptureHandle, CaptureError> {
        let thread = thread::Builder::new()
            .name("capture".into())
            .spawn(move || self.run())?;
        Ok(CaptureHandle { thread })
    }

    /// Run the capture loop on the calling thread until end of stream, stop or error.
    /// The source is closed on every exit path.
    #[instrument(skip(self), name = "capture")]
    pub fn run(mut self) -> Result<CaptureReport, CaptureError> {
        if let Some(core) = self.settings.cpu_core {
            if core_affinity::set_for_current(core_affinity::CoreId { id: core }) {
                info!("Capture thread pinned to core {}", core);
            } else {
                warn!("Failed to pin capture thread to core {}", core);
            }
        }

        let mut pacer: Option<Pacer> = None;
        let mut captured = 0u64;
        let mut evicted = 0u64;

        let outcome = loop {
            if self.shutdown.is_triggered() {
                break Ok(CaptureEnd::Stopped);
            }
            if pacer.is_none() {
                pacer = self.source.framerate().and_then(|fps| self.announce(fps));
            }

            let start = Instant::now();
            let decoded = match self.source.next_frame() {
                Ok(Some(decoded)) => decoded,
                Ok(None) => break Ok(CaptureEnd::EndOfStream),
                Err(e) => break Err(e),
            };

            let frame = match self.stamp(decoded, captured + 1) {
                Ok(frame) => frame,
                Err(e) => break Err(e),
            };
            captured += 1;
            trace!(sequence = captured, timestamp_ms = frame.captured_at_ms, "Captured frame");
            counter!("roomcast_frames_captured_total").increment(1);

            if self.buffer.push(frame).is_some() {
                evicted += 1;
                counter!("roomcast_frames_evicted_total").increment(1);
            }

            if pacer.is_none() {
                let fps = self.source.framerate().unwrap_or(self.settings.fallback_fps);
                pacer = self
                    .announce(fps)
                    .or_else(|| self.announce(self.settings.fallback_fps));
                if pacer.is_none() {
                    break Err(CaptureError::decode(format!("invalid frame rate {fps}")));
                }
            }

            let sleep = pacer
                .as_mut()
                .map(|p| p.remaining_after(start.elapsed()))
                .unwrap_or_default();
            if !sleep.is_zero() {
                thread::sleep(sleep);
            }
            trace!(fps = 1.0 / start.elapsed().as_secs_f64(), "Capture loop rate");
        };

        self.source.close();

        match outcome {
            Ok(end) => {
                info!(frames = captured, evicted, ?end, "Capture finished");
                Ok(CaptureReport {
                    frames_captured: captured,
                    frames_evicted: evicted,
                    end,
                })
            }
            Err(e) => {
                error!(frames = captured, "Capture failed: {}", e);
                Err(e)
            }
        }
    }

    fn announce(&self, fps: f64) -> Option<Pacer> {
        let pacer = Pacer::from_framerate(fps)?;
        self.framerate.send_replace(Some(fps));
        info!(
            "Frame rate {:.3} fps, buffer holds {:.3}s of video",
            fps,
            self.buffer.capacity() as f64 / fps
        );
        Some(pacer)
    }

    fn stamp(&self, mut decoded: DecodedFrame, sequence: u64) -> Result<Frame, CaptureError> {
        if decoded.format != PixelFormat::Rgba {
            return Err(CaptureError::decode(format!(
                "source produced {:?}, expected Rgba",
                decoded.format
            )));
        }
        let expected = decoded.expected_len().unwrap_or_default();
        if decoded.pixels.len() != expected {
            return Err(CaptureError::decode(format!(
                "frame buffer should be {} bytes ({}x{} RGBA) but is {}",
                expected,
                decoded.width,
                decoded.height,
                decoded.pixels.len()
            )));
        }

        let captured_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        if self.settings.overlay_timestamp {
            let (w, h) = (decoded.width, decoded.height);
            overlay::stamp_timestamp(&mut decoded.pixels, w, h, captured_at_ms);
        }

        Ok(Frame::from_decoded(decoded, sequence, captured_at_ms))
    }
}

/// Handle to a running capture thread.
pub struct CaptureHandle {
    thread: JoinHandle<Result<CaptureReport, CaptureError>>,
}

impl CaptureHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the capture thread to exit.
    pub fn join(self) -> Result<CaptureReport, CaptureError> {
        self.thread.join().unwrap_or_else(|_| {
            error!("Capture thread panicked");
            Err(CaptureError::Panicked)
        })
    }
}
