//! V4L2 capture devices as a frame source

use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder;
use super::frame::{DecodedFrame, PixelFormat};
use super::source::FrameSource;
use crate::error::CaptureError;
use crate::CaptureConfig;

const BUFFER_COUNT: u32 = 4;

/// Memory-mapped V4L2 capture, converted to RGBA per frame
pub struct V4l2Source {
    _device: Device,
    stream: Option<MmapStream<'static>>,
    path: String,
    width: u32,
    height: u32,
    format: PixelFormat,
    framerate: Option<f64>,
}

impl V4l2Source {
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let path = config.uri.clone();
        info!("Initializing V4L2 capture: {}", path);

        let device = Device::with_path(&path).map_err(|e| CaptureError::open(&path, e))?;

        let caps = device.query_caps().map_err(|e| CaptureError::open(&path, e))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::open(&path, "device doesn't support video capture"));
        }

        let mut fmt = device.format().map_err(|e| CaptureError::open(&path, e))?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
            other => {
                return Err(CaptureError::open(&path, format!("unsupported pixel format {other:?}")))
            }
        };
        let fmt = device.set_format(&fmt).map_err(|e| CaptureError::open(&path, e))?;
        if fmt.width != config.width || fmt.height != config.height {
            warn!(
                "Device chose {}x{} instead of {}x{}",
                fmt.width, fmt.height, config.width, config.height
            );
        }

        let framerate = match device.set_params(&Parameters::with_fps(config.fps.round() as u32)) {
            Ok(params) if params.interval.numerator > 0 => {
                Some(params.interval.denominator as f64 / params.interval.numerator as f64)
            }
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to set frame rate: {}", e);
                None
            }
        };

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| CaptureError::open(&path, e))?;
        info!("Capture stream started with {} buffers", BUFFER_COUNT);

        Ok(Self {
            _device: device,
            stream: Some(stream),
            path,
            width: fmt.width,
            height: fmt.height,
            format: config.format,
            framerate,
        })
    }
}

impl FrameSource for V4l2Source {
    #[instrument(skip(self), fields(device = %self.path))]
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, CaptureError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };

        // Blocking dequeue
        let (buf, meta) = stream.next().map_err(CaptureError::decode)?;
        let used = (meta.bytesused as usize).min(buf.len());
        let pixels = decoder::to_rgba(&buf[..used], self.width, self.height, self.format)?;

        Ok(Some(DecodedFrame::new(pixels, self.width, self.height, PixelFormat::Rgba)))
    }

    fn framerate(&self) -> Option<f64> {
        self.framerate
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Capture stream on {} stopped", self.path);
        }
    }
}
