//! GStreamer-based video file decoding

use color_eyre::eyre::eyre;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use super::frame::{DecodedFrame, PixelFormat};
use super::source::FrameSource;
use crate::error::CaptureError;
use crate::CaptureConfig;

/// Decodes a local video file to RGBA frames scaled to the configured size.
pub struct GstFileSource {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    uri: String,
    width: u32,
    height: u32,
    framerate: Option<f64>,
    closed: bool,
}

impl GstFileSource {
    /// Build the decode pipeline and preroll it so the native frame rate is known.
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let uri = config.uri.clone();
        gst::init()
            .map_err(|e| CaptureError::open(&uri, format!("failed to initialize GStreamer: {e}")))?;

        let pipeline_str = Self::build_pipeline_string(config);
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| CaptureError::open(&uri, e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CaptureError::open(&uri, "failed to create pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| CaptureError::open(&uri, "failed to find appsink element"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::open(&uri, "failed to cast to AppSink"))?;

        // Pull-driven: the capture loop paces, so the sink must not sync to the clock
        // and must never drop decoded buffers on its own.
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 2u32);
        appsink.set_property("drop", false);
        appsink.set_property("sync", false);

        let mut source = Self {
            pipeline,
            appsink,
            uri,
            width: config.width,
            height: config.height,
            framerate: None,
            closed: false,
        };
        source.start().map_err(|e| CaptureError::open(&source.uri, e))?;
        Ok(source)
    }

    fn build_pipeline_string(config: &CaptureConfig) -> String {
        format!(
            "filesrc location=\"{}\" ! \
             decodebin ! \
             videoconvert ! \
             videoscale ! \
             video/x-raw,format=RGBA,width={},height={},pixel-aspect-ratio=1/1 ! \
             appsink name=appsink",
            config.uri.replace('"', "\\\""),
            config.width,
            config.height
        )
    }

    fn start(&mut self) -> color_eyre::Result<()> {
        self.pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| eyre!("Failed to preroll pipeline: {:?}", e))?;

        let (state_change, _, _) = self.pipeline.state(Some(gst::ClockTime::from_seconds(5)));
        match state_change {
            Ok(gst::StateChangeSuccess::Success) | Ok(gst::StateChangeSuccess::NoPreroll) => {}
            Ok(gst::StateChangeSuccess::Async) => {
                warn!("Pipeline still prerolling, frame rate may be unknown")
            }
            Err(_) => {
                let reason = self.bus_error().unwrap_or_else(|| "failed to preroll".into());
                return Err(eyre!("{}", reason));
            }
        }

        self.framerate = self
            .appsink
            .static_pad("sink")
            .and_then(|pad| pad.current_caps())
            .and_then(|caps| gst_video::VideoInfo::from_caps(&caps).ok())
            .and_then(|info| {
                let fps = info.fps();
                (fps.numer() > 0 && fps.denom() > 0)
                    .then(|| fps.numer() as f64 / fps.denom() as f64)
            });
        info!("Native frame rate: {:?}", self.framerate);

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| eyre!("Failed to start pipeline: {:?}", e))?;
        Ok(())
    }

    /// First error message waiting on the bus, if any.
    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
            if let gst::MessageView::Error(err) = msg.view() {
                return Some(err.error().to_string());
            }
        }
        None
    }
}

impl FrameSource for GstFileSource {
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, CaptureError> {
        if self.closed {
            return Ok(None);
        }

        // Blocks until a sample, EOS or error
        let sample = match self.appsink.pull_sample() {
            Ok(sample) => sample,
            Err(_) if self.appsink.is_eos() => {
                debug!("End of stream on {}", self.uri);
                return Ok(None);
            }
            Err(_) => {
                return Err(CaptureError::decode(
                    self.bus_error()
                        .unwrap_or_else(|| "failed to pull sample from pipeline".into()),
                ))
            }
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::decode("sample contains no buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|_| CaptureError::decode("failed to map buffer"))?;

        Ok(Some(DecodedFrame::new(
            map.as_slice().to_vec(),
            self.width,
            self.height,
            PixelFormat::Rgba,
        )))
    }

    fn framerate(&self) -> Option<f64> {
        self.framerate
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        info!("Stopping GStreamer pipeline");
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {:?}", e);
        }
        self.closed = true;
    }
}

impl Drop for GstFileSource {
    fn drop(&mut self) {
        self.close();
    }
}
