//! GStreamer appsrc sink
//!
//! Frames are pushed into an `appsrc` followed by a configurable downstream
//! pipeline: a local video sink by default, or e.g. a WHIP client element to
//! publish into a media room.

use color_eyre::{eyre::eyre, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{info, warn};

use super::sink::{FrameSink, PtsClock};
use crate::capture::Frame;
use crate::error::SinkError;
use crate::PublishConfig;

pub struct GstSink {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    clock: PtsClock,
}

impl GstSink {
    pub fn new(config: &PublishConfig, width: u32, height: u32) -> Result<Self> {
        gst::init().map_err(|e| eyre!("Failed to initialize GStreamer: {}", e))?;

        let downstream = match &config.pipeline {
            Some(custom) => custom.clone(),
            None => Self::detect_video_sink().to_string(),
        };
        let pipeline_str = format!(
            "appsrc name=src is-live=true format=time do-timestamp=false ! \
             video/x-raw,format=RGBA,width={},height={},framerate=0/1 ! \
             queue max-size-buffers=2 leaky=downstream ! \
             videoconvert ! \
             {}",
            width, height, downstream
        );
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)?
            .downcast::<gst::Pipeline>()
            .map_err(|_| eyre!("Failed to create pipeline"))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| eyre!("Failed to find appsrc element"))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| eyre!("Failed to cast to AppSrc"))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| eyre!("Failed to start pipeline: {:?}", e))?;

        Ok(Self {
            pipeline,
            appsrc,
            clock: PtsClock::new(),
        })
    }

    /// Detect best available video sink (hardware accelerated > software)
    fn detect_video_sink() -> &'static str {
        let sinks = [
            "glimagesink",   // OpenGL (hardware accelerated)
            "waylandsink",   // Wayland native (if available)
            "xvimagesink",   // X11 with XVideo extension
            "ximagesink",    // X11 basic
        ];

        for sink in &sinks {
            if gst::ElementFactory::find(sink).is_some() {
                info!("Using video sink: {}", sink);
                return sink;
            }
        }

        warn!("Using auto video sink");
        "autovideosink"
    }
}

impl FrameSink for GstSink {
    fn submit(&mut self, frame: Frame) -> std::result::Result<(), SinkError> {
        let pts = self.clock.stamp(std::time::Instant::now());

        // Bytes is 'static + AsRef<[u8]>, so this wraps without copying
        let mut buffer = gst::Buffer::from_slice(frame.data);
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(gst::ClockTime::from_nseconds(pts.as_nanos() as u64));
        }

        match self.appsrc.push_buffer(buffer) {
            Ok(_) => Ok(()),
            Err(gst::FlowError::Flushing) | Err(gst::FlowError::Eos) => Err(SinkError::Closed),
            Err(e) => Err(SinkError::Rejected(format!("{:?}", e))),
        }
    }

    fn name(&self) -> &str {
        "gstreamer"
    }
}

impl Drop for GstSink {
    fn drop(&mut self) {
        let _ = self.appsrc.end_of_stream();
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {:?}", e);
        }
    }
}
