pub mod decoder;
pub mod driver;
pub mod frame;
pub mod overlay;
pub mod source;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
#[cfg(feature = "v4l2-device")]
pub mod v4l2;

pub use driver::{CaptureDriver, CaptureEnd, CaptureHandle, CaptureReport, CaptureSettings};
pub use frame::{DecodedFrame, Frame, FrameMetadata, PixelFormat};
pub use source::{FrameSource, SyntheticSource};

#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstFileSource;
#[cfg(feature = "v4l2-device")]
pub use v4l2::V4l2Source;

use crate::error::CaptureError;
use crate::{CaptureConfig, SourceKind};

/// Open the frame source selected by the configuration.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn FrameSource>, CaptureError> {
    match config.source {
        SourceKind::Synthetic => {
            let source = SyntheticSource::new(config.width, config.height, config.fps);
            let source = match config.frame_limit {
                Some(limit) => source.with_limit(limit),
                None => source,
            };
            Ok(Box::new(source))
        }
        SourceKind::File => {
            #[cfg(feature = "gstreamer-pipeline")]
            {
                Ok(Box::new(GstFileSource::open(config)?))
            }
            #[cfg(not(feature = "gstreamer-pipeline"))]
            {
                Err(CaptureError::open(
                    &config.uri,
                    "file sources require the gstreamer-pipeline feature",
                ))
            }
        }
        SourceKind::Device => {
            #[cfg(feature = "v4l2-device")]
            {
                let mut config = config.clone();
                if config.uri.is_empty() {
                    let found = crate::utils::auto_detect_device()
                        .map_err(|e| CaptureError::open("auto", e))?;
                    config.uri = found.path;
                    config.format = found.format;
                }
                Ok(Box::new(V4l2Source::open(&config)?))
            }
            #[cfg(not(feature = "v4l2-device"))]
            {
                Err(CaptureError::open(
                    &config.uri,
                    "capture devices require the v4l2-device feature",
                ))
            }
        }
    }
}
