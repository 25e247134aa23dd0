pub mod driver;
pub mod sink;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_sink;

pub use driver::{PublishDriver, PublishReport};
pub use sink::{ChannelSink, FrameSink, LogSink, PtsClock};

#[cfg(feature = "gstreamer-pipeline")]
pub use gst_sink::GstSink;
