pub mod capture;
pub mod error;
pub mod pipeline;
pub mod publish;
#[cfg(feature = "v4l2-device")]
pub mod utils;

use std::path::Path;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::Frame;
pub use error::{CaptureError, PipelineError, SinkError};

/// Environment variable prefix, e.g. `ROOMCAST__CAPTURE__URI=clip.mp4`
pub const ENV_PREFIX: &str = "ROOMCAST";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Hue color-cycle test pattern
    Synthetic,
    /// Video file decoded with GStreamer
    File,
    /// V4L2 capture device
    Device,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// File path or device path. Empty device path means auto-detect.
    pub uri: String,
    pub width: u32,
    pub height: u32,
    /// Fallback when the source does not report a frame rate
    pub fps: f64,
    /// Device pixel format
    pub format: PixelFormat,
    pub overlay_timestamp: bool,
    pub cpu_core: Option<usize>,
    /// Stop the synthetic source after this many frames
    pub frame_limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub buffer_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Log and drop
    Log,
    /// GStreamer appsrc into `publish.pipeline`
    Gstreamer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub sink: SinkKind,
    /// Downstream GStreamer pipeline for the gstreamer sink
    pub pipeline: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            uri: String::new(),
            width: 1920,
            height: 1080,
            fps: 30.0,
            format: PixelFormat::Mjpeg,
            overlay_timestamp: true,
            cpu_core: None,
            frame_limit: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: pipeline::ringbuf::DEFAULT_CAPACITY,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Log,
            pipeline: None,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `ROOMCAST__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        Self::load_with_env(path, env_source())
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self, PipelineError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let capture = &self.capture;
        if capture.width == 0 || capture.height == 0 {
            return Err(PipelineError::InvalidConfig(format!(
                "resolution {}x{} is empty",
                capture.width, capture.height
            )));
        }
        if !capture.fps.is_finite() || capture.fps <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!("fps {} is not positive", capture.fps)));
        }
        if capture.source == SourceKind::File && capture.uri.is_empty() {
            return Err(PipelineError::InvalidConfig("file source needs a uri".into()));
        }
        if self.pipeline.buffer_capacity == 0 {
            return Err(PipelineError::InvalidCapacity);
        }
        Ok(())
    }
}

fn env_source() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.pipeline.buffer_capacity, 3);
        assert_eq!(config.capture.source, SourceKind::Synthetic);
        assert_eq!((config.capture.width, config.capture.height), (1920, 1080));
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[capture]
source = "file"
uri = "clip.mp4"
width = 640
height = 360

[pipeline]
buffer_capacity = 5

[publish]
sink = "gstreamer"
pipeline = "fakesink"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.source, SourceKind::File);
        assert_eq!(config.capture.uri, "clip.mp4");
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.capture.fps, 30.0);
        assert_eq!(config.pipeline.buffer_capacity, 5);
        assert_eq!(config.publish.sink, SinkKind::Gstreamer);
        assert_eq!(config.publish.pipeline.as_deref(), Some("fakesink"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: config::Map<String, String> = [
            ("ROOMCAST__CAPTURE__CPU_CORE", "2"),
            ("ROOMCAST__PIPELINE__BUFFER_CAPACITY", "4"),
            ("OTHER__CAPTURE__WIDTH", "10"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = Config::load_with_env(None, env_source().source(Some(vars))).unwrap();
        assert_eq!(config.capture.cpu_core, Some(2));
        assert_eq!(config.pipeline.buffer_capacity, 4);
        assert_eq!(config.capture.width, 1920);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.pipeline.buffer_capacity = 0;
        assert!(matches!(config.validate(), Err(PipelineError::InvalidCapacity)));

        let mut config = Config::default();
        config.capture.fps = 0.0;
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));

        let mut config = Config::default();
        config.capture.source = SourceKind::File;
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = Config::load(Some(Path::new("/nonexistent/roomcast.toml"))).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
