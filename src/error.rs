//! Error types shared by the capture and publish halves of the pipeline

use thiserror::Error;

/// Failures on the capture side. All of them end the capture thread.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The source could not be opened (missing file, busy device, bad pipeline).
    #[error("failed to open frame source {uri}: {reason}")]
    Open { uri: String, reason: String },

    /// A read or decode failed after the source was opened.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("capture thread panicked")]
    Panicked,
}

impl CaptureError {
    pub fn open(uri: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Open {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(reason: impl std::fmt::Display) -> Self {
        Self::Decode(reason.to_string())
    }
}

/// Failures reported by a frame sink. Logged by the publish driver, never fatal.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink is full, frame dropped")]
    Backpressure,

    #[error("sink is closed")]
    Closed,

    #[error("sink rejected frame: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pacing buffer capacity must be at least 1")]
    InvalidCapacity,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
