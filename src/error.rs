//! Error types for the capture core
//!
//! Only lifecycle violations and connection failures reach callers of the
//! recorder. Encoder errors are returned to the capture layer, which logs them
//! and keeps recording.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`crate::recorder::AudioRecorder`]
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    #[error("voice connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("voice connection failed: {0}")]
    Connection(String),

    #[error("failed to open recording streams: {0}")]
    Storage(#[from] EncodeError),
}

/// Errors raised while writing container pages
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("granule position {0} does not fit in 48 bits")]
    GranuleOutOfRange(u64),

    #[error("payload of {0} bytes does not fit in a single page")]
    PayloadTooLarge(usize),

    #[error("recording streams are not open")]
    StreamsClosed,
}
