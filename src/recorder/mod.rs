//! Capture session
//!
//! Owns the voice connection for the duration of a recording, routes packets
//! to per-speaker buffers and keeps the connection alive while nobody speaks.

pub mod capture;
#[allow(clippy::module_inception)]
pub mod recorder;
pub mod state;

pub use capture::{CaptureCore, SpeakerTrack, FIRST_AUDIO_SEQUENCE};
pub use recorder::AudioRecorder;
pub use state::{RecorderEvent, RecorderState, SessionStart};
