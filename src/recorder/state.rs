use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

use crate::transport::Speaker;

/// Recorder lifecycle.
///
/// ```text
/// idle → recording → idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Recording,
}

impl RecorderState {
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }
}

/// When a session started, on both clocks
#[derive(Debug, Clone, Copy)]
pub struct SessionStart {
    /// Monotonic reference for granule positions
    pub instant: Instant,
    /// Wall-clock time for correlating with external logs
    pub wall_clock: DateTime<Utc>,
}

impl SessionStart {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall_clock: Utc::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.instant.elapsed()
    }
}

/// Events emitted while recording
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// A speaker was heard for the first time and got a track
    SpeakerRegistered { track: u32, speaker: Speaker },
    /// The transport stopped delivering packets before the session was stopped
    TransportClosed { record_id: String },
}
