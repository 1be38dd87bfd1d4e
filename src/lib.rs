pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod recorder;
pub mod service;
pub mod state;
pub mod transport;

pub use audio::{Chunk, MultiTrackEncoder, PageWriter, RecordingDetails, SessionPaths};
pub use config::{Config, RecorderConfig, StopDrain};
pub use control::{ControlCommand, Controller, NatsController};
pub use error::{EncodeError, RecorderError};
pub use recorder::{AudioRecorder, RecorderEvent, RecorderState, SessionStart};
pub use service::RecorderService;
pub use state::{FileStateStore, RecordingState, RecordingStore};
pub use transport::{ChannelRef, NatsVoiceTransport, Speaker, VoicePacket, VoiceTransport};
