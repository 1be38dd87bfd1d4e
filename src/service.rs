//! Ties the recorder, the recovery state and a controller together.
//!
//! Every start persists the new record ID next to the channel being recorded.
//! If the process dies mid-recording, the next boot finds that state and, when
//! the same controller is present, starts recording the channel again. The
//! persisted record IDs then cover every piece of the interrupted recording.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::control::{ControlCommand, Controller};
use crate::error::RecorderError;
use crate::recorder::{AudioRecorder, RecorderEvent};
use crate::state::{RecordingState, RecordingStore};

const ALREADY_RECORDING: &str =
    "A recording has already started. Please end the current recording before starting another";
const RECOVERED: &str = "Recovered from voice stream failure, now recording again!";
const STREAM_LOST: &str = "Voice stream lost. Recovering...";
const NO_RECORDING: &str = "No recording";
const NO_PENDING_RECORDING: &str = "No pending recording";

pub struct RecorderService {
    recorder: AudioRecorder,
    store: Arc<dyn RecordingStore>,
    controller: Arc<dyn Controller>,
    /// Set while restarting a recording from persisted state
    resuming: bool,
}

impl RecorderService {
    pub fn new(
        recorder: AudioRecorder,
        store: Arc<dyn RecordingStore>,
        controller: Arc<dyn Controller>,
    ) -> Self {
        Self {
            recorder,
            store,
            controller,
            resuming: false,
        }
    }

    pub fn recorder(&self) -> &AudioRecorder {
        &self.recorder
    }

    /// Resume an interrupted recording if the persisted state allows it.
    ///
    /// Returns whether a recording was resumed.
    pub async fn boot(&mut self) -> Result<bool> {
        let Some(state) = self.store.get_state().await? else {
            info!("State is clean, no pending recording");
            return Ok(false);
        };

        let resumable = state
            .controller
            .as_ref()
            .is_some_and(|c| self.controller.can_resume(c));

        if !resumable {
            info!("Found recording state no controller can resume, clearing it");
            self.store.delete_state().await?;
            return Ok(false);
        }

        info!(
            "Attempting to resume recording of {} ({} earlier records)",
            state.voice_channel_id,
            state.records_ids.len()
        );

        self.resuming = true;
        self.start(&state.voice_channel_id).await?;

        Ok(self.recorder.is_recording())
    }

    pub async fn handle(&mut self, command: ControlCommand) -> Result<()> {
        match command {
            ControlCommand::Start { voice_channel_id } => {
                info!("[{}] Starting a new recording", self.controller.name());
                self.start(&voice_channel_id).await
            }
            ControlCommand::Stop => {
                info!("[{}] Ending recording", self.controller.name());
                self.stop().await
            }
        }
    }

    pub async fn start(&mut self, voice_channel_id: &str) -> Result<()> {
        let current = self.store.get_state().await?;

        if current.is_some() {
            if !self.resuming {
                info!("Recording attempt denied: already recording");
                self.notify(ALREADY_RECORDING).await;
                return Ok(());
            }
            info!("Recovering interrupted recording");
            self.notify(RECOVERED).await;
        }
        self.resuming = false;

        let channel = match self.recorder.transport().resolve_channel(voice_channel_id).await {
            Ok(channel) => channel,
            Err(e) => {
                info!("Cannot record channel {}: {:#}", voice_channel_id, e);
                let message = format!(
                    "{} is not a voice channel that can be recorded",
                    voice_channel_id
                );
                self.notify(&message).await;
                if current.is_some() {
                    self.store.delete_state().await?;
                }
                return Ok(());
            }
        };

        let record_id = match self.recorder.start_recording(&channel).await {
            Ok(record_id) => record_id,
            Err(RecorderError::AlreadyRecording) => {
                error!("Recorder is already recording, aborting");
                self.notify(ALREADY_RECORDING).await;
                return Ok(());
            }
            Err(e) => {
                error!("Failed to start recording: {}", e);
                self.notify(&format!("Could not start recording: {}", e)).await;
                self.store.delete_state().await?;
                return Ok(());
            }
        };

        debug!("Record started with id {}", record_id);

        let mut records_ids = current.map(|state| state.records_ids).unwrap_or_default();
        records_ids.push(record_id.clone());

        self.store
            .set_state(&RecordingState {
                records_ids,
                voice_channel_id: voice_channel_id.to_string(),
                controller: Some(self.controller.state()),
            })
            .await?;

        if let Err(e) = self.controller.signal_started(&record_id, voice_channel_id).await {
            warn!("Failed to signal start of {}: {:#}", record_id, e);
        }

        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        let Some(state) = self.store.get_state().await? else {
            info!("Attempt to end a recording while none is running");
            self.notify(NO_RECORDING).await;
            return Ok(());
        };

        match self.recorder.stop_recording().await {
            Ok(started) => {
                info!("Recording ended, started at {}", started.wall_clock.to_rfc3339());
                if let Err(e) = self.controller.signal_stopped(&state.records_ids).await {
                    warn!("Failed to signal stop: {:#}", e);
                }
            }
            Err(RecorderError::NotRecording) => {
                info!("State found but the recorder is idle");
                self.notify(NO_PENDING_RECORDING).await;
            }
            Err(e) => {
                error!("Failed to stop recording: {}", e);
                self.notify(&format!("Could not stop recording: {}", e)).await;
            }
        }

        self.store.delete_state().await
    }

    pub async fn on_recorder_event(&mut self, event: RecorderEvent) -> Result<()> {
        match event {
            RecorderEvent::SpeakerRegistered { track, speaker } => {
                debug!("Track {} is {} ({})", track, speaker.name, speaker.id);
                Ok(())
            }
            RecorderEvent::TransportClosed { record_id } => {
                if self.recorder.record_id() != Some(record_id.as_str()) {
                    return Ok(());
                }

                warn!("Voice stream of {} lost, restarting recording", record_id);
                self.notify(STREAM_LOST).await;

                if let Err(e) = self.recorder.stop_recording().await {
                    warn!("Failed to stop broken recording: {}", e);
                }

                match self.store.get_state().await? {
                    Some(state) => {
                        self.resuming = true;
                        self.start(&state.voice_channel_id).await
                    }
                    None => Ok(()),
                }
            }
        }
    }

    /// Process commands and recorder events until `shutdown` resolves or the
    /// command channel closes.
    ///
    /// A running recording is finalized on exit but its state is kept, so the
    /// next boot resumes it.
    pub async fn run<F>(
        mut self,
        mut commands: mpsc::Receiver<ControlCommand>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut events = self.recorder.subscribe();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Err(e) = self.handle(command).await {
                            error!("Command failed: {:#}", e);
                        }
                    }
                    None => break,
                },
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = self.on_recorder_event(event).await {
                            error!("Failed to handle recorder event: {:#}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} recorder events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        if self.recorder.is_recording() {
            if let Err(e) = self.recorder.stop_recording().await {
                warn!("Failed to finalize recording: {}", e);
            }
        }

        Ok(())
    }

    async fn notify(&self, message: &str) {
        if let Err(e) = self.controller.send_message(message).await {
            warn!("Failed to send message to {}: {:#}", self.controller.name(), e);
        }
    }
}
