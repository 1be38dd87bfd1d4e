use serde_json::Map;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::capture::CaptureCore;
use super::state::{RecorderEvent, RecorderState, SessionStart};
use crate::audio::{MultiTrackEncoder, RecordingDetails, SessionPaths};
use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::transport::{ChannelRef, VoiceConnection, VoiceLink, VoicePacket, VoiceTransport};

const EVENT_CAPACITY: usize = 64;

/// Record IDs are numeric strings below this bound
const RECORD_ID_SPACE: u128 = 1_000_000_000;

struct ActiveSession {
    record_id: String,
    channel: ChannelRef,
    started: SessionStart,
    connection: Arc<dyn VoiceConnection>,
    capture: Arc<Mutex<CaptureCore>>,
    shutdown: oneshot::Sender<()>,
    packet_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
}

/// Records one voice channel at a time into a multi-track container
pub struct AudioRecorder {
    config: RecorderConfig,
    transport: Arc<dyn VoiceTransport>,
    issued_ids: HashSet<String>,
    events: broadcast::Sender<RecorderEvent>,
    session: Option<ActiveSession>,
}

impl AudioRecorder {
    pub fn new(config: RecorderConfig, transport: Arc<dyn VoiceTransport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            config,
            transport,
            issued_ids: HashSet::new(),
            events,
            session: None,
        }
    }

    /// Join `channel` and start writing its audio.
    ///
    /// Returns the ID of the new recording. On failure the recorder stays idle.
    pub async fn start_recording(&mut self, channel: &ChannelRef) -> Result<String, RecorderError> {
        if self.session.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let record_id = self.next_record_id();
        let started = SessionStart::now();

        info!(
            "Starting recording {} of {} ({}) in {}",
            record_id, channel.name, channel.id, channel.guild_name
        );

        let mut encoder =
            MultiTrackEncoder::new(&self.config.recordings_path, self.config.requester.clone());

        let details = RecordingDetails {
            guild: format!("{}#{}", channel.guild_name, channel.guild_id),
            channel: channel.name.clone(),
            extra: Map::new(),
        };
        encoder.init_streams(&record_id, &details)?;

        let link = match self.connect(channel).await {
            Ok(link) => link,
            Err(e) => {
                error!("Failed to join {}: {}", channel.id, e);
                if let Err(abort_err) = self.transport.abort(channel).await {
                    warn!("Failed to abort join of {}: {:#}", channel.id, abort_err);
                }
                if let Err(close_err) = encoder.close_streams() {
                    warn!("Failed to close streams of {}: {}", record_id, close_err);
                }
                return Err(e);
            }
        };

        let VoiceLink {
            connection,
            packets,
        } = link;

        if let Err(e) = connection.announce().await {
            debug!("Announcement failed: {:#}", e);
        }

        let capture = CaptureCore::new(encoder, started.instant, self.config.max_queue_length)
            .with_events(self.events.clone());
        let capture = Arc::new(Mutex::new(capture));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let packet_task = tokio::spawn(pump_packets(
            packets,
            shutdown_rx,
            Arc::clone(&capture),
            Arc::clone(&connection),
            self.events.clone(),
            record_id.clone(),
        ));

        let heartbeat_task = tokio::spawn(heartbeat(
            Arc::clone(&connection),
            self.config.heartbeat_interval(),
        ));

        self.session = Some(ActiveSession {
            record_id: record_id.clone(),
            channel: channel.clone(),
            started,
            connection,
            capture,
            shutdown: shutdown_tx,
            packet_task,
            heartbeat_task,
        });

        info!("Recording {} started", record_id);

        Ok(record_id)
    }

    /// Leave the channel and finish the recording.
    ///
    /// Packets already delivered by the transport are processed before the
    /// buffers are drained according to the configured policy.
    pub async fn stop_recording(&mut self) -> Result<SessionStart, RecorderError> {
        let session = self.session.take().ok_or(RecorderError::NotRecording)?;

        info!("Stopping recording {}", session.record_id);

        session.heartbeat_task.abort();

        // The packet task may already be gone if the transport closed
        let _ = session.shutdown.send(());
        if let Err(e) = session.packet_task.await {
            if !e.is_cancelled() {
                error!("Packet task failed: {}", e);
            }
        }

        if let Err(e) = session.connection.disconnect().await {
            warn!("Failed to leave {}: {:#}", session.channel.id, e);
        }

        let mut capture = session.capture.lock().await;
        capture.drain(self.config.stop_drain);
        let speakers = capture.speaker_count();
        if let Err(e) = capture.close() {
            warn!("Failed to close streams of {}: {}", session.record_id, e);
        }

        info!(
            "Recording {} stopped after {:?} with {} speakers",
            session.record_id,
            session.started.elapsed(),
            speakers
        );

        Ok(session.started)
    }

    pub fn state(&self) -> RecorderState {
        if self.session.is_some() {
            RecorderState::Recording
        } else {
            RecorderState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state().is_recording()
    }

    pub fn record_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.record_id.as_str())
    }

    pub fn channel(&self) -> Option<&ChannelRef> {
        self.session.as_ref().map(|s| &s.channel)
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.config.recordings_path
    }

    /// Files written for `record_id`
    pub fn session_paths(&self, record_id: &str) -> SessionPaths {
        SessionPaths::new(&self.config.recordings_path, record_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    pub fn transport(&self) -> &Arc<dyn VoiceTransport> {
        &self.transport
    }

    async fn connect(&self, channel: &ChannelRef) -> Result<VoiceLink, RecorderError> {
        let limit = self.config.connect_timeout();

        match tokio::time::timeout(limit, self.transport.connect(channel)).await {
            Ok(Ok(link)) => Ok(link),
            Ok(Err(e)) => Err(RecorderError::Connection(format!("{:#}", e))),
            Err(_) => Err(RecorderError::ConnectTimeout(limit)),
        }
    }

    /// Unique within this process and never clashing with an existing recording
    fn next_record_id(&mut self) -> String {
        loop {
            let id = (Uuid::new_v4().as_u128() % RECORD_ID_SPACE).to_string();

            if self.session_paths(&id).info.exists() {
                continue;
            }
            if self.issued_ids.insert(id.clone()) {
                return id;
            }
        }
    }
}

impl Drop for AudioRecorder {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!("Recorder dropped while recording {}", session.record_id);
            session.heartbeat_task.abort();
            session.packet_task.abort();
        }
    }
}

async fn pump_packets(
    mut packets: mpsc::Receiver<VoicePacket>,
    mut shutdown: oneshot::Receiver<()>,
    capture: Arc<Mutex<CaptureCore>>,
    connection: Arc<dyn VoiceConnection>,
    events: broadcast::Sender<RecorderEvent>,
    record_id: String,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            packet = packets.recv() => match packet {
                Some(packet) => {
                    capture.lock().await.adapt_chunk(packet, connection.as_ref());
                }
                None => {
                    warn!("Voice transport closed during recording {}", record_id);
                    let _ = events.send(RecorderEvent::TransportClosed {
                        record_id: record_id.clone(),
                    });
                    return;
                }
            },
        }
    }

    // Take whatever was delivered before the stop request
    packets.close();
    let mut capture = capture.lock().await;
    while let Ok(packet) = packets.try_recv() {
        capture.adapt_chunk(packet, connection.as_ref());
    }
}

/// Ticks that were missed while a keepalive stalled are not replayed
fn heartbeat_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn heartbeat(connection: Arc<dyn VoiceConnection>, period: Duration) {
    let mut ticker = heartbeat_ticker(period);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = connection.keepalive().await {
            debug!("Keepalive failed: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_heartbeat_skips_missed_ticks() {
        let ticker = heartbeat_ticker(Duration::from_millis(100));
        assert_eq!(ticker.missed_tick_behavior(), MissedTickBehavior::Delay);
        assert_eq!(ticker.period(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_heartbeat_period_has_a_floor() {
        let ticker = heartbeat_ticker(Duration::ZERO);
        assert_eq!(ticker.period(), Duration::from_millis(1));
    }
}
