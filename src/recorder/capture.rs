// Per-speaker buffering and track bookkeeping
//
// Packets for one speaker are held in a short queue so late arrivals can be
// put back in timestamp order before they hit the data file. When a queue
// grows past its limit the oldest chunk is written out. Reordering can make
// granule positions briefly go backwards on disk; offline processing fixes
// that up.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::state::RecorderEvent;
use crate::audio::{granule_from_elapsed, Chunk, MultiTrackEncoder};
use crate::config::StopDrain;
use crate::error::EncodeError;
use crate::transport::{MemberDirectory, Speaker, VoicePacket};

/// Sequence number of the first audio page of a track; 0 and 1 are the headers
pub const FIRST_AUDIO_SEQUENCE: u32 = 2;

/// State kept for every speaker heard during the session
#[derive(Debug)]
pub struct SpeakerTrack {
    pub speaker: Speaker,
    /// Logical stream ID in the container
    pub track: u32,
    /// Next page sequence number
    pub sequence: u32,
    /// Chunks waiting to be written, ascending by timestamp
    pub pending: VecDeque<Chunk>,
}

impl SpeakerTrack {
    fn new(speaker: Speaker, track: u32) -> Self {
        Self {
            speaker,
            track,
            sequence: FIRST_AUDIO_SEQUENCE,
            pending: VecDeque::new(),
        }
    }
}

/// Mutable state of one recording session
pub struct CaptureCore {
    encoder: MultiTrackEncoder,
    started: Instant,
    max_queue_length: usize,
    next_track: u32,
    speakers: HashMap<String, SpeakerTrack>,
    events: Option<broadcast::Sender<RecorderEvent>>,
}

impl CaptureCore {
    /// `encoder` must already have its streams open
    pub fn new(encoder: MultiTrackEncoder, started: Instant, max_queue_length: usize) -> Self {
        Self {
            encoder,
            started,
            max_queue_length,
            next_track: 1,
            speakers: HashMap::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<RecorderEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Filter a raw packet and route it to its speaker.
    ///
    /// Packets without a speaker, from ourselves, or from someone who is no
    /// longer in the channel are dropped. Returns whether the packet was kept.
    pub fn adapt_chunk<D>(&mut self, packet: VoicePacket, directory: &D) -> bool
    where
        D: MemberDirectory + ?Sized,
    {
        let user_id = match packet.user_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => return false,
        };

        if user_id == directory.self_id() {
            return false;
        }

        let Some(speaker) = directory.resolve_member(user_id) else {
            debug!("Dropping packet from unknown member {}", user_id);
            return false;
        };

        self.on_receive(speaker, Chunk::new(packet.payload, packet.timestamp));
        true
    }

    /// Buffer a chunk for its speaker, stamped with the current session time
    pub fn on_receive(&mut self, speaker: Speaker, chunk: Chunk) {
        let elapsed = self.started.elapsed();
        self.receive_at(speaker, chunk, elapsed);
    }

    /// Buffer a chunk received `elapsed` after the session started
    pub fn receive_at(&mut self, speaker: Speaker, mut chunk: Chunk, elapsed: Duration) {
        chunk.granule = granule_from_elapsed(elapsed);

        let track = match self.speakers.entry(speaker.id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let track = self.next_track;
                self.next_track += 1;

                info!("New speaker {} ({}) on track {}", speaker.name, speaker.id, track);

                // Headers must precede any audio page of the track
                if let Err(e) = self.encoder.register_track(track, &speaker) {
                    warn!("Failed to register track {} for {}: {}", track, speaker.id, e);
                }

                if let Some(events) = &self.events {
                    let _ = events.send(RecorderEvent::SpeakerRegistered {
                        track,
                        speaker: speaker.clone(),
                    });
                }

                entry.insert(SpeakerTrack::new(speaker, track))
            }
        };

        let out_of_order = track
            .pending
            .back()
            .is_some_and(|last| chunk.timestamp < last.timestamp);

        track.pending.push_back(chunk);

        if out_of_order {
            debug!("Out of order packet on track {}, reordering", track.track);
            track
                .pending
                .make_contiguous()
                .sort_by_key(|chunk| chunk.timestamp);
        }

        if track.pending.len() > self.max_queue_length {
            track.sequence = self
                .encoder
                .flush(track.track, &mut track.pending, 1, track.sequence);
        }
    }

    /// Write buffered chunks for every speaker according to `policy`.
    ///
    /// Anything left over afterwards is discarded.
    pub fn drain(&mut self, policy: StopDrain) {
        let mut tracks: Vec<&mut SpeakerTrack> = self.speakers.values_mut().collect();
        tracks.sort_by_key(|track| track.track);

        for track in tracks {
            let count = policy.count(track.pending.len());
            track.sequence = self
                .encoder
                .flush(track.track, &mut track.pending, count, track.sequence);

            if !track.pending.is_empty() {
                warn!(
                    "Discarding {} buffered chunks for track {}",
                    track.pending.len(),
                    track.track
                );
                track.pending.clear();
            }
        }
    }

    /// Close the encoder's streams
    pub fn close(&mut self) -> Result<(), EncodeError> {
        self.encoder.close_streams()
    }

    pub fn track_number(&self, user_id: &str) -> Option<u32> {
        self.speakers.get(user_id).map(|track| track.track)
    }

    pub fn sequence(&self, user_id: &str) -> Option<u32> {
        self.speakers.get(user_id).map(|track| track.sequence)
    }

    pub fn pending(&self, user_id: &str) -> Option<&VecDeque<Chunk>> {
        self.speakers.get(user_id).map(|track| &track.pending)
    }

    pub fn speaker_count(&self) -> usize {
        self.speakers.len()
    }
}
