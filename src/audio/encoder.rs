use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::chunk::Chunk;
use super::page::{PageWriter, BEGIN_OF_STREAM, MAX_GRANULE};
use super::rtp;
use crate::config::RequesterConfig;
use crate::error::EncodeError;
use crate::transport::Speaker;

/// Identification header for a 48kHz stereo Opus stream
const OPUS_HEAD: [u8; 19] = [
    0x4f, 0x70, 0x75, 0x73, 0x48, 0x65, 0x61, 0x64, 0x01, 0x02, 0x00, 0x0f, 0x80, 0xbb, 0x00, 0x00,
    0x00, 0x00, 0x00,
];

/// Comment header with a fixed vendor string
const OPUS_TAGS: [u8; 26] = [
    0x4f, 0x70, 0x75, 0x73, 0x54, 0x61, 0x67, 0x73, 0x09, 0x00, 0x00, 0x00, 0x6e, 0x6f, 0x64, 0x65,
    0x2d, 0x6f, 0x70, 0x75, 0x73, 0x00, 0x00, 0x00, 0x00, 0xff,
];

/// First line of every user directory
const USERS_SEED: &[u8] = b"\"0\":{}\n";

/// Guild and channel context written into the info file.
///
/// Extra fields are merged in after the built-in ones and win on conflict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingDetails {
    pub guild: String,
    pub channel: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Entry appended to the user directory for every new track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: String,
    pub name: String,
    pub discrim: String,
}

impl From<&Speaker> for DirectoryEntry {
    fn from(speaker: &Speaker) -> Self {
        Self {
            id: speaker.id.clone(),
            name: speaker.name.clone(),
            discrim: speaker.discriminator.clone(),
        }
    }
}

/// Files making up one recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub info: PathBuf,
    pub header1: PathBuf,
    pub header2: PathBuf,
    pub data: PathBuf,
    pub users: PathBuf,
}

impl SessionPaths {
    pub fn new(recordings_dir: &Path, record_id: &str) -> Self {
        let file = |suffix: &str| recordings_dir.join(format!("{}.ogg.{}", record_id, suffix));
        Self {
            info: file("info"),
            header1: file("header1"),
            header2: file("header2"),
            data: file("data"),
            users: file("users"),
        }
    }
}

/// Open sinks for the active recording
struct SessionStreams {
    headers: [PageWriter<File>; 2],
    data: PageWriter<File>,
    users: File,
}

impl SessionStreams {
    fn open(paths: &SessionPaths) -> Result<Self, EncodeError> {
        let mut users = File::create(&paths.users)?;
        users.write_all(USERS_SEED)?;

        Ok(Self {
            headers: [
                PageWriter::new(File::create(&paths.header1)?),
                PageWriter::new(File::create(&paths.header2)?),
            ],
            data: PageWriter::new(File::create(&paths.data)?),
            users,
        })
    }

    fn write_headers(&mut self, track: u32) -> Result<(), EncodeError> {
        self.headers[0].write_page(0, track, 0, &OPUS_HEAD, BEGIN_OF_STREAM)?;
        self.headers[1].write_page(0, track, 1, &OPUS_TAGS, 0)?;
        Ok(())
    }

    fn append_user(&mut self, track: u32, speaker: &Speaker) -> Result<(), EncodeError> {
        let entry = serde_json::to_string(&DirectoryEntry::from(speaker))?;
        let line = format!(",\"{}\":{}\n", track, entry);
        self.users.write_all(line.as_bytes())?;
        Ok(())
    }

    fn close(mut self) -> Result<(), EncodeError> {
        let results = [
            self.headers[0].flush(),
            self.headers[1].flush(),
            self.data.flush(),
            self.users.flush().map_err(EncodeError::from),
        ];
        results.into_iter().collect()
    }
}

/// Turns per-speaker audio chunks into interleaved Ogg Opus pages.
///
/// Each speaker gets its own logical stream (the track number). Codec headers
/// go to two separate header files, audio pages for every track share the
/// data file, and the users file maps track numbers to speakers.
pub struct MultiTrackEncoder {
    recordings_dir: PathBuf,
    requester: RequesterConfig,
    streams: Option<SessionStreams>,
    paths: Option<SessionPaths>,
}

impl MultiTrackEncoder {
    pub fn new(recordings_dir: impl Into<PathBuf>, requester: RequesterConfig) -> Self {
        Self {
            recordings_dir: recordings_dir.into(),
            requester,
            streams: None,
            paths: None,
        }
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    /// Paths of the current recording, if streams are open
    pub fn paths(&self) -> Option<&SessionPaths> {
        self.paths.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.streams.is_some()
    }

    /// Create every file the recording needs.
    ///
    /// The info file is created exclusively so an earlier recording with the
    /// same ID is never overwritten.
    pub fn init_streams(
        &mut self,
        record_id: &str,
        details: &RecordingDetails,
    ) -> Result<SessionPaths, EncodeError> {
        if self.streams.is_some() {
            warn!("Opening new streams while previous ones are still open, closing them");
            self.close_streams()?;
        }

        fs::create_dir_all(&self.recordings_dir)?;

        let paths = SessionPaths::new(&self.recordings_dir, record_id);
        self.write_info_file(&paths.info, details)?;
        self.streams = Some(SessionStreams::open(&paths)?);
        self.paths = Some(paths.clone());

        info!(
            "Recording streams opened: {} in {}",
            record_id,
            self.recordings_dir.display()
        );

        Ok(paths)
    }

    fn write_info_file(&self, path: &Path, details: &RecordingDetails) -> Result<(), EncodeError> {
        let now = Utc::now();

        let mut info = Map::new();
        info.insert("key".into(), "0".into());
        info.insert("delete".into(), "0".into());
        info.insert("requester".into(), self.requester.name.clone().into());
        info.insert("requesterId".into(), self.requester.id.clone().into());
        info.insert("startTime".into(), now.timestamp_millis().to_string().into());
        info.insert("startDate".into(), now.to_rfc3339().into());

        if let Value::Object(fields) = serde_json::to_value(details)? {
            info.extend(fields);
        }

        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        serde_json::to_writer(&mut file, &info)?;
        file.flush()?;

        Ok(())
    }

    /// Write the codec headers for a new track and add its speaker to the
    /// user directory. Both steps are attempted; the first failure is returned.
    pub fn register_track(&mut self, track: u32, speaker: &Speaker) -> Result<(), EncodeError> {
        let streams = self.streams.as_mut().ok_or(EncodeError::StreamsClosed)?;

        let headers = streams.write_headers(track);
        let entry = streams.append_user(track, speaker);

        debug!("Registered track {} for {} ({})", track, speaker.name, speaker.id);

        headers.and(entry)
    }

    /// Write one chunk as an audio page followed by an empty page whose
    /// granule position carries the transport timestamp.
    ///
    /// Either both pages are written or, on a range error, neither is.
    pub fn encode_chunk(
        &mut self,
        track: u32,
        sequence: u32,
        chunk: &Chunk,
    ) -> Result<(), EncodeError> {
        let streams = self.streams.as_mut().ok_or(EncodeError::StreamsClosed)?;

        for position in [chunk.granule, chunk.timestamp] {
            if position > MAX_GRANULE {
                return Err(EncodeError::GranuleOutOfRange(position));
            }
        }

        let audio = rtp::strip_extension_header(&chunk.payload);
        streams.data.write_page(chunk.granule, track, sequence, audio, 0)?;
        streams
            .data
            .write_page(chunk.timestamp, track, sequence.wrapping_add(1), &[], 0)?;

        Ok(())
    }

    /// Encode up to `count` chunks from the front of `queue`.
    ///
    /// Returns the next sequence number for the track. Chunks that fail to
    /// encode are dropped without consuming sequence numbers.
    pub fn flush(
        &mut self,
        track: u32,
        queue: &mut VecDeque<Chunk>,
        count: usize,
        mut sequence: u32,
    ) -> u32 {
        for _ in 0..count {
            let Some(chunk) = queue.pop_front() else {
                break;
            };

            match self.encode_chunk(track, sequence, &chunk) {
                Ok(()) => sequence = sequence.wrapping_add(2),
                Err(e) => warn!(
                    "Failed to encode chunk for track {} (sequence {}): {}",
                    track, sequence, e
                ),
            }
        }

        sequence
    }

    /// Close every sink. Chunks still buffered by the caller are not written.
    pub fn close_streams(&mut self) -> Result<(), EncodeError> {
        self.paths = None;
        match self.streams.take() {
            Some(streams) => {
                streams.close()?;
                info!("Recording streams closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for MultiTrackEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.close_streams() {
            warn!("Failed to close recording streams on drop: {}", e);
        }
    }
}
