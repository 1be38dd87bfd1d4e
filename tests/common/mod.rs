// Shared fixtures for integration tests: an in-process voice transport and a
// minimal Ogg page reader for checking what the recorder wrote.

#![allow(dead_code)]

use anyhow::{bail, Result};
use multitrack_recorder::config::RecorderConfig;
use multitrack_recorder::transport::{
    ChannelRef, MemberDirectory, Speaker, VoiceConnection, VoiceLink, VoicePacket, VoiceTransport,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const SELF_ID: &str = "999";
pub const CHANNEL_ID: &str = "4242";

pub fn speaker(id: &str) -> Speaker {
    Speaker {
        id: id.to_string(),
        name: format!("user-{}", id),
        discriminator: "0001".to_string(),
    }
}

pub fn channel() -> ChannelRef {
    ChannelRef {
        id: CHANNEL_ID.to_string(),
        name: "General".to_string(),
        guild_id: "42".to_string(),
        guild_name: "Guild".to_string(),
    }
}

pub fn packet(user_id: &str, timestamp: u64) -> VoicePacket {
    VoicePacket {
        payload: vec![0xf8, 0xff, 0xfe],
        user_id: Some(user_id.to_string()),
        timestamp,
    }
}

pub fn recorder_config(dir: &Path) -> RecorderConfig {
    RecorderConfig {
        recordings_path: dir.to_path_buf(),
        ..RecorderConfig::default()
    }
}

#[derive(Default)]
pub struct Counters {
    pub connects: AtomicUsize,
    pub keepalives: AtomicUsize,
    pub announces: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub aborts: AtomicUsize,
    /// Set as soon as a join starts, cleared by abort or disconnect
    pub joined: AtomicBool,
}

/// Voice transport whose packet feed is driven by the test
pub struct MockTransport {
    members: Vec<Speaker>,
    failures_left: AtomicUsize,
    connect_delay: Option<Duration>,
    feed: Mutex<Option<mpsc::Sender<VoicePacket>>>,
    pub counters: Arc<Counters>,
}

impl MockTransport {
    pub fn new(member_ids: &[&str]) -> Self {
        Self {
            members: member_ids.iter().map(|id| speaker(id)).collect(),
            failures_left: AtomicUsize::new(0),
            connect_delay: None,
            feed: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Fail the next `count` connection attempts
    pub fn failing(self, count: usize) -> Self {
        self.failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Sender feeding the current connection
    pub fn feed(&self) -> mpsc::Sender<VoicePacket> {
        self.feed
            .lock()
            .clone()
            .expect("transport is not connected")
    }

    pub async fn send(&self, packet: VoicePacket) {
        self.feed().send(packet).await.unwrap();
    }

    /// Simulate the platform dropping the voice connection
    pub fn close_feed(&self) {
        self.feed.lock().take();
    }

    pub fn keepalives(&self) -> usize {
        self.counters.keepalives.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.counters.disconnects.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.counters.aborts.load(Ordering::SeqCst)
    }

    pub fn is_joined(&self) -> bool {
        self.counters.joined.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl VoiceTransport for MockTransport {
    async fn resolve_channel(&self, channel_id: &str) -> Result<ChannelRef> {
        if channel_id != CHANNEL_ID {
            bail!("unknown channel {}", channel_id);
        }
        Ok(channel())
    }

    async fn connect(&self, _channel: &ChannelRef) -> Result<VoiceLink> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        self.counters.joined.store(true, Ordering::SeqCst);

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("gateway unavailable");
        }

        let (tx, rx) = mpsc::channel(128);
        *self.feed.lock() = Some(tx);

        let connection = MockConnection {
            members: self
                .members
                .iter()
                .map(|m| (m.id.clone(), m.clone()))
                .collect(),
            counters: Arc::clone(&self.counters),
        };

        Ok(VoiceLink {
            connection: Arc::new(connection),
            packets: rx,
        })
    }

    async fn abort(&self, _channel: &ChannelRef) -> Result<()> {
        self.counters.aborts.fetch_add(1, Ordering::SeqCst);
        self.counters.joined.store(false, Ordering::SeqCst);
        self.feed.lock().take();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockConnection {
    members: HashMap<String, Speaker>,
    counters: Arc<Counters>,
}

impl MemberDirectory for MockConnection {
    fn self_id(&self) -> &str {
        SELF_ID
    }

    fn resolve_member(&self, user_id: &str) -> Option<Speaker> {
        self.members.get(user_id).cloned()
    }
}

#[async_trait::async_trait]
impl VoiceConnection for MockConnection {
    async fn announce(&self) -> Result<()> {
        self.counters.announces.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn keepalive(&self) -> Result<()> {
        self.counters.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        self.counters.joined.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// One parsed Ogg page
#[derive(Debug, Clone)]
pub struct Page {
    pub flags: u8,
    pub granule: u64,
    pub stream_id: u32,
    pub sequence: u32,
    pub payload: Vec<u8>,
}

/// Split a byte stream into Ogg pages
pub fn parse_pages(mut bytes: &[u8]) -> Vec<Page> {
    let mut pages = Vec::new();

    while !bytes.is_empty() {
        assert_eq!(&bytes[..4], b"OggS", "missing capture pattern");

        let segments = bytes[26] as usize;
        let lacing = &bytes[27..27 + segments];
        let payload_len: usize = lacing.iter().map(|&b| b as usize).sum();
        let start = 27 + segments;

        let mut granule = [0u8; 8];
        granule.copy_from_slice(&bytes[6..14]);

        pages.push(Page {
            flags: bytes[5],
            granule: u64::from_le_bytes(granule),
            stream_id: u32::from_le_bytes(bytes[14..18].try_into().unwrap()),
            sequence: u32::from_le_bytes(bytes[18..22].try_into().unwrap()),
            payload: bytes[start..start + payload_len].to_vec(),
        });

        bytes = &bytes[start + payload_len..];
    }

    pages
}

pub fn read_pages(path: &Path) -> Vec<Page> {
    parse_pages(&std::fs::read(path).unwrap())
}

/// Parse the users file the way offline tooling does: wrap it in braces
pub fn read_users(path: &Path) -> serde_json::Map<String, serde_json::Value> {
    let contents = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&format!("{{{}}}", contents)).unwrap()
}
