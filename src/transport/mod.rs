//! Voice transport abstraction
//!
//! The recorder only needs a narrow surface from the voice platform: resolve a
//! channel, join it, receive per-speaker packets, look up channel members, keep
//! the connection alive and leave.
//!
//! Implementations:
//! - `nats`: voice gateway sidecar reached over NATS subjects

pub mod messages;
pub mod nats;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use nats::NatsVoiceTransport;

/// A channel member who can be recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    pub id: String,
    pub name: String,
    #[serde(rename = "discrim")]
    pub discriminator: String,
}

/// Voice channel to record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: String,
    pub name: String,
    pub guild_id: String,
    pub guild_name: String,
}

/// One packet received from the voice connection
#[derive(Debug, Clone)]
pub struct VoicePacket {
    /// Opus frame, possibly prefixed by an RTP extension block
    pub payload: Vec<u8>,
    /// Speaker, when the transport could attribute the packet
    pub user_id: Option<String>,
    /// Transport timestamp, in 48kHz samples
    pub timestamp: u64,
}

/// Resolves user IDs seen on the wire to channel members
pub trait MemberDirectory: Send + Sync {
    /// ID of our own user; its audio is never recorded
    fn self_id(&self) -> &str;

    fn resolve_member(&self, user_id: &str) -> Option<Speaker>;
}

/// An established voice connection
#[async_trait::async_trait]
pub trait VoiceConnection: MemberDirectory {
    /// Best-effort greeting played after joining
    async fn announce(&self) -> Result<()>;

    /// Send silence so the platform does not drop an idle connection
    async fn keepalive(&self) -> Result<()>;

    /// Leave the channel and stop packet delivery
    async fn disconnect(&self) -> Result<()>;
}

/// A joined channel: the connection plus its packet feed
pub struct VoiceLink {
    pub connection: Arc<dyn VoiceConnection>,
    pub packets: mpsc::Receiver<VoicePacket>,
}

/// Voice platform entry point
#[async_trait::async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Look up a voice channel by ID
    async fn resolve_channel(&self, channel_id: &str) -> Result<ChannelRef>;

    /// Join the channel and start receiving packets
    async fn connect(&self, channel: &ChannelRef) -> Result<VoiceLink>;

    /// Tear down whatever a failed or cancelled `connect` left behind.
    /// Must be safe to call when the channel was never joined.
    async fn abort(&self, channel: &ChannelRef) -> Result<()>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}
