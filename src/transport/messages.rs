use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ChannelRef, Speaker, VoicePacket};

/// Reply to a channel lookup
#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelInfoMessage {
    pub id: String,
    pub name: String,
    pub guild_id: String,
    pub guild_name: String,
    pub kind: String,
}

impl ChannelInfoMessage {
    pub fn is_voice(&self) -> bool {
        self.kind == "voice"
    }
}

impl From<ChannelInfoMessage> for ChannelRef {
    fn from(msg: ChannelInfoMessage) -> Self {
        Self {
            id: msg.id,
            name: msg.name,
            guild_id: msg.guild_id,
            guild_name: msg.guild_name,
        }
    }
}

/// Join request sent to the gateway
#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    pub channel_id: String,
}

/// Gateway reply to a join or leave request
#[derive(Debug, Serialize, Deserialize)]
pub struct JoinReply {
    pub self_id: String,
    #[serde(default)]
    pub members: Vec<Speaker>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Audio packet forwarded by the gateway
#[derive(Debug, Serialize, Deserialize)]
pub struct VoicePacketMessage {
    #[serde(default)]
    pub user_id: Option<String>,
    pub timestamp: u64,
    pub payload: String, // Base64-encoded Opus frame
}

impl VoicePacketMessage {
    pub fn decode(self) -> Result<VoicePacket> {
        let payload = base64::engine::general_purpose::STANDARD
            .decode(&self.payload)
            .context("Invalid base64 packet payload")?;

        Ok(VoicePacket {
            payload,
            user_id: self.user_id.filter(|id| !id.is_empty()),
            timestamp: self.timestamp,
        })
    }
}

/// Channel membership change
#[derive(Debug, Serialize, Deserialize)]
pub struct MemberEvent {
    #[serde(default)]
    pub joined: Option<Speaker>,
    #[serde(default)]
    pub left: Option<String>,
}

impl MemberEvent {
    /// Update a member cache keyed by user ID
    pub fn apply(self, members: &mut HashMap<String, Speaker>) {
        if let Some(member) = self.joined {
            members.insert(member.id.clone(), member);
        }
        if let Some(id) = self.left {
            members.remove(&id);
        }
    }
}

/// Audio to play into the channel
#[derive(Debug, Serialize, Deserialize)]
pub struct PlayMessage {
    pub payload: String, // Base64-encoded Opus frame
}
