use anyhow::{bail, Context, Result};
use async_nats::{Client, Subscriber};
use base64::Engine;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{
    ChannelInfoMessage, JoinReply, JoinRequest, MemberEvent, PlayMessage, VoicePacketMessage,
};
use super::{ChannelRef, MemberDirectory, Speaker, VoiceConnection, VoiceLink, VoicePacket, VoiceTransport};

/// A single silent Opus frame
const SILENT_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Voice transport backed by a gateway sidecar reachable over NATS.
///
/// The gateway owns the platform connection; this side only exchanges
/// JSON messages with it:
/// - `<prefix>.channel.<id>` (request): channel lookup
/// - `<prefix>.join` / `<prefix>.leave`: join and leave a channel
/// - `<prefix>.packets.<channel>`: received audio packets
/// - `<prefix>.members.<channel>`: membership changes
/// - `<prefix>.announce.<channel>` / `<prefix>.play.<channel>`: outgoing audio
pub struct NatsVoiceTransport {
    client: Client,
    prefix: String,
    packet_capacity: usize,
}

impl NatsVoiceTransport {
    /// Connect to NATS server
    pub async fn connect(url: &str, prefix: &str, packet_capacity: usize) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self::new(client, prefix, packet_capacity))
    }

    pub fn new(client: Client, prefix: &str, packet_capacity: usize) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
            packet_capacity,
        }
    }

    fn subject(&self, name: &str) -> String {
        format!("{}.{}", self.prefix, name)
    }

    async fn leave(&self, channel_id: &str) -> Result<()> {
        leave_channel(&self.client, &self.prefix, channel_id).await
    }

    async fn subscribe_feeds(&self, channel_id: &str) -> Result<(Subscriber, Subscriber)> {
        let packets = self
            .client
            .subscribe(self.subject(&format!("packets.{}", channel_id)))
            .await
            .context("Failed to subscribe to voice packets")?;

        let member_events = self
            .client
            .subscribe(self.subject(&format!("members.{}", channel_id)))
            .await
            .context("Failed to subscribe to member events")?;

        Ok((packets, member_events))
    }

    async fn request_join(&self, channel_id: &str) -> Result<JoinReply> {
        let request = serde_json::to_vec(&JoinRequest {
            channel_id: channel_id.to_string(),
        })?;

        let reply = self
            .client
            .request(self.subject("join"), request.into())
            .await
            .context("Join request failed")?;

        let reply: JoinReply =
            serde_json::from_slice(&reply.payload).context("Invalid join reply")?;

        if let Some(error) = reply.error {
            bail!("Gateway refused to join {}: {}", channel_id, error);
        }

        Ok(reply)
    }

    fn open_link(
        &self,
        channel: &ChannelRef,
        reply: JoinReply,
        packets: Subscriber,
        member_events: Subscriber,
    ) -> VoiceLink {
        let members: HashMap<String, Speaker> = reply
            .members
            .into_iter()
            .map(|member| (member.id.clone(), member))
            .collect();
        let members = Arc::new(RwLock::new(members));

        let (packet_tx, packet_rx) = mpsc::channel(self.packet_capacity);

        let tasks = vec![
            tokio::spawn(forward_packets(packets, packet_tx)),
            tokio::spawn(track_members(member_events, Arc::clone(&members))),
        ];

        let connection = NatsVoiceConnection {
            client: self.client.clone(),
            prefix: self.prefix.clone(),
            channel_id: channel.id.clone(),
            self_id: reply.self_id,
            members,
            tasks: Mutex::new(tasks),
        };

        VoiceLink {
            connection: Arc::new(connection),
            packets: packet_rx,
        }
    }
}

#[async_trait::async_trait]
impl VoiceTransport for NatsVoiceTransport {
    async fn resolve_channel(&self, channel_id: &str) -> Result<ChannelRef> {
        let reply = self
            .client
            .request(self.subject(&format!("channel.{}", channel_id)), Vec::<u8>::new().into())
            .await
            .context("Channel lookup failed")?;

        let info: ChannelInfoMessage =
            serde_json::from_slice(&reply.payload).context("Invalid channel lookup reply")?;

        if !info.is_voice() {
            bail!("Channel {} is not a voice channel ({})", channel_id, info.kind);
        }

        Ok(info.into())
    }

    async fn connect(&self, channel: &ChannelRef) -> Result<VoiceLink> {
        info!("Joining voice channel {} ({})", channel.name, channel.id);

        // Subscribed before joining so no member or packet published right
        // after the join is missed. Dropping the subscribers unsubscribes.
        let (packets, member_events) = self.subscribe_feeds(&channel.id).await?;

        let reply = self.request_join(&channel.id).await?;
        let link = self.open_link(channel, reply, packets, member_events);

        info!("Joined voice channel {}", channel.id);
        Ok(link)
    }

    async fn abort(&self, channel: &ChannelRef) -> Result<()> {
        info!("Abandoning join of voice channel {}", channel.id);
        self.leave(&channel.id).await
    }

    fn name(&self) -> &str {
        "nats-gateway"
    }
}

async fn leave_channel(client: &Client, prefix: &str, channel_id: &str) -> Result<()> {
    let request = serde_json::to_vec(&JoinRequest {
        channel_id: channel_id.to_string(),
    })?;

    client
        .publish(format!("{}.leave", prefix), request.into())
        .await
        .context("Failed to publish leave request")?;

    client.flush().await.context("Failed to flush leave request")?;

    Ok(())
}

/// Decode gateway packets and hand them to the recorder without ever waiting
/// on it. Packets are dropped when the channel is full.
async fn forward_packets(mut subscriber: Subscriber, packets: mpsc::Sender<VoicePacket>) {
    let mut dropped: u64 = 0;

    while let Some(msg) = subscriber.next().await {
        let packet = match serde_json::from_slice::<VoicePacketMessage>(&msg.payload) {
            Ok(message) => message.decode(),
            Err(e) => Err(e.into()),
        };

        let packet = match packet {
            Ok(packet) => packet,
            Err(e) => {
                debug!("Ignoring malformed voice packet: {:#}", e);
                continue;
            }
        };

        match packets.try_send(packet) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                if dropped % 100 == 1 {
                    warn!("Packet channel full, {} packets dropped so far", dropped);
                }
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }

    debug!("Voice packet feed ended");
}

async fn track_members(mut subscriber: Subscriber, members: Arc<RwLock<HashMap<String, Speaker>>>) {
    while let Some(msg) = subscriber.next().await {
        match serde_json::from_slice::<MemberEvent>(&msg.payload) {
            Ok(event) => {
                debug!("Member update: {:?}", event);
                event.apply(&mut members.write());
            }
            Err(e) => debug!("Ignoring malformed member event: {}", e),
        }
    }
}

/// Connection to one voice channel through the gateway
pub struct NatsVoiceConnection {
    client: Client,
    prefix: String,
    channel_id: String,
    self_id: String,
    members: Arc<RwLock<HashMap<String, Speaker>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NatsVoiceConnection {
    fn channel_subject(&self, name: &str) -> String {
        format!("{}.{}.{}", self.prefix, name, self.channel_id)
    }

    async fn play(&self, subject: String, frame: &[u8]) -> Result<()> {
        let message = PlayMessage {
            payload: base64::engine::general_purpose::STANDARD.encode(frame),
        };
        let payload = serde_json::to_vec(&message)?;

        self.client
            .publish(subject, payload.into())
            .await
            .context("Failed to publish audio")?;

        Ok(())
    }

    fn stop_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl MemberDirectory for NatsVoiceConnection {
    fn self_id(&self) -> &str {
        &self.self_id
    }

    fn resolve_member(&self, user_id: &str) -> Option<Speaker> {
        self.members.read().get(user_id).cloned()
    }
}

#[async_trait::async_trait]
impl VoiceConnection for NatsVoiceConnection {
    async fn announce(&self) -> Result<()> {
        self.client
            .publish(self.channel_subject("announce"), Vec::<u8>::new().into())
            .await
            .context("Failed to request announcement")?;
        Ok(())
    }

    async fn keepalive(&self) -> Result<()> {
        self.play(self.channel_subject("play"), &SILENT_FRAME).await
    }

    async fn disconnect(&self) -> Result<()> {
        info!("Leaving voice channel {}", self.channel_id);
        self.stop_tasks();
        leave_channel(&self.client, &self.prefix, &self.channel_id).await
    }
}

impl Drop for NatsVoiceConnection {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}
