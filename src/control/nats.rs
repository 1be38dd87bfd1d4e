use anyhow::{Context, Result};
use async_nats::Client;
use futures::stream::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{self, InfoMessage, StartedMessage, StoppedMessage};
use super::{ControlCommand, Controller};

/// Controller driven by NATS subjects under a common prefix:
/// - `<prefix>.start` / `<prefix>.stop`: incoming commands
/// - `<prefix>.started` / `<prefix>.stopped` / `<prefix>.info`: replies
#[derive(Clone)]
pub struct NatsController {
    client: Client,
    prefix: String,
}

impl NatsController {
    pub const NAME: &'static str = "NATS";

    /// Connect to NATS server
    pub async fn connect(url: &str, prefix: &str) -> Result<Self> {
        info!("Connecting control channel to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        Ok(Self::new(client, prefix))
    }

    pub fn new(client: Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
        }
    }

    fn subject(&self, name: &str) -> String {
        format!("{}.{}", self.prefix, name)
    }

    async fn publish<T: Serialize>(&self, name: &str, message: &T) -> Result<()> {
        let subject = self.subject(name);
        let payload = serde_json::to_vec(message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish to {}", subject))?;

        self.client.flush().await.context("Failed to flush")?;

        debug!("Published to {}", subject);
        Ok(())
    }

    /// Subscribe to the command subjects and forward valid commands.
    ///
    /// Invalid start requests are answered on the info subject. The returned
    /// task ends when `commands` is closed or the subscriptions end.
    pub async fn listen(&self, commands: mpsc::Sender<ControlCommand>) -> Result<JoinHandle<()>> {
        let mut starts = self
            .client
            .subscribe(self.subject("start"))
            .await
            .context("Failed to subscribe to start requests")?;

        let mut stops = self
            .client
            .subscribe(self.subject("stop"))
            .await
            .context("Failed to subscribe to stop requests")?;

        info!("Listening for commands on {}.start / {}.stop", self.prefix, self.prefix);

        let controller = self.clone();

        Ok(tokio::spawn(async move {
            loop {
                let command = tokio::select! {
                    msg = starts.next() => match msg {
                        Some(msg) => match messages::parse_start(&msg.payload) {
                            Some(command) => command,
                            None => {
                                let payload = String::from_utf8_lossy(&msg.payload);
                                warn!("Invalid start request: {}", payload);
                                let reply = format!(
                                    "Couldn't start recording, invalid start payload {}",
                                    payload
                                );
                                if let Err(e) = controller.send_message(&reply).await {
                                    warn!("Failed to answer invalid start request: {:#}", e);
                                }
                                continue;
                            }
                        },
                        None => break,
                    },
                    msg = stops.next() => match msg {
                        Some(_) => ControlCommand::Stop,
                        None => break,
                    },
                };

                debug!("Received command {:?}", command);

                if commands.send(command).await.is_err() {
                    break;
                }
            }

            debug!("Command listener stopped");
        }))
    }
}

#[async_trait::async_trait]
impl Controller for NatsController {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn send_message(&self, message: &str) -> Result<()> {
        self.publish(
            "info",
            &InfoMessage {
                data: message.to_string(),
            },
        )
        .await
    }

    async fn signal_started(&self, record_id: &str, voice_channel_id: &str) -> Result<()> {
        self.publish(
            "started",
            &StartedMessage {
                record_id: record_id.to_string(),
                voice_channel_id: voice_channel_id.to_string(),
            },
        )
        .await
    }

    async fn signal_stopped(&self, ids: &[String]) -> Result<()> {
        self.publish("stopped", &StoppedMessage { ids: ids.to_vec() })
            .await
    }
}
