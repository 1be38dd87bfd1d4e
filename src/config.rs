use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

/// How many buffered chunks each speaker gets written when recording stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopDrain {
    /// Write at most this many chunks per speaker, drop the rest
    Chunks(usize),
    /// Write everything still buffered
    All,
}

impl StopDrain {
    pub fn count(&self, buffered: usize) -> usize {
        match self {
            StopDrain::Chunks(n) => (*n).min(buffered),
            StopDrain::All => buffered,
        }
    }
}

impl Default for StopDrain {
    fn default() -> Self {
        StopDrain::Chunks(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Directory receiving the `<id>.ogg.*` files
    pub recordings_path: PathBuf,
    /// Buffered chunks per speaker before the oldest one is written out
    pub max_queue_length: usize,
    pub stop_drain: StopDrain,
    pub heartbeat_interval_ms: u64,
    pub connect_timeout_ms: u64,
    /// Capacity of the packet channel between transport and recorder
    pub packet_channel_capacity: usize,
    pub requester: RequesterConfig,
}

impl RecorderConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            recordings_path: PathBuf::from("rec"),
            max_queue_length: 16,
            stop_drain: StopDrain::default(),
            heartbeat_interval_ms: 3000,
            connect_timeout_ms: 10_000,
            packet_channel_capacity: 256,
            requester: RequesterConfig::default(),
        }
    }
}

/// Requester identity recorded in the info file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequesterConfig {
    pub name: String,
    pub id: String,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            name: "anUser#433443".to_string(),
            id: "1111111111111".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    /// Subject prefix of the voice gateway
    pub gateway_prefix: String,
    /// Subject prefix for start/stop commands and notifications
    pub control_prefix: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            gateway_prefix: "voice".to_string(),
            control_prefix: "recorder".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// JSON file holding the recovery state
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("rec/state.json"),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("RECORDER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
