//! Recovery state
//!
//! While a recording runs, the IDs it produced and the channel it targets are
//! persisted so a restarted process can pick the recording back up.

pub mod store;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use store::{FileStateStore, MemoryStateStore, RecordingStore};

/// Identifies the controller that started a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    pub name: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ControllerState {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: Map::new(),
        }
    }
}

/// Persisted state of the current recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingState {
    /// Every record ID produced for this recording, one per (re)start
    pub records_ids: Vec<String>,
    pub voice_channel_id: String,
    #[serde(rename = "controllerState")]
    pub controller: Option<ControllerState>,
}
