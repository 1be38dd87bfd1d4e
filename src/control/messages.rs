use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ControlCommand;

/// Payload of a start request
#[derive(Debug, Serialize, Deserialize)]
pub struct StartMessage {
    #[serde(rename = "voiceChannelId", default)]
    pub voice_channel_id: Option<Value>,
}

impl StartMessage {
    /// Channel IDs are numeric, given either as a number or as a string of digits
    pub fn into_command(self) -> Option<ControlCommand> {
        let voice_channel_id = match self.voice_channel_id? {
            Value::String(id) if is_numeric_id(&id) => id,
            Value::Number(id) if id.is_u64() => id.to_string(),
            _ => return None,
        };

        Some(ControlCommand::Start { voice_channel_id })
    }
}

fn is_numeric_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

/// Published once a recording is running
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedMessage {
    pub record_id: String,
    pub voice_channel_id: String,
}

/// Published once a recording is finished, with every record ID it produced
#[derive(Debug, Serialize, Deserialize)]
pub struct StoppedMessage {
    pub ids: Vec<String>,
}

/// Free-form feedback for whoever sent a command
#[derive(Debug, Serialize, Deserialize)]
pub struct InfoMessage {
    pub data: String,
}

/// Decode a start request; `None` when the payload is unusable
pub fn parse_start(payload: &[u8]) -> Option<ControlCommand> {
    serde_json::from_slice::<StartMessage>(payload)
        .ok()?
        .into_command()
}
