//! Remote control of the recorder
//!
//! A controller turns external requests into [`ControlCommand`]s and reports
//! the outcome back to whoever asked.

pub mod messages;
pub mod nats;

use anyhow::Result;

use crate::state::ControllerState;

pub use nats::NatsController;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start { voice_channel_id: String },
    Stop,
}

#[async_trait::async_trait]
pub trait Controller: Send + Sync {
    /// Stable identifier, persisted so a restarted process can find the
    /// controller that owns a recording
    fn name(&self) -> &str;

    fn state(&self) -> ControllerState {
        ControllerState::named(self.name())
    }

    /// Whether a recording started through `state` may be resumed here
    fn can_resume(&self, state: &ControllerState) -> bool {
        state.name == self.name()
    }

    async fn send_message(&self, message: &str) -> Result<()>;

    async fn signal_started(&self, record_id: &str, voice_channel_id: &str) -> Result<()>;

    async fn signal_stopped(&self, ids: &[String]) -> Result<()>;
}
