//! Command status tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a command
///
/// Transitions are `pending → succeeded | failed`; terminal states never
/// transition back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    /// Accepted, not yet applied by the device
    Pending,
    /// Applied successfully
    Succeeded,
    /// Terminated with an error
    Failed,
}

impl CommandState {
    /// Whether the state is terminal
    pub fn is_terminal(self) -> bool {
        !matches!(self, CommandState::Pending)
    }
}

/// Status of a single command, as reported by a plugin or the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStatus {
    /// Command ID
    pub command_id: String,
    /// Plugin the command was addressed to
    pub plugin_id: String,
    /// Target device
    pub device_id: String,
    /// Target entity
    pub entity_id: String,
    /// Target entity's domain
    #[serde(default)]
    pub entity_type: String,
    /// Current lifecycle state
    pub state: CommandState,
    /// Error text for failed commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the command was accepted
    pub created_at: DateTime<Utc>,
    /// When the status last changed
    pub last_updated_at: DateTime<Utc>,
}
