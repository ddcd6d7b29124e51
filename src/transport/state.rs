use serde::{Deserialize, Serialize};

/// Lifecycle of the single transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Initializing,
    Connecting,
    Connected,
    Disconnected,
    Suspended,
    Failed,
    Closed,
}

/// Attach lifecycle of a channel. `Detached` and `Failed` are terminal for a
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Initialized,
    Attaching,
    Attached,
    Detaching,
    Detached,
    Failed,
}

impl ChannelState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Detached | ChannelState::Failed)
    }
}
