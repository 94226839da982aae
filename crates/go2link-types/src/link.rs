//! Connection lifecycle enums.

use serde::{Deserialize, Serialize};

/// Which transport family a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Vendor SDK / DDS binding on the robot's network.
    Direct,
    /// JSON-over-WebSocket relay on an edge computer.
    Relay,
    /// WebRTC peer session with the robot's onboard controller.
    Peer,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Direct => write!(f, "direct"),
            TransportKind::Relay => write!(f, "relay"),
            TransportKind::Peer => write!(f, "peer"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" | "sdk" => Ok(TransportKind::Direct),
            "relay" | "websocket" | "ws" => Ok(TransportKind::Relay),
            "peer" | "webrtc" => Ok(TransportKind::Peer),
            other => Err(format!("unknown transport '{other}'")),
        }
    }
}

/// Coordinator-level connection state.
///
/// ```text
/// Idle → Connecting → Ready ⇄ Degraded → Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Ready,
    /// The transport lost its link and is retrying on its own backoff.
    Degraded,
    Disconnected,
}

impl ConnectionState {
    /// `true` while a transport is installed and has not been torn down.
    pub fn has_transport(self) -> bool {
        matches!(self, ConnectionState::Ready | ConnectionState::Degraded)
    }
}

/// Transport-level link report, delivered through the link-state callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// Link established (initially or after a reconnect).
    Up,
    /// Link lost; a reconnect attempt is pending.
    Reconnecting,
    /// Link closed for good.
    Down,
}
