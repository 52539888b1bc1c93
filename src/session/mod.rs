//! Session layer: reconnecting session manager over a pluggable transport.

pub mod manager;
pub mod memory;
pub mod transport;
pub mod ws;

pub use manager::{ProgressListener, SessionManager};
pub use memory::MemoryTransport;
pub use transport::{InboundFrame, Transport, TransportFault};
pub use ws::WsTransport;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; no reconnect attempts are made past this point
    Shutdown,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Shutdown => "SHUTDOWN",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Notified on connect/disconnect transitions, and once at registration with
/// the current state.
pub trait ConnectionListener: Send + Sync {
    fn on_connection(&self);
    fn on_disconnection(&self);
}
