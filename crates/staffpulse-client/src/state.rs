//! Connection state reported to subscribers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle state of the managed connection.
///
/// `Idle -> Connecting -> Connected -> (Disconnected -> Reconnecting -> Connecting)* -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// Handshake in flight.
    Connecting,
    /// Admitted by the server.
    Connected,
    /// Transport lost; deciding what to do next.
    Disconnected,
    /// Waiting for the backoff timer.
    Reconnecting,
    /// Stopped. Only an explicit `connect` leaves this state.
    Closed,
}

impl ConnectionState {
    /// Returns true if the connection is active.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Why the connection left `Connected` or `Connecting`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The server closed the socket on purpose (close code 4000).
    ServerClosed,
    /// The handshake credential was refused.
    Rejected,
    /// Transport error while connecting or connected.
    TransportError(String),
    /// The handshake did not complete in time.
    HandshakeTimeout,
    /// The socket closed without a server-initiated close code.
    ConnectionLost,
    /// `disconnect()` was called.
    Voluntary,
}

impl DisconnectReason {
    /// Whether this reason feeds the reconnect policy.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransportError(_) | Self::HandshakeTimeout | Self::ConnectionLost
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerClosed => write!(f, "disconnected by server"),
            Self::Rejected => write!(f, "handshake rejected"),
            Self::TransportError(e) => write!(f, "transport error: {e}"),
            Self::HandshakeTimeout => write!(f, "handshake timed out"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::Voluntary => write!(f, "disconnected"),
        }
    }
}

/// Snapshot published on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Current reconnection attempt, 0 while connected.
    pub attempt: u32,
    /// Set when the connection dropped.
    pub reason: Option<DisconnectReason>,
    /// Backoff before the next attempt, while `Reconnecting`.
    pub next_retry: Option<Duration>,
    /// Reconnect budget exhausted.
    pub fatal: bool,
}

impl ConnectionStatus {
    pub fn idle() -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            reason: None,
            next_retry: None,
            fatal: false,
        }
    }

    /// Whether the user has to reload to get a live connection back.
    #[must_use]
    pub fn requires_refresh(&self) -> bool {
        self.state == ConnectionState::Closed
            && (self.fatal || self.reason == Some(DisconnectReason::ServerClosed))
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::idle()
    }
}
