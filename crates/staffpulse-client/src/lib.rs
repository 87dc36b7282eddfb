//! StaffPulse Client
//!
//! Keeps one authenticated real-time connection alive for a browser or
//! desktop session and fans inbound events out to typed listeners.
//!
//! This crate provides:
//! - A connection manager with bounded exponential-backoff reconnect
//! - A pure, timer-free connection state machine
//! - Per-category listener registration with idempotent unsubscribe
//! - Priority-driven toast directives
//! - A tokio-tungstenite WebSocket transport behind a `Connector` trait

pub mod config;
pub mod error;
pub mod listeners;
pub mod machine;
pub mod manager;
pub mod state;
pub mod toast;
pub mod transport;

pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{ClientError, Result};
pub use listeners::{ListenerSet, Listeners, Subscription, SubscriptionId};
pub use machine::{Command, ConnectionMachine};
pub use manager::{ConnectionManager, Credentials};
pub use state::{ConnectionState, ConnectionStatus, DisconnectReason};
pub use toast::{display_for, ToastDirective, ToastSink, ToastStyle, TracingToastSink};
pub use transport::{Connector, RemoteEnd, TransportEvent, TransportLink, WsConnector};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::ClientConfig;
    pub use crate::error::{ClientError, Result};
    pub use crate::listeners::{Listeners, Subscription};
    pub use crate::manager::{ConnectionManager, Credentials};
    pub use crate::state::{ConnectionState, ConnectionStatus};
    pub use crate::transport::WsConnector;
}
