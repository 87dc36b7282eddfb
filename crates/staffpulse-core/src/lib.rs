//! StaffPulse Core
//!
//! Types shared by the StaffPulse real-time server and client.
//!
//! This crate provides:
//! - Connection and principal identifiers
//! - Room names (per-user, support-chat, dashboard and broadcast rooms)
//! - The closed union of server-to-client events and their payloads
//! - Client-to-server messages
//! - Error types and result handling

pub mod error;
pub mod event;
pub mod message;
pub mod room;
pub mod types;

pub use error::{Error, Result};
pub use event::{
    AttendanceAction, AttendanceUpdate, DashboardUpdate, EmergencyAlert, Event, EventKind,
    LeaveStatus, LeaveStatusChanged, Notification, Priority, ServerEvent, SupportMessage,
    SystemAnnouncement, Target, Typing, UserPresence,
};
pub use message::ClientMessage;
pub use room::RoomName;
pub use types::{ConnectionId, PrincipalId, CLOSE_SERVER_DISCONNECT};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::event::{Event, EventKind, Priority, ServerEvent, Target};
    pub use crate::message::ClientMessage;
    pub use crate::room::RoomName;
    pub use crate::types::{ConnectionId, PrincipalId};
}
