//! Server-to-client events
//!
//! Every event the server can push is a variant of [`ServerEvent`], so a
//! subscriber for one kind sees a statically known payload shape. On the wire
//! an event is `{"event": "<wire-name>", "data": {...}}` with camelCase fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::room::RoomName;

/// Urgency of a notification or announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
    /// Any priority string this build does not recognize
    Unknown,
}

impl Priority {
    /// Parse a wire priority, case-insensitively. Never fails.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Self::Low,
            "MEDIUM" => Self::Medium,
            "HIGH" => Self::High,
            "CRITICAL" => Self::Critical,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for Priority {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Category of an event, used for routing and subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Notification,
    DashboardUpdate,
    AttendanceUpdate,
    LeaveStatusChanged,
    SupportMessage,
    Typing,
    SystemAnnouncement,
    EmergencyAlert,
    UserPresence,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        Self::Notification,
        Self::DashboardUpdate,
        Self::AttendanceUpdate,
        Self::LeaveStatusChanged,
        Self::SupportMessage,
        Self::Typing,
        Self::SystemAnnouncement,
        Self::EmergencyAlert,
        Self::UserPresence,
    ];

    /// Event name used in the `event` field on the wire
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Notification => "new-notification",
            Self::DashboardUpdate => "dashboard-update",
            Self::AttendanceUpdate => "attendance-update",
            Self::LeaveStatusChanged => "leave-status-changed",
            Self::SupportMessage => "support-message",
            Self::Typing => "typing",
            Self::SystemAnnouncement => "system-announcement",
            Self::EmergencyAlert => "emergency-alert",
            Self::UserPresence => "user-presence",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// `new-notification` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: message.into(),
            notification_type: "GENERAL".to_string(),
            priority,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_type(mut self, notification_type: impl Into<String>) -> Self {
        self.notification_type = notification_type.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// `dashboard-update` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardUpdate {
    #[serde(rename = "type")]
    pub update_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceAction {
    ClockIn,
    ClockOut,
    BreakStart,
    BreakEnd,
}

/// `attendance-update` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceUpdate {
    pub employee_id: String,
    pub action: AttendanceAction,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaveStatus {
    Approved,
    Rejected,
}

/// `leave-status-changed` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveStatusChanged {
    pub leave_id: String,
    pub employee_id: String,
    pub status: LeaveStatus,
    pub approved_by: String,
    pub timestamp: DateTime<Utc>,
}

/// `support-message` payload, sent in both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportMessage {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub message_type: String,
    /// Conversation the message belongs to; the sender's own id when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// `typing` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub is_typing: bool,
}

/// `system-announcement` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemAnnouncement {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_roles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_users: Option<Vec<String>>,
}

/// `emergency-alert` payload. Priority is always `CRITICAL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlert {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(default = "critical")]
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_required: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evacuation_required: Option<bool>,
}

fn critical() -> Priority {
    Priority::Critical
}

impl EmergencyAlert {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: message.into(),
            priority: Priority::Critical,
            timestamp: Utc::now(),
            action_required: None,
            evacuation_required: None,
        }
    }

    /// Force the priority back to `CRITICAL` whatever the caller supplied
    pub fn normalized(mut self) -> Self {
        self.priority = Priority::Critical;
        self
    }
}

/// `user-presence` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub user_id: String,
    pub online: bool,
    pub online_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Closed union of everything the server pushes to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "new-notification")]
    Notification(Notification),
    #[serde(rename = "dashboard-update")]
    DashboardUpdate(DashboardUpdate),
    #[serde(rename = "attendance-update")]
    AttendanceUpdate(AttendanceUpdate),
    #[serde(rename = "leave-status-changed")]
    LeaveStatusChanged(LeaveStatusChanged),
    #[serde(rename = "support-message")]
    SupportMessage(SupportMessage),
    #[serde(rename = "typing")]
    Typing(Typing),
    #[serde(rename = "system-announcement")]
    SystemAnnouncement(SystemAnnouncement),
    #[serde(rename = "emergency-alert")]
    EmergencyAlert(EmergencyAlert),
    #[serde(rename = "user-presence")]
    UserPresence(UserPresence),
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Notification(_) => EventKind::Notification,
            Self::DashboardUpdate(_) => EventKind::DashboardUpdate,
            Self::AttendanceUpdate(_) => EventKind::AttendanceUpdate,
            Self::LeaveStatusChanged(_) => EventKind::LeaveStatusChanged,
            Self::SupportMessage(_) => EventKind::SupportMessage,
            Self::Typing(_) => EventKind::Typing,
            Self::SystemAnnouncement(_) => EventKind::SystemAnnouncement,
            Self::EmergencyAlert(_) => EventKind::EmergencyAlert,
            Self::UserPresence(_) => EventKind::UserPresence,
        }
    }

    /// Encode as a wire frame
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a wire frame
    pub fn from_frame(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}

/// Where an event should be delivered
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "room")]
pub enum Target {
    Room(RoomName),
    /// Every admitted connection
    Broadcast,
}

impl Target {
    /// Target a room; the reserved broadcast name becomes [`Target::Broadcast`]
    pub fn room(room: RoomName) -> Self {
        if room.is_broadcast() {
            Self::Broadcast
        } else {
            Self::Room(room)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room(room) => write!(f, "{}", room),
            Self::Broadcast => f.write_str("broadcast"),
        }
    }
}

/// An event bound to its target, stamped when it was emitted
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    payload: ServerEvent,
    target: Target,
    emitted_at: DateTime<Utc>,
}

impl Event {
    pub fn new(payload: ServerEvent, target: Target) -> Self {
        Self {
            payload,
            target,
            emitted_at: Utc::now(),
        }
    }

    pub fn to_room(room: RoomName, payload: ServerEvent) -> Self {
        Self::new(payload, Target::room(room))
    }

    pub fn broadcast(payload: ServerEvent) -> Self {
        Self::new(payload, Target::Broadcast)
    }

    pub fn payload(&self) -> &ServerEvent {
        &self.payload
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn emitted_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }
}
