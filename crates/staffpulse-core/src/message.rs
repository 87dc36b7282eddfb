//! Client-to-server messages

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::{SupportMessage, Typing};
use crate::room::RoomName;

/// Everything a client may send once its connection is admitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join the personal room `user-<userId>`
    JoinUserRoom {
        #[serde(rename = "userId")]
        user_id: String,
    },
    JoinRoom { room: RoomName },
    LeaveRoom { room: RoomName },
    /// Follow the live dashboard feed
    SubscribeDashboard,
    SupportMessage(SupportMessage),
    Typing(Typing),
    /// Fire-and-forget read acknowledgement; the server sends no reply
    MarkNotificationRead {
        #[serde(rename = "notificationId")]
        notification_id: String,
    },
}

impl ClientMessage {
    /// Wire name carried in the `event` field
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinUserRoom { .. } => "join-user-room",
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom { .. } => "leave-room",
            Self::SubscribeDashboard => "subscribe-dashboard",
            Self::SupportMessage(_) => "support-message",
            Self::Typing(_) => "typing",
            Self::MarkNotificationRead { .. } => "mark-notification-read",
        }
    }

    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_frame(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}
