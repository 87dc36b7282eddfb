//! Room names
//!
//! A room is a named fan-out group of connections. Rooms have no lifecycle of
//! their own on the wire: a name is all either side ever exchanges.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::types::PrincipalId;

const USER_PREFIX: &str = "user-";
const SUPPORT_PREFIX: &str = "support-";
const DASHBOARD_ROOM: &str = "dashboard";
const BROADCAST_ROOM: &str = "all-connected";
const MAX_ROOM_NAME_LEN: usize = 128;

/// Name of a fan-out group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomName(String);

impl RoomName {
    /// Validate an arbitrary room name received from a client
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_room("room name must not be empty"));
        }
        if name.len() > MAX_ROOM_NAME_LEN {
            return Err(Error::invalid_room(format!(
                "room name exceeds {} bytes",
                MAX_ROOM_NAME_LEN
            )));
        }
        Ok(Self(name))
    }

    /// Personal room of a user: `user-<id>`.
    ///
    /// Not length-checked: principal ids come from the resolver, not from a
    /// client, and clients reach their personal room through `join-user-room`
    /// rather than by name.
    pub fn user(principal: &PrincipalId) -> Self {
        Self(format!("{}{}", USER_PREFIX, principal))
    }

    /// Support-chat room of a conversation: `support-<conversation>`.
    ///
    /// Conversations are keyed by the owner's principal id, so this is not
    /// length-checked either.
    pub fn support(conversation: &str) -> Self {
        Self(format!("{}{}", SUPPORT_PREFIX, conversation))
    }

    /// Room of clients following the live dashboard feed
    pub fn dashboard() -> Self {
        Self(DASHBOARD_ROOM.to_string())
    }

    /// Reserved name addressing every admitted connection.
    ///
    /// Nobody joins it: an event targeted here is relayed as a broadcast.
    pub fn broadcast() -> Self {
        Self(BROADCAST_ROOM.to_string())
    }

    /// Returns the user id if this is a personal room
    pub fn user_id(&self) -> Option<&str> {
        self.0.strip_prefix(USER_PREFIX)
    }

    /// Returns the conversation id if this is a support-chat room
    pub fn support_conversation(&self) -> Option<&str> {
        self.0.strip_prefix(SUPPORT_PREFIX)
    }

    /// Whether this is the reserved broadcast name
    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_ROOM
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<RoomName> for String {
    fn from(room: RoomName) -> Self {
        room.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_room_naming() {
        let room = RoomName::user(&PrincipalId::from("u1"));
        assert_eq!(room.as_str(), "user-u1");
        assert_eq!(room.user_id(), Some("u1"));
        assert!(!room.is_broadcast());
    }

    #[test]
    fn test_well_known_rooms() {
        assert_eq!(RoomName::support("c-9").as_str(), "support-c-9");
        assert_eq!(RoomName::dashboard().as_str(), "dashboard");
        assert!(RoomName::broadcast().is_broadcast());
        assert_eq!(RoomName::dashboard().user_id(), None);
        assert_eq!(RoomName::support("c-9").support_conversation(), Some("c-9"));
        assert_eq!(RoomName::user(&PrincipalId::from("c-9")).support_conversation(), None);
    }

    #[test]
    fn test_personal_room_skips_length_limit() {
        let long_id = "p".repeat(MAX_ROOM_NAME_LEN);
        let room = RoomName::user(&PrincipalId::from(long_id.as_str()));
        assert_eq!(room.user_id(), Some(long_id.as_str()));
        assert!(RoomName::parse(room.as_str()).is_err());
    }

    #[test]
    fn test_parse_rejects_blank_and_oversized() {
        assert!(RoomName::parse("").is_err());
        assert!(RoomName::parse("   ").is_err());
        assert!(RoomName::parse("x".repeat(MAX_ROOM_NAME_LEN + 1)).is_err());
        assert!(RoomName::parse("payroll-team").is_ok());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: RoomName = serde_json::from_str("\"hr-ops\"").unwrap();
        assert_eq!(ok.as_str(), "hr-ops");
        assert!(serde_json::from_str::<RoomName>("\"\"").is_err());
    }
}
