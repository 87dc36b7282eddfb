//! Channel/room registry
//!
//! Tracks which admitted connection belongs to which rooms and relays events
//! to room members. The connection -> rooms and room -> connections indexes
//! live behind one mutex; every mutation is a single map update under it.
//!
//! Delivery never happens under the lock: `relay` snapshots the recipients'
//! outbound queues, releases the lock, then enqueues without waiting. A full
//! or closed queue fails that recipient only.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use staffpulse_core::{ConnectionId, Event, PrincipalId, RoomName, Target};
use staffpulse_telemetry::RealtimeMetrics;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Frames queued for a single connection's socket writer
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Pre-encoded event, shared across all recipients of one relay
    Frame(Arc<str>),
    /// Close the socket with the given code
    Close { code: u16, reason: String },
}

pub type OutboundSender = mpsc::Sender<Outbound>;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("principal id must not be empty")]
    MissingPrincipal,

    #[error("connection {0} is already admitted")]
    AlreadyAdmitted(ConnectionId),

    #[error("connection {0} is not admitted")]
    NotAdmitted(ConnectionId),

    #[error("room {0} is reserved and cannot be joined")]
    ReservedRoom(RoomName),

    #[error("failed to encode event: {0}")]
    Encode(#[from] staffpulse_core::Error),
}

/// Outcome of admitting a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Personal room the connection was auto-joined to
    pub personal_room: RoomName,
    pub online_count: usize,
    /// True when no other connection of the same principal was online
    pub first_for_principal: bool,
}

/// Outcome of removing a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub principal: PrincipalId,
    pub rooms: Vec<RoomName>,
    pub online_count: usize,
    /// True when this was the principal's last connection
    pub last_for_principal: bool,
}

/// Per-recipient result of one relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub failed: usize,
}

impl RelayReport {
    pub fn recipients(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Read-only view of one connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub principal: PrincipalId,
    pub rooms: Vec<RoomName>,
    pub connected_since: DateTime<Utc>,
}

struct ConnectionEntry {
    principal: PrincipalId,
    rooms: HashSet<RoomName>,
    connected_since: DateTime<Utc>,
    sender: OutboundSender,
}

#[derive(Default)]
struct Index {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<RoomName, HashSet<ConnectionId>>,
    principals: HashMap<PrincipalId, HashSet<ConnectionId>>,
}

impl Index {
    fn add_member(&mut self, id: ConnectionId, room: &RoomName) -> Result<bool, RegistryError> {
        if room.is_broadcast() {
            return Err(RegistryError::ReservedRoom(room.clone()));
        }
        let entry = self
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::NotAdmitted(id))?;
        if !entry.rooms.insert(room.clone()) {
            return Ok(false);
        }
        self.rooms.entry(room.clone()).or_default().insert(id);
        Ok(true)
    }

    fn remove_member(&mut self, id: ConnectionId, room: &RoomName) -> Result<bool, RegistryError> {
        let entry = self
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::NotAdmitted(id))?;
        if !entry.rooms.remove(room) {
            return Ok(false);
        }
        self.detach_from_room(id, room);
        Ok(true)
    }

    /// Drop `id` from the room's member set, collecting the room when empty
    fn detach_from_room(&mut self, id: ConnectionId, room: &RoomName) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }
}

/// Registry of admitted connections and their room memberships
pub struct ChannelRegistry {
    index: Mutex<Index>,
    metrics: RealtimeMetrics,
}

impl ChannelRegistry {
    pub fn new(metrics: RealtimeMetrics) -> Self {
        Self {
            index: Mutex::new(Index::default()),
            metrics,
        }
    }

    /// Register an authenticated connection and auto-join its personal room
    pub fn admit(
        &self,
        id: ConnectionId,
        principal: PrincipalId,
        sender: OutboundSender,
    ) -> Result<Admission, RegistryError> {
        if principal.as_str().trim().is_empty() {
            return Err(RegistryError::MissingPrincipal);
        }

        let personal_room = RoomName::user(&principal);
        let (online_count, first_for_principal) = {
            let mut index = self.index.lock();
            if index.connections.contains_key(&id) {
                return Err(RegistryError::AlreadyAdmitted(id));
            }

            index.connections.insert(
                id,
                ConnectionEntry {
                    principal: principal.clone(),
                    rooms: HashSet::new(),
                    connected_since: Utc::now(),
                    sender,
                },
            );
            index.add_member(id, &personal_room)?;

            let sessions = index.principals.entry(principal.clone()).or_default();
            sessions.insert(id);
            let first = sessions.len() == 1;

            (index.connections.len(), first)
        };

        self.metrics.record_admitted(online_count);
        debug!(conn_id = %id, user_id = %principal, online = online_count, "Connection admitted");

        Ok(Admission {
            personal_room,
            online_count,
            first_for_principal,
        })
    }

    /// Add a connection to a room. Returns false if it was already a member.
    pub fn join(&self, id: ConnectionId, room: &RoomName) -> Result<bool, RegistryError> {
        let joined = self.index.lock().add_member(id, room)?;
        if joined {
            debug!(conn_id = %id, room = %room, "Joined room");
        }
        Ok(joined)
    }

    /// Remove a connection from a room. Returns false if it was not a member.
    pub fn leave(&self, id: ConnectionId, room: &RoomName) -> Result<bool, RegistryError> {
        let left = self.index.lock().remove_member(id, room)?;
        if left {
            debug!(conn_id = %id, room = %room, "Left room");
        }
        Ok(left)
    }

    /// Deliver an event to every connection currently in its target.
    ///
    /// At-most-once: connections that are not members right now never see it.
    pub fn relay(&self, event: &Event) -> Result<RelayReport, RegistryError> {
        let frame: Arc<str> = Arc::from(event.payload().to_frame()?);
        let recipients = self.recipients(event.target());

        let mut report = RelayReport::default();
        for (id, sender) in recipients {
            match sender.try_send(Outbound::Frame(Arc::clone(&frame))) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.failed += 1;
                    warn!(conn_id = %id, kind = %event.kind(), "Outbound queue full, dropping");
                }
                Err(TrySendError::Closed(_)) => {
                    report.failed += 1;
                    debug!(conn_id = %id, kind = %event.kind(), "Outbound queue closed, dropping");
                }
            }
        }

        self.metrics
            .record_relay(report.delivered as u64, report.failed as u64);
        debug!(
            kind = %event.kind(),
            target = %event.target(),
            delivered = report.delivered,
            failed = report.failed,
            "Relayed event"
        );
        Ok(report)
    }

    /// Strip a disconnected connection from every room it belonged to
    pub fn remove(&self, id: ConnectionId) -> Option<Departure> {
        let departure = {
            let mut index = self.index.lock();
            let entry = index.connections.remove(&id)?;

            for room in &entry.rooms {
                index.detach_from_room(id, room);
            }

            let mut last_for_principal = false;
            if let Some(sessions) = index.principals.get_mut(&entry.principal) {
                sessions.remove(&id);
                if sessions.is_empty() {
                    index.principals.remove(&entry.principal);
                    last_for_principal = true;
                }
            }

            let mut rooms: Vec<RoomName> = entry.rooms.into_iter().collect();
            rooms.sort();

            Departure {
                principal: entry.principal,
                rooms,
                online_count: index.connections.len(),
                last_for_principal,
            }
        };

        self.metrics.record_removed(departure.online_count);
        debug!(
            conn_id = %id,
            user_id = %departure.principal,
            online = departure.online_count,
            "Connection removed"
        );
        Some(departure)
    }

    /// Ask every connection of a principal to close with `code`.
    ///
    /// Membership is cleaned up by `remove` once each socket task exits.
    pub fn evict(&self, principal: &PrincipalId, code: u16, reason: &str) -> usize {
        let senders: Vec<(ConnectionId, OutboundSender)> = {
            let index = self.index.lock();
            index
                .principals
                .get(principal)
                .into_iter()
                .flatten()
                .filter_map(|id| {
                    index
                        .connections
                        .get(id)
                        .map(|entry| (*id, entry.sender.clone()))
                })
                .collect()
        };

        let mut signalled = 0;
        for (id, sender) in senders {
            let close = Outbound::Close {
                code,
                reason: reason.to_string(),
            };
            match sender.try_send(close) {
                Ok(()) => signalled += 1,
                Err(e) => warn!(conn_id = %id, error = %e, "Failed to signal eviction"),
            }
        }
        signalled
    }

    fn recipients(&self, target: &Target) -> Vec<(ConnectionId, OutboundSender)> {
        let index = self.index.lock();
        match target {
            Target::Room(room) if room.is_broadcast() => index
                .connections
                .iter()
                .map(|(id, entry)| (*id, entry.sender.clone()))
                .collect(),
            Target::Broadcast => index
                .connections
                .iter()
                .map(|(id, entry)| (*id, entry.sender.clone()))
                .collect(),
            Target::Room(room) => index
                .rooms
                .get(room)
                .into_iter()
                .flatten()
                .filter_map(|id| {
                    index
                        .connections
                        .get(id)
                        .map(|entry| (*id, entry.sender.clone()))
                })
                .collect(),
        }
    }

    /// Number of admitted connections
    pub fn online_count(&self) -> usize {
        self.index.lock().connections.len()
    }

    /// Number of distinct principals with at least one connection
    pub fn principal_count(&self) -> usize {
        self.index.lock().principals.len()
    }

    /// Number of non-empty rooms
    pub fn room_count(&self) -> usize {
        self.index.lock().rooms.len()
    }

    pub fn members(&self, room: &RoomName) -> Vec<ConnectionId> {
        self.index
            .lock()
            .rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, id: ConnectionId, room: &RoomName) -> bool {
        self.index
            .lock()
            .rooms
            .get(room)
            .is_some_and(|members| members.contains(&id))
    }

    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let index = self.index.lock();
        index.connections.get(&id).map(|entry| {
            let mut rooms: Vec<RoomName> = entry.rooms.iter().cloned().collect();
            rooms.sort();
            ConnectionInfo {
                id,
                principal: entry.principal.clone(),
                rooms,
                connected_since: entry.connected_since,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use staffpulse_core::{Notification, Priority, ServerEvent};

    fn registry() -> ChannelRegistry {
        ChannelRegistry::new(RealtimeMetrics::new())
    }

    fn admit(
        registry: &ChannelRegistry,
        user: &str,
    ) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(8);
        registry.admit(id, PrincipalId::from(user), tx).unwrap();
        (id, rx)
    }

    fn notification() -> ServerEvent {
        ServerEvent::Notification(Notification::new("n1", "Payslip", "Ready", Priority::Low))
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> usize {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[test]
    fn test_admit_joins_personal_room() {
        let registry = registry();
        let (id, _rx) = admit(&registry, "u1");

        let room = RoomName::user(&PrincipalId::from("u1"));
        assert!(registry.is_member(id, &room));
        assert_eq!(registry.online_count(), 1);
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn test_admit_rejects_empty_principal_and_duplicates() {
        let registry = registry();
        let id = ConnectionId::generate();
        let (tx, _rx) = mpsc::channel(1);

        assert!(matches!(
            registry.admit(id, PrincipalId::from(""), tx.clone()),
            Err(RegistryError::MissingPrincipal)
        ));
        assert_eq!(registry.online_count(), 0);

        registry.admit(id, PrincipalId::from("u1"), tx.clone()).unwrap();
        assert!(matches!(
            registry.admit(id, PrincipalId::from("u1"), tx),
            Err(RegistryError::AlreadyAdmitted(_))
        ));
    }

    #[test]
    fn test_second_tab_is_not_first_for_principal() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(1);
        let first = registry
            .admit(ConnectionId::generate(), PrincipalId::from("u1"), tx.clone())
            .unwrap();
        let second = registry
            .admit(ConnectionId::generate(), PrincipalId::from("u1"), tx)
            .unwrap();

        assert!(first.first_for_principal);
        assert!(!second.first_for_principal);
        assert_eq!(second.online_count, 2);
        assert_eq!(registry.principal_count(), 1);
    }

    #[test]
    fn test_join_and_leave_are_idempotent() {
        let registry = registry();
        let (id, _rx) = admit(&registry, "u1");
        let room = RoomName::parse("hr-ops").unwrap();

        assert!(registry.join(id, &room).unwrap());
        assert!(!registry.join(id, &room).unwrap());
        assert_eq!(registry.members(&room), vec![id]);

        assert!(registry.leave(id, &room).unwrap());
        assert!(!registry.leave(id, &room).unwrap());
        assert!(registry.members(&room).is_empty());
    }

    #[test]
    fn test_last_leave_collects_room() {
        let registry = registry();
        let (a, _ra) = admit(&registry, "a");
        let (b, _rb) = admit(&registry, "b");
        let room = RoomName::support("c1");

        registry.join(a, &room).unwrap();
        registry.join(b, &room).unwrap();
        let before = registry.room_count();

        registry.leave(a, &room).unwrap();
        assert_eq!(registry.room_count(), before);
        registry.leave(b, &room).unwrap();
        assert_eq!(registry.room_count(), before - 1);
    }

    #[test]
    fn test_membership_requires_admission() {
        let registry = registry();
        let stranger = ConnectionId::generate();
        assert!(matches!(
            registry.join(stranger, &RoomName::dashboard()),
            Err(RegistryError::NotAdmitted(_))
        ));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_relay_is_room_isolated() {
        let registry = registry();
        let (_a, mut ra) = admit(&registry, "A");
        let (_a2, mut ra2) = admit(&registry, "A");
        let (b, mut rb) = admit(&registry, "B");
        registry.join(b, &RoomName::dashboard()).unwrap();

        let event = Event::to_room(RoomName::user(&PrincipalId::from("A")), notification());
        let report = registry.relay(&event).unwrap();

        assert_eq!(report, RelayReport { delivered: 2, failed: 0 });
        assert_eq!(drain(&mut ra), 1);
        assert_eq!(drain(&mut ra2), 1);
        assert_eq!(drain(&mut rb), 0);
    }

    #[test]
    fn test_relay_to_empty_room_delivers_nothing() {
        let registry = registry();
        let (_a, mut ra) = admit(&registry, "A");

        let event = Event::to_room(RoomName::support("nobody"), notification());
        assert_eq!(registry.relay(&event).unwrap().recipients(), 0);
        assert_eq!(drain(&mut ra), 0);
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let registry = registry();
        let (_a, mut ra) = admit(&registry, "A");
        let (_b, mut rb) = admit(&registry, "B");

        let report = registry.relay(&Event::broadcast(notification())).unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(drain(&mut ra), 1);
        assert_eq!(drain(&mut rb), 1);
    }

    #[test]
    fn test_broadcast_room_name_reaches_everyone() {
        let registry = registry();
        let (_a, mut ra) = admit(&registry, "A");
        let (_b, mut rb) = admit(&registry, "B");

        let by_name = Event::to_room(RoomName::broadcast(), notification());
        assert_eq!(registry.relay(&by_name).unwrap().delivered, 2);

        let raw = Event::new(notification(), Target::Room(RoomName::broadcast()));
        assert_eq!(registry.relay(&raw).unwrap().delivered, 2);

        assert_eq!(drain(&mut ra), 2);
        assert_eq!(drain(&mut rb), 2);
    }

    #[test]
    fn test_broadcast_room_cannot_be_joined() {
        let registry = registry();
        let (a, _ra) = admit(&registry, "A");
        let rooms_before = registry.room_count();

        assert!(matches!(
            registry.join(a, &RoomName::broadcast()),
            Err(RegistryError::ReservedRoom(_))
        ));
        assert!(!registry.leave(a, &RoomName::broadcast()).unwrap());
        assert_eq!(registry.room_count(), rooms_before);
    }

    #[test]
    fn test_relay_isolates_failed_recipient() {
        let registry = registry();
        let (a, ra) = admit(&registry, "A");
        let (b, mut rb) = admit(&registry, "B");
        let room = RoomName::dashboard();
        registry.join(a, &room).unwrap();
        registry.join(b, &room).unwrap();

        // A's socket writer is gone but A has not been removed yet
        drop(ra);

        let event = Event::to_room(room, notification());
        let report = registry.relay(&event).unwrap();
        assert_eq!(report, RelayReport { delivered: 1, failed: 1 });
        assert_eq!(drain(&mut rb), 1);
    }

    #[test]
    fn test_full_queue_fails_only_that_recipient() {
        let registry = registry();
        let slow = ConnectionId::generate();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        registry
            .admit(slow, PrincipalId::from("slow"), slow_tx)
            .unwrap();
        let (_fast, mut fast_rx) = admit(&registry, "fast");

        let event = Event::broadcast(notification());
        registry.relay(&event).unwrap();
        let report = registry.relay(&event).unwrap();

        assert_eq!(report, RelayReport { delivered: 1, failed: 1 });
        assert_eq!(drain(&mut fast_rx), 2);
    }

    #[test]
    fn test_remove_strips_all_rooms() {
        let registry = registry();
        let (a, _ra) = admit(&registry, "A");
        registry.join(a, &RoomName::dashboard()).unwrap();
        registry.join(a, &RoomName::support("A")).unwrap();

        let departure = registry.remove(a).unwrap();
        assert_eq!(departure.principal, PrincipalId::from("A"));
        assert_eq!(departure.rooms.len(), 3);
        assert_eq!(departure.online_count, 0);
        assert!(departure.last_for_principal);
        assert_eq!(registry.room_count(), 0);
        assert!(registry.connection(a).is_none());

        assert!(registry.remove(a).is_none());
    }

    #[test]
    fn test_evict_signals_every_session() {
        let registry = registry();
        let (_a1, mut r1) = admit(&registry, "A");
        let (_a2, mut r2) = admit(&registry, "A");
        let (_b, mut rb) = admit(&registry, "B");

        let signalled = registry.evict(&PrincipalId::from("A"), 4000, "account disabled");
        assert_eq!(signalled, 2);
        for rx in [&mut r1, &mut r2] {
            assert_eq!(
                rx.try_recv().unwrap(),
                Outbound::Close {
                    code: 4000,
                    reason: "account disabled".to_string()
                }
            );
        }
        assert!(rb.try_recv().is_err());
    }

    proptest! {
        #[test]
        fn prop_repeated_joins_keep_single_membership(repeats in 1usize..8, leaves in 0usize..4) {
            let registry = registry();
            let (id, _rx) = admit(&registry, "p");
            let room = RoomName::parse("team").unwrap();

            for _ in 0..repeats {
                registry.join(id, &room).unwrap();
            }
            prop_assert_eq!(registry.members(&room).len(), 1);

            for _ in 0..leaves {
                registry.leave(id, &room).unwrap();
            }
            let expected = if leaves == 0 { 1 } else { 0 };
            prop_assert_eq!(registry.members(&room).len(), expected);
        }
    }
}
