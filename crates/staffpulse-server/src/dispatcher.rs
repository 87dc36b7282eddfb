//! Event dispatcher
//!
//! Turns domain triggers raised by collaborator services into targeted
//! events and hands them to the registry. Routing is a pure mapping: the
//! caller has already applied the business rules (the leave really was
//! approved, the clock-in really was persisted).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use staffpulse_core::{
    AttendanceUpdate, DashboardUpdate, EmergencyAlert, Event, LeaveStatusChanged, Notification,
    PrincipalId, RoomName, ServerEvent, SupportMessage, SystemAnnouncement, Typing, UserPresence,
};
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::registry::ChannelRegistry;

/// A domain fact a collaborator wants pushed to connected clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "trigger", content = "payload", rename_all = "kebab-case")]
pub enum DomainTrigger {
    /// A notification row was written for `user_id`
    Notification {
        #[serde(rename = "userId")]
        user_id: String,
        notification: Notification,
    },
    DashboardUpdate(DashboardUpdate),
    AttendanceRecorded(AttendanceUpdate),
    LeaveDecided(LeaveStatusChanged),
    /// Agent-side reply in a support conversation
    SupportReply(SupportMessage),
    SystemAnnouncement(SystemAnnouncement),
    EmergencyAlert(EmergencyAlert),
}

/// Totals across every event produced by one trigger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub events: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Maps domain triggers to events and relays them
pub struct EventDispatcher {
    registry: Arc<ChannelRegistry>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<ChannelRegistry>) -> Self {
        Self { registry }
    }

    /// Route a trigger and relay every resulting event
    #[instrument(skip(self, trigger))]
    pub fn raise(&self, trigger: DomainTrigger) -> DispatchReport {
        let events = Self::route(trigger);
        self.relay_all(&events)
    }

    /// Compute the events and targets for a trigger without delivering them
    pub fn route(trigger: DomainTrigger) -> Vec<Event> {
        match trigger {
            DomainTrigger::Notification {
                user_id,
                notification,
            } => vec![Event::to_room(
                user_room(&user_id),
                ServerEvent::Notification(notification),
            )],
            DomainTrigger::DashboardUpdate(update) => vec![Event::to_room(
                RoomName::dashboard(),
                ServerEvent::DashboardUpdate(update),
            )],
            DomainTrigger::AttendanceRecorded(update) => {
                let summary = DashboardUpdate {
                    update_type: "attendance".to_string(),
                    action: Some(wire_label(&update.action)),
                    data: serde_json::json!({
                        "employeeId": update.employee_id,
                        "details": update.data,
                    }),
                    timestamp: update.timestamp,
                };
                vec![
                    Event::to_room(
                        user_room(&update.employee_id),
                        ServerEvent::AttendanceUpdate(update),
                    ),
                    Event::to_room(RoomName::dashboard(), ServerEvent::DashboardUpdate(summary)),
                ]
            }
            DomainTrigger::LeaveDecided(change) => {
                let summary = DashboardUpdate {
                    update_type: "leave".to_string(),
                    action: Some(wire_label(&change.status)),
                    data: serde_json::json!({
                        "leaveId": change.leave_id,
                        "employeeId": change.employee_id,
                    }),
                    timestamp: change.timestamp,
                };
                vec![
                    Event::to_room(
                        user_room(&change.employee_id),
                        ServerEvent::LeaveStatusChanged(change),
                    ),
                    Event::to_room(RoomName::dashboard(), ServerEvent::DashboardUpdate(summary)),
                ]
            }
            DomainTrigger::SupportReply(message) => {
                let room = support_room(message.conversation_id.as_deref(), &message.user_id);
                vec![Event::to_room(room, ServerEvent::SupportMessage(message))]
            }
            DomainTrigger::SystemAnnouncement(announcement) => {
                match announcement.target_users.clone().filter(|users| !users.is_empty()) {
                    Some(users) => users
                        .iter()
                        .map(|user| {
                            Event::to_room(
                                user_room(user),
                                ServerEvent::SystemAnnouncement(announcement.clone()),
                            )
                        })
                        .collect(),
                    None => vec![Event::broadcast(ServerEvent::SystemAnnouncement(
                        announcement,
                    ))],
                }
            }
            DomainTrigger::EmergencyAlert(alert) => {
                vec![Event::broadcast(ServerEvent::EmergencyAlert(alert.normalized()))]
            }
        }
    }

    pub fn notify_user(&self, user_id: &str, notification: Notification) -> DispatchReport {
        self.raise(DomainTrigger::Notification {
            user_id: user_id.to_string(),
            notification,
        })
    }

    pub fn leave_status_changed(&self, change: LeaveStatusChanged) -> DispatchReport {
        self.raise(DomainTrigger::LeaveDecided(change))
    }

    pub fn attendance_recorded(&self, update: AttendanceUpdate) -> DispatchReport {
        self.raise(DomainTrigger::AttendanceRecorded(update))
    }

    pub fn emergency_alert(&self, alert: EmergencyAlert) -> DispatchReport {
        self.raise(DomainTrigger::EmergencyAlert(alert))
    }

    /// Relay a support message written by a connected user.
    ///
    /// The sender id is taken from the authenticated principal, never from
    /// the payload.
    pub fn support_message(
        &self,
        sender: &PrincipalId,
        mut message: SupportMessage,
    ) -> DispatchReport {
        message.user_id = sender.to_string();
        let room = support_room(message.conversation_id.as_deref(), sender.as_str());
        self.relay_all(&[Event::to_room(room, ServerEvent::SupportMessage(message))])
    }

    /// Relay a typing indicator to the sender's support conversation
    pub fn typing(&self, sender: &PrincipalId, mut typing: Typing) -> DispatchReport {
        typing.user_id = sender.to_string();
        let room = support_room(typing.conversation_id.as_deref(), sender.as_str());
        self.relay_all(&[Event::to_room(room, ServerEvent::Typing(typing))])
    }

    /// Broadcast that a user came online or went offline
    pub fn presence(
        &self,
        user: &PrincipalId,
        online: bool,
        online_count: usize,
    ) -> DispatchReport {
        let presence = UserPresence {
            user_id: user.to_string(),
            online,
            online_count,
            timestamp: Utc::now(),
        };
        self.relay_all(&[Event::broadcast(ServerEvent::UserPresence(presence))])
    }

    fn relay_all(&self, events: &[Event]) -> DispatchReport {
        let mut report = DispatchReport {
            events: events.len(),
            ..Default::default()
        };

        for event in events {
            match self.registry.relay(event) {
                Ok(relayed) => {
                    report.delivered += relayed.delivered;
                    report.failed += relayed.failed;
                }
                Err(e) => {
                    error!(
                        kind = %event.kind(),
                        target = %event.target(),
                        error = %e,
                        "Relay failed"
                    );
                }
            }
        }

        debug!(
            events = report.events,
            delivered = report.delivered,
            failed = report.failed,
            "Dispatched"
        );
        report
    }
}

fn user_room(user_id: &str) -> RoomName {
    RoomName::user(&PrincipalId::from(user_id))
}

fn support_room(conversation: Option<&str>, fallback_user: &str) -> RoomName {
    let conversation = conversation
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(fallback_user);
    RoomName::support(conversation)
}

/// Serialize a unit enum to its bare wire label (`CLOCK_IN`, `APPROVED`)
fn wire_label<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}
