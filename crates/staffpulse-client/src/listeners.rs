//! Typed listener fan-out
//!
//! Each event category owns a [`ListenerSet`]: an arena of callbacks keyed by
//! a [`SubscriptionId`]. Ids are monotonic, so the `BTreeMap` order is
//! registration order. Dispatch works on a snapshot taken before the first
//! callback runs, and every callback runs under `catch_unwind` so one
//! panicking subscriber cannot starve the others.

use parking_lot::Mutex;
use staffpulse_core::{
    AttendanceUpdate, DashboardUpdate, EmergencyAlert, LeaveStatusChanged, Notification,
    ServerEvent, SupportMessage, SystemAnnouncement, Typing, UserPresence,
};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

use crate::state::ConnectionStatus;
use crate::toast::{ToastDirective, ToastSink, TracingToastSink};

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Opaque handle identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

trait Detach: Send + Sync {
    fn detach(&self, id: SubscriptionId) -> bool;
}

/// Returned by every `on_*` registration.
///
/// Dropping it leaves the callback registered; call [`Subscription::unsubscribe`]
/// to remove it.
pub struct Subscription {
    id: SubscriptionId,
    set: Weak<dyn Detach>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove exactly this registration. Returns false if it was already
    /// gone; calling it again is harmless.
    pub fn unsubscribe(&self) -> bool {
        self.set
            .upgrade()
            .map(|set| set.detach(self.id))
            .unwrap_or(false)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Ordered callbacks for one category
pub struct ListenerSet<T> {
    label: &'static str,
    entries: Mutex<BTreeMap<SubscriptionId, Callback<T>>>,
}

impl<T: 'static> ListenerSet<T> {
    pub fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            entries: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.entries.lock().insert(id, Arc::new(callback));

        let set: Weak<Self> = Arc::downgrade(self);
        Subscription { id, set }
    }

    /// Deliver `payload` to every callback registered when dispatch began.
    /// Returns how many callbacks completed without panicking.
    pub fn dispatch(&self, payload: &T) -> usize {
        let snapshot: Vec<(SubscriptionId, Callback<T>)> = self
            .entries
            .lock()
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect();

        let mut completed = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => completed += 1,
                Err(_) => error!(category = self.label, subscription = %id, "Listener panicked"),
            }
        }
        completed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<T: 'static> Detach for ListenerSet<T> {
    fn detach(&self, id: SubscriptionId) -> bool {
        self.entries.lock().remove(&id).is_some()
    }
}

/// Per-category listener sets plus the toast side effects
#[derive(Clone)]
pub struct Listeners {
    inner: Arc<ListenersInner>,
}

struct ListenersInner {
    notification: Arc<ListenerSet<Notification>>,
    dashboard: Arc<ListenerSet<DashboardUpdate>>,
    attendance: Arc<ListenerSet<AttendanceUpdate>>,
    leave: Arc<ListenerSet<LeaveStatusChanged>>,
    support: Arc<ListenerSet<SupportMessage>>,
    typing: Arc<ListenerSet<Typing>>,
    announcement: Arc<ListenerSet<SystemAnnouncement>>,
    emergency: Arc<ListenerSet<EmergencyAlert>>,
    presence: Arc<ListenerSet<UserPresence>>,
    status: Arc<ListenerSet<ConnectionStatus>>,
    toasts: Arc<dyn ToastSink>,
}

impl Listeners {
    pub fn new(toasts: Arc<dyn ToastSink>) -> Self {
        Self {
            inner: Arc::new(ListenersInner {
                notification: ListenerSet::new("new-notification"),
                dashboard: ListenerSet::new("dashboard-update"),
                attendance: ListenerSet::new("attendance-update"),
                leave: ListenerSet::new("leave-status-changed"),
                support: ListenerSet::new("support-message"),
                typing: ListenerSet::new("typing"),
                announcement: ListenerSet::new("system-announcement"),
                emergency: ListenerSet::new("emergency-alert"),
                presence: ListenerSet::new("user-presence"),
                status: ListenerSet::new("connection-status"),
                toasts,
            }),
        }
    }

    pub fn on_notification(
        &self,
        f: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.notification.subscribe(f)
    }

    pub fn on_dashboard_update(
        &self,
        f: impl Fn(&DashboardUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.dashboard.subscribe(f)
    }

    pub fn on_attendance_update(
        &self,
        f: impl Fn(&AttendanceUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.attendance.subscribe(f)
    }

    pub fn on_leave_update(
        &self,
        f: impl Fn(&LeaveStatusChanged) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.leave.subscribe(f)
    }

    pub fn on_support_message(
        &self,
        f: impl Fn(&SupportMessage) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.support.subscribe(f)
    }

    pub fn on_typing(&self, f: impl Fn(&Typing) + Send + Sync + 'static) -> Subscription {
        self.inner.typing.subscribe(f)
    }

    pub fn on_system_announcement(
        &self,
        f: impl Fn(&SystemAnnouncement) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.announcement.subscribe(f)
    }

    pub fn on_emergency_alert(
        &self,
        f: impl Fn(&EmergencyAlert) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.emergency.subscribe(f)
    }

    pub fn on_user_presence(
        &self,
        f: impl Fn(&UserPresence) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.presence.subscribe(f)
    }

    pub fn on_connection_status(
        &self,
        f: impl Fn(&ConnectionStatus) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.status.subscribe(f)
    }

    /// Fan an inbound event out to its category, then raise its toast
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        let inner = &self.inner;
        let delivered = match event {
            ServerEvent::Notification(p) => inner.notification.dispatch(p),
            ServerEvent::DashboardUpdate(p) => inner.dashboard.dispatch(p),
            ServerEvent::AttendanceUpdate(p) => inner.attendance.dispatch(p),
            ServerEvent::LeaveStatusChanged(p) => inner.leave.dispatch(p),
            ServerEvent::SupportMessage(p) => inner.support.dispatch(p),
            ServerEvent::Typing(p) => inner.typing.dispatch(p),
            ServerEvent::SystemAnnouncement(p) => inner.announcement.dispatch(p),
            ServerEvent::EmergencyAlert(p) => inner.emergency.dispatch(p),
            ServerEvent::UserPresence(p) => inner.presence.dispatch(p),
        };

        if let Some(toast) = ToastDirective::for_event(event) {
            self.show(toast);
        }
        delivered
    }

    /// Report a connection status change
    pub fn dispatch_status(&self, status: &ConnectionStatus) -> usize {
        let delivered = self.inner.status.dispatch(status);

        if status.requires_refresh() {
            let message = if status.fatal {
                "Lost connection, please refresh"
            } else {
                "Disconnected by server, please refresh"
            };
            self.show(ToastDirective::refresh_required(message));
        }
        delivered
    }

    fn show(&self, toast: ToastDirective) {
        let toasts = &self.inner.toasts;
        if catch_unwind(AssertUnwindSafe(|| toasts.show(toast))).is_err() {
            error!("Toast sink panicked");
        }
    }
}

impl Default for Listeners {
    fn default() -> Self {
        Self::new(Arc::new(TracingToastSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ConnectionState, DisconnectReason};
    use crate::toast::ToastStyle;
    use staffpulse_core::{LeaveStatus, Priority};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingToasts {
        shown: Mutex<Vec<ToastDirective>>,
    }

    impl ToastSink for RecordingToasts {
        fn show(&self, toast: ToastDirective) {
            self.shown.lock().push(toast);
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&u32) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move |_: &u32| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn leave_event() -> ServerEvent {
        ServerEvent::LeaveStatusChanged(LeaveStatusChanged {
            leave_id: "L1".to_string(),
            employee_id: "u1".to_string(),
            status: LeaveStatus::Approved,
            approved_by: "mgr".to_string(),
            timestamp: chrono::Utc::now(),
        })
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let set = ListenerSet::<u32>::new("test");
        let (first, f1) = counter();
        let (third, f3) = counter();
        set.subscribe(f1);
        set.subscribe(|_: &u32| panic!("listener failure"));
        set.subscribe(f3);

        assert_eq!(set.dispatch(&7), 2);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(third.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let set = ListenerSet::<u32>::new("test");
        let (count, f) = counter();
        let sub = set.subscribe(f);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        set.dispatch(&1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn test_same_callback_registered_twice_is_removed_once() {
        let set = ListenerSet::<u32>::new("test");
        let count = Arc::new(AtomicUsize::new(0));
        let make = |count: &Arc<AtomicUsize>| {
            let count = Arc::clone(count);
            move |_: &u32| {
                count.fetch_add(1, Ordering::SeqCst);
            }
        };
        let first = set.subscribe(make(&count));
        let _second = set.subscribe(make(&count));

        first.unsubscribe();
        set.dispatch(&1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_unsubscribe_during_dispatch() {
        let set = ListenerSet::<u32>::new("test");
        let (later, f_later) = counter();

        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&victim);
        set.subscribe(move |_: &u32| {
            if let Some(sub) = slot.lock().as_ref() {
                sub.unsubscribe();
            }
        });
        *victim.lock() = Some(set.subscribe(f_later));

        // Current dispatch still reaches the snapshot; the next one does not
        set.dispatch(&1);
        set.dispatch(&2);
        assert_eq!(later.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_order_is_registration_order() {
        let set = ListenerSet::<u32>::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..4 {
            let order = Arc::clone(&order);
            set.subscribe(move |_: &u32| order.lock().push(n));
        }
        set.dispatch(&0);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_subscription_outlives_set() {
        let set = ListenerSet::<u32>::new("test");
        let sub = set.subscribe(|_| {});
        drop(set);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn test_events_reach_only_their_category() {
        let listeners = Listeners::default();
        let leaves = Arc::new(AtomicUsize::new(0));
        let notes = Arc::new(AtomicUsize::new(0));
        {
            let leaves = Arc::clone(&leaves);
            listeners.on_leave_update(move |change| {
                assert_eq!(change.leave_id, "L1");
                leaves.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let notes = Arc::clone(&notes);
            listeners.on_notification(move |_| {
                notes.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(listeners.dispatch(&leave_event()), 1);
        assert_eq!(leaves.load(Ordering::SeqCst), 1);
        assert_eq!(notes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_notification_raises_toast() {
        let toasts = Arc::new(RecordingToasts::default());
        let listeners = Listeners::new(toasts.clone());

        let note = Notification::new("n1", "Payslip", "Ready", Priority::High);
        listeners.dispatch(&ServerEvent::Notification(note));
        listeners.dispatch(&leave_event());

        let shown = toasts.shown.lock();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].style, ToastStyle::Error);
    }

    #[test]
    fn test_refresh_toast_on_fatal_status() {
        let toasts = Arc::new(RecordingToasts::default());
        let listeners = Listeners::new(toasts.clone());

        let mut status = ConnectionStatus::idle();
        status.state = ConnectionState::Closed;
        status.reason = Some(DisconnectReason::Rejected);
        listeners.dispatch_status(&status);
        assert!(toasts.shown.lock().is_empty());

        status.reason = Some(DisconnectReason::ConnectionLost);
        status.fatal = true;
        listeners.dispatch_status(&status);

        let shown = toasts.shown.lock();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].duration, None);
        assert_eq!(shown[0].message, "Lost connection, please refresh");
    }
}
