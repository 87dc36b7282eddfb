//! User-visible toasts raised as a side effect of dispatch

use serde::Serialize;
use staffpulse_core::{Priority, ServerEvent};
use std::time::Duration;

/// Visual class of a toast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastStyle {
    Error,
    Neutral,
    Success,
}

/// What the UI should display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToastDirective {
    pub title: String,
    pub message: String,
    /// `None` keeps the toast up until dismissed
    pub duration: Option<Duration>,
    pub style: ToastStyle,
}

/// Fixed priority to display lookup
pub fn display_for(priority: Priority) -> (Duration, ToastStyle) {
    match priority {
        Priority::Critical => (Duration::from_millis(10_000), ToastStyle::Error),
        Priority::High => (Duration::from_millis(5_000), ToastStyle::Error),
        Priority::Medium => (Duration::from_millis(5_000), ToastStyle::Neutral),
        Priority::Low => (Duration::from_millis(5_000), ToastStyle::Success),
        Priority::Unknown => (Duration::from_millis(5_000), ToastStyle::Neutral),
    }
}

impl ToastDirective {
    fn timed(title: &str, message: &str, priority: Priority) -> Self {
        let (duration, style) = display_for(priority);
        Self {
            title: title.to_string(),
            message: message.to_string(),
            duration: Some(duration),
            style,
        }
    }

    /// Toast for an inbound event, if its kind raises one
    pub fn for_event(event: &ServerEvent) -> Option<Self> {
        match event {
            ServerEvent::Notification(n) => Some(Self::timed(&n.title, &n.message, n.priority)),
            ServerEvent::SystemAnnouncement(a) => {
                Some(Self::timed(&a.title, &a.message, a.priority))
            }
            ServerEvent::EmergencyAlert(a) => {
                Some(Self::timed(&a.title, &a.message, Priority::Critical))
            }
            _ => None,
        }
    }

    /// Persistent error toast asking the user to reload
    pub fn refresh_required(message: impl Into<String>) -> Self {
        Self {
            title: "Connection".to_string(),
            message: message.into(),
            duration: None,
            style: ToastStyle::Error,
        }
    }
}

/// Where toasts go; the UI layer provides the real one
pub trait ToastSink: Send + Sync {
    fn show(&self, toast: ToastDirective);
}

/// Writes toasts to the log
pub struct TracingToastSink;

impl ToastSink for TracingToastSink {
    fn show(&self, toast: ToastDirective) {
        tracing::info!(
            title = %toast.title,
            style = ?toast.style,
            duration_ms = toast.duration.map(|d| d.as_millis() as u64),
            "{}",
            toast.message
        );
    }
}
