//! StaffPulse Telemetry
//!
//! Counters for the real-time server: admissions, rejections, relays and
//! per-recipient delivery outcomes. Every update is also mirrored into the
//! `metrics` facade so an installed exporter can scrape it.

pub mod counters;

pub use counters::{RealtimeMetrics, RealtimeSnapshot};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::counters::{RealtimeMetrics, RealtimeSnapshot};
}
