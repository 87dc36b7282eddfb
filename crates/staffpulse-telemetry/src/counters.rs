//! Metrics collection and reporting

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metric names exported through the `metrics` facade
pub mod names {
    pub const CONNECTIONS_ADMITTED: &str = "staffpulse_connections_admitted_total";
    pub const CONNECTIONS_REJECTED: &str = "staffpulse_connections_rejected_total";
    pub const EVENTS_RELAYED: &str = "staffpulse_events_relayed_total";
    pub const DELIVERIES: &str = "staffpulse_deliveries_total";
    pub const DELIVERY_FAILURES: &str = "staffpulse_delivery_failures_total";
    pub const ONLINE_CONNECTIONS: &str = "staffpulse_online_connections";
}

/// Metrics collector shared by the registry, dispatcher and socket handlers
#[derive(Clone)]
pub struct RealtimeMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    admitted: AtomicU64,
    rejected: AtomicU64,
    removed: AtomicU64,
    events_relayed: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
}

impl RealtimeMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                admitted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
                removed: AtomicU64::new(0),
                events_relayed: AtomicU64::new(0),
                deliveries: AtomicU64::new(0),
                delivery_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Describe exported metrics once the recorder is installed
    pub fn describe() {
        ::metrics::describe_counter!(
            names::CONNECTIONS_ADMITTED,
            "Connections admitted after a successful handshake"
        );
        ::metrics::describe_counter!(
            names::CONNECTIONS_REJECTED,
            "Handshakes refused for a missing or invalid credential"
        );
        ::metrics::describe_counter!(names::EVENTS_RELAYED, "Events handed to the registry");
        ::metrics::describe_counter!(
            names::DELIVERIES,
            "Per-connection deliveries that reached the outbound queue"
        );
        ::metrics::describe_counter!(
            names::DELIVERY_FAILURES,
            "Per-connection deliveries dropped because the queue was full or closed"
        );
        ::metrics::describe_gauge!(names::ONLINE_CONNECTIONS, "Currently admitted connections");
    }

    /// Record an admitted connection
    pub fn record_admitted(&self, online: usize) {
        self.inner.admitted.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(names::CONNECTIONS_ADMITTED).increment(1);
        ::metrics::gauge!(names::ONLINE_CONNECTIONS).set(online as f64);
    }

    /// Record a refused handshake
    pub fn record_rejected(&self) {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(names::CONNECTIONS_REJECTED).increment(1);
    }

    /// Record a removed connection
    pub fn record_removed(&self, online: usize) {
        self.inner.removed.fetch_add(1, Ordering::Relaxed);
        ::metrics::gauge!(names::ONLINE_CONNECTIONS).set(online as f64);
    }

    /// Record one relayed event and its per-recipient outcome
    pub fn record_relay(&self, delivered: u64, failed: u64) {
        self.inner.events_relayed.fetch_add(1, Ordering::Relaxed);
        self.inner.deliveries.fetch_add(delivered, Ordering::Relaxed);
        self.inner
            .delivery_failures
            .fetch_add(failed, Ordering::Relaxed);

        ::metrics::counter!(names::EVENTS_RELAYED).increment(1);
        ::metrics::counter!(names::DELIVERIES).increment(delivered);
        if failed > 0 {
            ::metrics::counter!(names::DELIVERY_FAILURES).increment(failed);
        }
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> RealtimeSnapshot {
        RealtimeSnapshot {
            admitted: self.inner.admitted.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            removed: self.inner.removed.load(Ordering::Relaxed),
            events_relayed: self.inner.events_relayed.load(Ordering::Relaxed),
            deliveries: self.inner.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.inner.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for RealtimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeSnapshot {
    pub admitted: u64,
    pub rejected: u64,
    pub removed: u64,
    pub events_relayed: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
}
