use metrics_exporter_prometheus::PrometheusHandle;
use staffpulse_core::PrincipalId;
use staffpulse_telemetry::RealtimeMetrics;
use std::sync::Arc;

use crate::auth::PrincipalResolver;
use crate::config::ServerConfig;
use crate::dispatcher::EventDispatcher;
use crate::registry::ChannelRegistry;

/// Receives `mark-notification-read` acknowledgements.
///
/// The notification store lives with the HTTP backend; this is where it
/// plugs in. No reply is sent to the client either way.
pub trait ReadReceiptSink: Send + Sync {
    fn notification_read(&self, principal: &PrincipalId, notification_id: &str);
}

/// Default sink: records the receipt in the log only
pub struct LoggingReadReceipts;

impl ReadReceiptSink for LoggingReadReceipts {
    fn notification_read(&self, principal: &PrincipalId, notification_id: &str) {
        tracing::info!(user_id = %principal, notification_id, "Notification marked read");
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// Connection and room membership index
    pub registry: Arc<ChannelRegistry>,

    /// Domain trigger to event mapping
    pub dispatcher: Arc<EventDispatcher>,

    /// Handshake credential check
    pub resolver: Arc<dyn PrincipalResolver>,

    /// Read acknowledgement collaborator
    pub receipts: Arc<dyn ReadReceiptSink>,

    /// Connection and delivery counters
    pub metrics: RealtimeMetrics,

    /// Prometheus handle for `/metrics`, when a recorder is installed
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: ServerConfig, resolver: Arc<dyn PrincipalResolver>) -> Self {
        let metrics = RealtimeMetrics::new();
        let registry = Arc::new(ChannelRegistry::new(metrics.clone()));
        let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&registry)));

        Self {
            config: Arc::new(config),
            registry,
            dispatcher,
            resolver,
            receipts: Arc::new(LoggingReadReceipts),
            metrics,
            metrics_handle: None,
        }
    }

    pub fn with_read_receipts(mut self, receipts: Arc<dyn ReadReceiptSink>) -> Self {
        self.receipts = receipts;
        self
    }

    pub fn with_metrics_handle(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
