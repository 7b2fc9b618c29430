//! # Error Monitoring Subsystem
//!
//! Error-event deduplication and real-time notification broadcast for the
//! catalog platform: stable fingerprinting of unstructured failure text,
//! time-windowed merge-or-insert persistence, rate-limited alerting with
//! independent cooldown state, and live fan-out to a dynamic set of
//! subscribers.
//!
//! ## Features
//!
//! - Deterministic keyword classification with severity escalation
//! - Stable failure fingerprints that ignore variable literals
//! - Batched, ordered ingestion into a deduplicating store
//! - Cooldown-gated admin notifications with bounded retention
//! - Acknowledgment with idempotent semantics and live fan-out
//! - NDJSON stream frames with late-attach replay of active alerts
//!
//! Data flows one way: application code feeds [`ErrorMonitor::submit`]
//! (analytics path, durable) and [`ErrorMonitor::notify`] (alerting path,
//! ephemeral). The two paths share classification and fingerprinting but
//! not storage.

pub mod broker;
pub mod classifier;
pub mod config;
pub mod fingerprint;
pub mod ingest;
pub mod logging;
pub mod retry;
pub mod store;
pub mod stream;
pub mod types;

use std::sync::Arc;

// The `config` crate, aliased so the module above keeps its natural name.
use ::config as config_rs;
use tracing::info;
use uuid::Uuid;

// Re-export commonly used types
pub use broker::{BrokerConfig, NotificationBroker};
pub use classifier::classify;
pub use config::{MonitorConfig, StorageConfig};
pub use fingerprint::{fingerprint, Fingerprint};
pub use ingest::LogPipeline;
pub use logging::{init_logging, LoggingConfig};
pub use store::{
    create_log_store, InMemoryLogStore, LogPage, LogQuery, LogStats, LogStore, PostgresLogStore,
};
pub use stream::{StreamFrame, StreamHandle, SubscriberId, SubscriberRegistry};
pub use types::{
    AdminNotification, CauseInfo, Classification, ErrorCategory, LogEvent, LogLevel, LogRecord,
    MonitorError, Result, Severity,
};

/// Initializes logging with default settings
pub fn init() -> Result<()> {
    logging::init_logging(None)
}

/// Initializes logging from a loaded configuration
pub fn init_with_config(cfg: config_rs::Config) -> Result<()> {
    let log_config = LoggingConfig::try_from(cfg)?;
    logging::init_logging(Some(log_config))
}

/// The whole subsystem behind one explicitly owned instance: started on
/// service boot, passed to whatever serves the ingest/query/stream
/// endpoints, and drained on shutdown.
pub struct ErrorMonitor {
    store: Arc<dyn LogStore>,
    pipeline: LogPipeline,
    broker: Arc<NotificationBroker>,
}

impl ErrorMonitor {
    /// Builds the store, broker, and pipeline and starts the background
    /// worker.
    pub async fn start(config: MonitorConfig) -> Result<Self> {
        let store = create_log_store(&config.storage).await?;
        store.initialize().await?;

        let registry = Arc::new(SubscriberRegistry::new(config.subscriber_buffer));
        let broker = Arc::new(NotificationBroker::new(
            BrokerConfig::from(&config),
            registry,
        ));
        let pipeline = LogPipeline::start(Arc::clone(&store), &config);

        info!("error monitor started");
        Ok(Self {
            store,
            pipeline,
            broker,
        })
    }

    /// Fire-and-forget ingest of one failure into the analytics path
    pub fn submit(&self, event: LogEvent) {
        self.pipeline.submit(event);
    }

    /// Alerting path: runs the cooldown gate and, when not suppressed,
    /// stores and broadcasts a notification
    pub fn notify(
        &self,
        classification: Classification,
        message: impl Into<String>,
        context: Option<serde_json::Map<String, serde_json::Value>>,
        severity_override: Option<Severity>,
    ) -> Option<AdminNotification> {
        self.broker
            .notify(classification, message, context, severity_override)
    }

    /// Feeds one event to both paths: classifies once, alerts on the
    /// classification, and queues the event for persistence
    pub fn capture(&self, event: LogEvent) -> Option<AdminNotification> {
        let classification = classifier::classify(
            &event.message,
            event.endpoint.as_deref(),
            Some(&event.context),
        );
        let notification = self.broker.notify(
            classification,
            event.message.clone(),
            Some(event.context.clone()),
            None,
        );
        self.pipeline.submit(event);
        notification
    }

    /// Attaches a live stream subscriber, replaying active critical alerts
    pub fn subscribe(&self) -> StreamHandle {
        self.broker.subscribe()
    }

    /// Detaches a stream subscriber
    pub fn detach(&self, id: SubscriberId) -> bool {
        self.broker.registry().detach(id)
    }

    pub fn acknowledge(&self, id: Uuid) -> bool {
        self.broker.acknowledge(id)
    }

    pub fn acknowledge_all(&self) -> usize {
        self.broker.acknowledge_all()
    }

    /// The broker, for callers that hold alerting state directly
    pub fn broker(&self) -> &Arc<NotificationBroker> {
        &self.broker
    }

    /// The dedup store, serving the read-only query surface
    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// Drains the ingestion queue and stops the background worker.
    /// Pending notifications and cooldown state are discarded; they are
    /// operational alerts, not durable records.
    pub async fn shutdown(self) {
        self.pipeline.shutdown().await;
        info!("error monitor stopped");
    }
}
