//! # Ingestion Pipeline
//!
//! Buffers incoming log events and flushes them in ordered batches to the
//! dedup store. `submit` is fire-and-forget; persistence happens on a
//! single background worker.
//!
//! Exactly one flush is ever in flight, and a batch is processed in
//! arrival order, one event at a time. That single worker is what makes
//! the store's merge-or-insert race-free: two events with the same
//! fingerprint in one batch merge instead of both inserting.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};

use crate::classifier::classify;
use crate::config::MonitorConfig;
use crate::fingerprint::fingerprint;
use crate::retry::RetryPolicy;
use crate::store::{LogStore, NewLogRecord};
use crate::types::{LogEvent, Result};

/// Handle to the ingestion queue and its background worker
pub struct LogPipeline {
    tx: mpsc::Sender<LogEvent>,
    worker: JoinHandle<()>,
}

impl LogPipeline {
    /// Spawns the background worker and returns the pipeline handle
    pub fn start(store: Arc<dyn LogStore>, config: &MonitorConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);

        let worker = tokio::spawn(run_worker(
            rx,
            store,
            config.batch_size.max(1),
            config.batch_delay,
            config.dedup_window_chrono(),
            RetryPolicy::database(),
        ));

        Self { tx, worker }
    }

    /// Enqueues an event and returns immediately. A full queue drops the
    /// event: analytics is best-effort and must never block the caller.
    pub fn submit(&self, event: LogEvent) {
        counter!("error_monitor.ingest.submitted", 1);
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(message = %event.message, "ingestion queue full, dropping event");
                counter!("error_monitor.ingest.dropped", 1);
            }
            Err(TrySendError::Closed(event)) => {
                warn!(message = %event.message, "ingestion queue closed, dropping event");
                counter!("error_monitor.ingest.dropped", 1);
            }
        }
    }

    /// Stops accepting events, drains what is queued, and waits for the
    /// worker to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(err) = self.worker.await {
            error!(error = %err, "ingestion worker did not shut down cleanly");
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<LogEvent>,
    store: Arc<dyn LogStore>,
    batch_size: usize,
    batch_delay: Duration,
    window: chrono::Duration,
    policy: RetryPolicy,
) {
    let mut pending: Vec<LogEvent> = Vec::with_capacity(batch_size);
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(event) => {
                    if pending.is_empty() {
                        deadline = Instant::now() + batch_delay;
                    }
                    pending.push(event);
                    if pending.len() >= batch_size {
                        flush_batch(store.as_ref(), &mut pending, window, &policy).await;
                    }
                }
                None => {
                    flush_batch(store.as_ref(), &mut pending, window, &policy).await;
                    break;
                }
            },
            _ = sleep_until(deadline), if !pending.is_empty() => {
                flush_batch(store.as_ref(), &mut pending, window, &policy).await;
            }
        }
    }

    debug!("ingestion worker stopped");
}

/// Flushes a batch in arrival order. Events whose persistence fails after
/// the retry budget are logged and dropped; the batch always completes.
pub(crate) async fn flush_batch(
    store: &dyn LogStore,
    pending: &mut Vec<LogEvent>,
    window: chrono::Duration,
    policy: &RetryPolicy,
) {
    if pending.is_empty() {
        return;
    }

    histogram!("error_monitor.ingest.flush_batch_size", pending.len() as f64);

    for event in pending.drain(..) {
        if let Err(err) = persist_event(store, &event, window, policy).await {
            error!(
                error = %err,
                message = %event.message,
                "dropping event after storage failure"
            );
            counter!("error_monitor.ingest.dropped", 1);
        }
    }
}

async fn persist_event(
    store: &dyn LogStore,
    event: &LogEvent,
    window: chrono::Duration,
    policy: &RetryPolicy,
) -> Result<()> {
    let classification = classify(&event.message, event.endpoint.as_deref(), Some(&event.context));
    let fp = fingerprint(
        classification.category,
        &event.message,
        event.endpoint.as_deref(),
        Some(&event.context),
    );

    let window_start = event.timestamp - window;
    let existing = policy
        .run("dedup-lookup", || store.find_open(&fp, window_start))
        .await?;

    match existing {
        Some(record) => {
            policy
                .run("dedup-merge", || {
                    store.record_occurrence(record.id, event.timestamp)
                })
                .await?;
            counter!("error_monitor.dedup.merged", 1);
            debug!(fingerprint = %fp, record = %record.id, "merged occurrence");
        }
        None => {
            let new = NewLogRecord::from_event(event, &classification, fp.clone());
            let record = policy
                .run("dedup-insert", || store.insert(new.clone()))
                .await?;
            counter!("error_monitor.dedup.inserted", 1);
            debug!(fingerprint = %fp, record = %record.id, "inserted new record");
        }
    }

    Ok(())
}
