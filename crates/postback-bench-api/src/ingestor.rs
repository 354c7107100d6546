//! # Ingestor
//!
//! Accepts received postbacks into a fixed-size buffer and persists them in
//! multi-row, insert-or-ignore batches.
//!
//! A delivery is acknowledged as soon as it is buffered. Full batches are
//! written on background tasks tracked by a [`TaskTracker`], so request
//! latency never includes store I/O. [`Ingestor::flush`] and
//! [`Ingestor::shutdown`] wait for those writes before flushing whatever is
//! still buffered.

use crate::errors::IngestError;
use crate::metrics::ServiceMetrics;
use postback_bench_core::{
    BatchWriter, PostbackStore, ReceivedPostback, ReceivedSink, StoreResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

/// Ingestion counters exposed at `/stats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Deliveries accepted into the buffer
    pub received: u64,

    /// Deliveries rejected before buffering
    pub errors: u64,

    /// Records handed to the store in successful batch writes
    pub flushed: u64,

    /// Batch writes that failed (records stay buffered)
    pub flush_failures: u64,

    /// Records currently waiting for a flush
    pub buffered: u64,

    pub batch_size: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    errors: AtomicU64,
    flushed: AtomicU64,
    flush_failures: AtomicU64,
}

/// Background batch writes that have been started but not finished
#[derive(Debug, Default)]
struct PendingWrites {
    count: AtomicUsize,
    idle: Notify,
}

impl PendingWrites {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Buffered, idempotent writer for received postbacks
#[derive(Clone)]
pub struct Ingestor {
    writer: Arc<BatchWriter<ReceivedPostback>>,
    counters: Arc<Counters>,
    metrics: Arc<ServiceMetrics>,
    pending: Arc<PendingWrites>,
    tracker: TaskTracker,
}

impl Ingestor {
    /// Create an ingestor writing `batch_size` records per insert
    pub fn new(
        store: Arc<dyn PostbackStore>,
        batch_size: usize,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        let sink = Arc::new(ReceivedSink::new(store));
        Self {
            writer: Arc::new(BatchWriter::new(sink, batch_size)),
            counters: Arc::new(Counters::default()),
            metrics,
            pending: Arc::new(PendingWrites::default()),
            tracker: TaskTracker::new(),
        }
    }

    /// Parse and buffer one delivery
    ///
    /// Returns once the record is buffered. If the buffer filled up, the
    /// batch write is started in the background.
    pub fn accept(&self, params: HashMap<String, String>) -> Result<(), IngestError> {
        let (postback, unknown) = match ReceivedPostback::from_params(params) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.postbacks_rejected_total.inc();
                return Err(e.into());
            }
        };

        if !unknown.is_empty() {
            debug!(
                request_id = %postback.request_id,
                ignored = ?unknown,
                "Ignoring unknown postback parameters"
            );
        }

        debug!(request_id = %postback.request_id, "Postback received");
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.metrics.postbacks_received_total.inc();

        if let Some(batch) = self.writer.enqueue(postback) {
            let this = self.clone();
            self.pending.start();
            self.tracker.spawn(async move {
                // Failures are counted and the batch is requeued by the writer
                let _ = this.write(batch).await;
                this.pending.finish();
            });
        }
        self.update_buffered_gauge();

        Ok(())
    }

    /// Make every accepted delivery durable
    ///
    /// Waits for background batch writes already started, then writes what
    /// is left in the buffer. Returns the rows inserted by that last write.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<u64, IngestError> {
        self.pending.wait_idle().await;
        let batch = self.writer.take_buffered();
        if batch.is_empty() {
            return Ok(0);
        }
        self.write(batch).await.map_err(IngestError::from)
    }

    /// Snapshot of the ingestion counters
    pub fn stats(&self) -> IngestStats {
        IngestStats {
            received: self.counters.received.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            flushed: self.counters.flushed.load(Ordering::Relaxed),
            flush_failures: self.counters.flush_failures.load(Ordering::Relaxed),
            buffered: self.writer.buffered() as u64,
            batch_size: self.writer.batch_size() as u64,
        }
    }

    /// Flush a non-empty buffer every `interval` until `cancel` fires
    pub fn spawn_periodic_flush(&self, interval: Duration, cancel: CancellationToken) {
        let this = self.clone();
        self.tracker.spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Periodic flush started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if this.writer.buffered() > 0 {
                            if let Err(e) = this.flush().await {
                                warn!(error = %e, "Periodic flush failed");
                            }
                        }
                    }
                }
            }
            debug!("Periodic flush stopped");
        });
    }

    /// Wait for background batch writes started so far
    pub async fn wait_for_pending_writes(&self) {
        self.pending.wait_idle().await;
    }

    /// Stop background work and flush the remaining buffer
    ///
    /// Any periodic flush task must be cancelled before calling this,
    /// otherwise the wait does not finish.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<u64, IngestError> {
        self.tracker.close();
        self.tracker.wait().await;

        let remaining = self.writer.buffered();
        let written = self.flush().await?;
        info!(
            remaining,
            written,
            received = self.counters.received.load(Ordering::Relaxed),
            "Ingestion buffer flushed on shutdown"
        );
        Ok(written)
    }

    async fn write(&self, batch: Vec<ReceivedPostback>) -> StoreResult<u64> {
        let size = batch.len() as u64;
        let result = self.writer.write(batch).await;

        match &result {
            Ok(inserted) => {
                self.counters.flushed.fetch_add(size, Ordering::Relaxed);
                self.metrics.batches_flushed_total.inc();
                self.metrics.rows_flushed_total.inc_by(*inserted);
                debug!(batch_size = size, inserted, "Received postbacks persisted");
            }
            Err(e) => {
                self.counters.flush_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.flush_failures_total.inc();
                error!(batch_size = size, error = %e, "Failed to persist received postbacks");
            }
        }
        self.update_buffered_gauge();

        result
    }

    fn update_buffered_gauge(&self) {
        self.metrics
            .postbacks_buffered
            .set(self.writer.buffered() as i64);
    }
}

#[cfg(test)]
#[path = "ingestor_tests.rs"]
mod tests;
