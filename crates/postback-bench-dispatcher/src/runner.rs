//! # Dispatcher
//!
//! Drives one load-test run through `Idle → Running → {Completed | TimedOut |
//! Cancelled}`.
//!
//! All records are generated up front. A producer task admits them one at a
//! time through a counting semaphore of `max_in_flight` permits and pushes
//! them onto a bounded channel. A fixed pool of workers drains the channel.
//! Each worker paces itself, waits on the shared [`RateLimiter`], persists
//! the record through the sent-record writer and then delivers it.
//!
//! A permit travels with its record and is released when the worker drops
//! the record, whatever happened to it. The deadline and the cancellation
//! token are raced against every blocking step; an in-flight HTTP request is
//! always allowed to resolve.

use crate::config::{ConfigError, LoadTestConfig};
use crate::rate_limiter::RateLimiter;
use crate::sender::{DeliveryOutcome, PostbackSender};
use chrono::{DateTime, Utc};
use postback_bench_core::{
    BatchSink, BatchWriter, EventGenerator, PostbackRecord, PostbackStore, SentSink,
    StatsSnapshot, TestId, TestStats,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Run State
// ============================================================================

/// Lifecycle of a dispatch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
    /// Every generated record was dispatched
    Completed,
    /// The deadline passed before every record was dispatched
    TimedOut,
    /// The run was cancelled externally
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::Cancelled)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// What a finished dispatch run produced
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub test_id: TestId,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,

    /// Records generated for the run
    pub request_count: usize,

    /// Records admitted onto the queue
    pub enqueued: usize,

    /// Highest number of simultaneously held admission permits
    pub peak_in_flight: usize,

    /// Admission cap used for the run
    pub max_in_flight: usize,

    pub stats: Arc<TestStats>,
}

impl DispatchReport {
    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Generated records that were never attempted
    pub fn undispatched(&self) -> u64 {
        (self.request_count as u64).saturating_sub(self.stats.sent())
    }
}

// ============================================================================
// Admission
// ============================================================================

#[derive(Debug, Default)]
struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A queued record together with the permit that admitted it
struct Admitted {
    record: PostbackRecord,
    _permit: OwnedSemaphorePermit,
    gauge: Arc<InFlightGauge>,
}

impl Drop for Admitted {
    fn drop(&mut self) {
        self.gauge.exit();
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runs one load test against a target endpoint
pub struct Dispatcher {
    config: LoadTestConfig,
    test_id: TestId,
    generator: EventGenerator,
    sender: Arc<dyn PostbackSender>,
    store: Arc<dyn PostbackStore>,
    state: watch::Sender<RunState>,
}

impl Dispatcher {
    /// Validate the configuration and prepare an idle dispatcher
    pub fn new(
        config: LoadTestConfig,
        sender: Arc<dyn PostbackSender>,
        store: Arc<dyn PostbackStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let generator =
            EventGenerator::new(config.generator.clone()).map_err(|e| ConfigError::Invalid {
                message: e.to_string(),
            })?;
        let test_id = config.test_id.clone().unwrap_or_else(TestId::generate);
        let (state, _) = watch::channel(RunState::Idle);

        Ok(Self {
            config,
            test_id,
            generator,
            sender,
            store,
            state,
        })
    }

    pub fn test_id(&self) -> &TestId {
        &self.test_id
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Observe state transitions of the coming run
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Execute the run until completion, deadline or cancellation
    ///
    /// Returns only after the producer and every worker have stopped, the
    /// queue has been drained and the sent-record buffer has been flushed.
    #[instrument(skip(self, cancel), fields(test_id = %self.test_id))]
    pub async fn run(self, cancel: CancellationToken) -> DispatchReport {
        let request_count = self.config.request_count;
        let max_in_flight = self.config.effective_max_in_flight();
        let worker_count = self.config.worker_count.min(max_in_flight).max(1);
        let rps = self.config.max_requests_per_second;

        let records = self.generator.generate_batch(&self.test_id, request_count);

        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = start + self.config.max_duration();
        self.state.send_replace(RunState::Running);

        info!(
            request_count,
            worker_count,
            max_in_flight,
            max_requests_per_second = rps,
            "Dispatch started"
        );

        let stats = Arc::new(TestStats::new());
        let gauge = Arc::new(InFlightGauge::default());
        let admission = Arc::new(Semaphore::new(max_in_flight));
        let (queue_tx, queue_rx) = mpsc::channel(max_in_flight);

        let sink: Arc<dyn BatchSink<PostbackRecord>> =
            Arc::new(SentSink::new(Arc::clone(&self.store)));
        let ctx = Arc::new(WorkerContext {
            sender: Arc::clone(&self.sender),
            limiter: RateLimiter::new(rps),
            sent_writer: BatchWriter::new(sink, self.config.sent_batch_size),
            stats: Arc::clone(&stats),
            cancel: cancel.clone(),
            deadline,
            pace: (rps > 0).then(|| Duration::from_secs_f64(1.0 / rps as f64)),
            poll_interval: self.config.queue_poll_interval(),
            queue: Mutex::new(queue_rx),
        });

        let producer = tokio::spawn(produce(
            records,
            admission,
            Arc::clone(&gauge),
            queue_tx,
            cancel.clone(),
            deadline,
        ));

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(work(worker_id, Arc::clone(&ctx)));
        }

        let (enqueued, ()) = tokio::join!(
            async {
                producer.await.unwrap_or_else(|e| {
                    error!(error = %e, "Producer task failed");
                    0
                })
            },
            async {
                while let Some(result) = workers.join_next().await {
                    if let Err(e) = result {
                        error!(error = %e, "Worker task failed");
                    }
                }
            }
        );

        let leftover = ctx.drain_queue().await;
        if leftover > 0 {
            info!(leftover, "Dropped queued records that were never dispatched");
        }

        if let Err(e) = ctx.sent_writer.flush().await {
            error!(error = %e, "Final flush of sent records failed");
            stats.record_persistence_error();
        }

        let snapshot = stats.snapshot();
        let state = if cancel.is_cancelled() {
            RunState::Cancelled
        } else if (snapshot.sent as usize) < request_count {
            RunState::TimedOut
        } else {
            RunState::Completed
        };
        self.state.send_replace(state);

        let elapsed = start.elapsed();
        match state {
            RunState::Cancelled => info!(sent = snapshot.sent, "Dispatch cancelled"),
            RunState::TimedOut => info!(sent = snapshot.sent, "Dispatch deadline reached"),
            _ => info!(sent = snapshot.sent, "Dispatch completed"),
        }
        debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            failed = snapshot.failed,
            unverified_success = snapshot.unverified_success,
            "Dispatch totals"
        );

        DispatchReport {
            test_id: self.test_id,
            state,
            started_at,
            elapsed,
            request_count,
            enqueued,
            peak_in_flight: gauge.peak(),
            max_in_flight,
            stats,
        }
    }
}

// ============================================================================
// Producer
// ============================================================================

async fn produce(
    records: Vec<PostbackRecord>,
    admission: Arc<Semaphore>,
    gauge: Arc<InFlightGauge>,
    queue: mpsc::Sender<Admitted>,
    cancel: CancellationToken,
    deadline: Instant,
) -> usize {
    let mut enqueued = 0;

    for record in records {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(enqueued, "Producer stopped by cancellation");
                break;
            }
            _ = sleep_until(deadline) => {
                debug!(enqueued, "Producer stopped at deadline");
                break;
            }
            permit = Arc::clone(&admission).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        gauge.enter();
        let admitted = Admitted {
            record,
            _permit: permit,
            gauge: Arc::clone(&gauge),
        };
        if queue.send(admitted).await.is_err() {
            break;
        }
        enqueued += 1;
    }

    enqueued
}

// ============================================================================
// Workers
// ============================================================================

struct WorkerContext {
    sender: Arc<dyn PostbackSender>,
    limiter: RateLimiter,
    sent_writer: BatchWriter<PostbackRecord>,
    stats: Arc<TestStats>,
    cancel: CancellationToken,
    deadline: Instant,

    /// Per-worker minimum spacing between dispatches
    pace: Option<Duration>,
    poll_interval: Duration,
    queue: Mutex<mpsc::Receiver<Admitted>>,
}

impl WorkerContext {
    async fn next_admitted(&self) -> Option<Admitted> {
        self.queue.lock().await.recv().await
    }

    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Close the queue and drop whatever is left, releasing its permits
    async fn drain_queue(&self) -> usize {
        let mut queue = self.queue.lock().await;
        queue.close();
        let mut dropped = 0;
        while queue.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    async fn dispatch(&self, record: &PostbackRecord) {
        self.stats.record_attempt();

        if let Err(e) = self.sent_writer.submit(record.clone()).await {
            error!(
                request_id = %record.request_id,
                error = %e,
                "Failed to persist sent record"
            );
            self.stats.record_persistence_error();
        }

        match self.sender.send(record).await {
            DeliveryOutcome::Success { latency } => self.stats.record_success(latency),
            DeliveryOutcome::Failure { latency, .. } => self.stats.record_failure(latency),
        }
    }
}

async fn work(worker_id: usize, ctx: Arc<WorkerContext>) {
    let mut last_dispatch: Option<Instant> = None;

    loop {
        if ctx.should_stop() {
            break;
        }

        if let (Some(pace), Some(last)) = (ctx.pace, last_dispatch) {
            let ready_at = last + pace;
            if ready_at > Instant::now() {
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => break,
                    _ = sleep_until(ctx.deadline) => break,
                    _ = sleep_until(ready_at) => {}
                }
            }
        }

        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            _ = sleep_until(ctx.deadline) => break,
            next = timeout(ctx.poll_interval, ctx.next_admitted()) => next,
        };

        let admitted = match next {
            Ok(Some(admitted)) => admitted,
            Ok(None) => break,
            Err(_) => continue,
        };

        let granted = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => false,
            _ = sleep_until(ctx.deadline) => false,
            _ = ctx.limiter.wait() => true,
        };
        if !granted {
            warn!(
                worker_id,
                request_id = %admitted.record.request_id,
                "Run ended while waiting for a send slot; record not dispatched"
            );
            break;
        }

        ctx.dispatch(&admitted.record).await;
        last_dispatch = Some(Instant::now());
    }

    debug!(worker_id, "Worker stopped");
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
