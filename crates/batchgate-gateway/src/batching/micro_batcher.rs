//! Latency-bounded micro-batcher.
//!
//! Producers push into a bounded `mpsc` queue and park on a per-request
//! `oneshot`. A single consumer task takes the first queued request, keeps
//! pulling until `max_batch` requests are collected or `max_latency` has
//! passed since the first one, then forwards the whole batch in one call and
//! fans the outputs back out by position.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};

use batchgate_core::error::{BatchGateError, Result};

use super::forward::BatchForward;
use crate::obs::PipelineMetrics;

/// Largest accepted queue capacity.
pub const MAX_QUEUE: usize = 1 << 20;
/// Largest accepted batch size.
pub const MAX_BATCH: usize = 4096;
/// Longest accepted batching window.
pub const MAX_LATENCY: Duration = Duration::from_secs(60);

// Initial allocation for a batch; it grows up to `max_batch` as requests arrive.
const BATCH_PREALLOC: usize = 64;

/// Batch assembly limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Bounded queue capacity; a full queue rejects with `QueueFull`.
    pub max_queue: usize,
    /// Upper bound on requests per forward call.
    pub max_batch: usize,
    /// Window opened by the first request of a batch.
    pub max_latency: Duration,
}

impl BatcherConfig {
    pub fn new(max_queue: usize, max_batch: usize, max_latency_ms: u64) -> Self {
        Self {
            max_queue,
            max_batch,
            max_latency: Duration::from_millis(max_latency_ms),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_QUEUE).contains(&self.max_queue) {
            return Err(BatchGateError::BadRequest(format!(
                "max_queue must be between 1 and {MAX_QUEUE}"
            )));
        }
        if !(1..=MAX_BATCH).contains(&self.max_batch) {
            return Err(BatchGateError::BadRequest(format!(
                "max_batch must be between 1 and {MAX_BATCH}"
            )));
        }
        if self.max_latency.is_zero() || self.max_latency > MAX_LATENCY {
            return Err(BatchGateError::BadRequest(format!(
                "max_latency must be > 0 and at most {} ms",
                MAX_LATENCY.as_millis()
            )));
        }
        Ok(())
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self::new(1024, 8, 5)
    }
}

/// Lifecycle: `Stopped -> Running -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatcherState {
    Stopped,
    Running,
    Draining,
}

struct PendingRequest<I, O> {
    payload: I,
    slot: oneshot::Sender<Result<O>>,
    enqueued_at: Instant,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    batches: AtomicU64,
    batched: AtomicU64,
    largest: AtomicUsize,
    failed_batches: AtomicU64,
    rejected_queue_full: AtomicU64,
    rejected_closed: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time view of one batcher.
#[derive(Debug, Clone, Serialize)]
pub struct BatcherStats {
    pub state: BatcherState,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub max_batch: usize,
    pub max_latency_ms: u64,
    pub submitted: u64,
    pub batches_formed: u64,
    pub requests_batched: u64,
    pub avg_batch_size: f64,
    pub largest_batch: usize,
    pub failed_batches: u64,
    pub rejected_queue_full: u64,
    pub rejected_closed: u64,
    pub timeouts: u64,
}

struct Observer {
    target: String,
    metrics: Arc<PipelineMetrics>,
}

impl Observer {
    fn labels(&self) -> [(&str, &str); 1] {
        [("target", self.target.as_str())]
    }
}

pub struct MicroBatcher<I, O> {
    cfg: BatcherConfig,
    tx: mpsc::Sender<PendingRequest<I, O>>,
    // Held here until `start()` hands it to the consumer task.
    rx: Mutex<Option<mpsc::Receiver<PendingRequest<I, O>>>>,
    forward: Arc<dyn BatchForward<I, O>>,
    state: Arc<watch::Sender<BatcherState>>,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    observer: Option<Arc<Observer>>,
}

impl<I, O> MicroBatcher<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new(cfg: BatcherConfig, forward: Arc<dyn BatchForward<I, O>>) -> Result<Self> {
        cfg.validate()?;
        let (tx, rx) = mpsc::channel(cfg.max_queue);
        let (state, _) = watch::channel(BatcherState::Stopped);
        Ok(Self {
            cfg,
            tx,
            rx: Mutex::new(Some(rx)),
            forward,
            state: Arc::new(state),
            closed: AtomicBool::new(false),
            worker: Mutex::new(None),
            counters: Arc::new(Counters::default()),
            observer: None,
        })
    }

    /// Record batch size, queue wait and forward latency under `target`.
    pub fn with_metrics(mut self, target: impl Into<String>, metrics: Arc<PipelineMetrics>) -> Self {
        self.observer = Some(Arc::new(Observer {
            target: target.into(),
            metrics,
        }));
        self
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.cfg
    }

    pub fn state(&self) -> BatcherState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == BatcherState::Running
    }

    /// Spawn the consumer task. Idempotent while running.
    pub fn start(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BatchGateError::Closed);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BatchGateError::Internal(format!("no tokio runtime: {e}")))?;

        let rx = {
            let mut guard = self
                .rx
                .lock()
                .map_err(|_| BatchGateError::Internal("batcher lock poisoned".into()))?;
            match guard.take() {
                Some(rx) => rx,
                None => return Ok(()),
            }
        };

        let consumer = Consumer {
            max_batch: self.cfg.max_batch,
            max_latency: self.cfg.max_latency,
            forward: Arc::clone(&self.forward),
            counters: Arc::clone(&self.counters),
            observer: self.observer.clone(),
            state: self.state.subscribe(),
            _stopped: StoppedOnExit(Arc::clone(&self.state)),
        };
        self.state.send_replace(BatcherState::Running);
        let handle = runtime.spawn(consumer.run(rx));

        let mut worker = self
            .worker
            .lock()
            .map_err(|_| BatchGateError::Internal("batcher lock poisoned".into()))?;
        *worker = Some(handle);

        tracing::info!(
            target_id = self.target_label(),
            max_batch = self.cfg.max_batch,
            max_latency_ms = self.cfg.max_latency.as_millis() as u64,
            max_queue = self.cfg.max_queue,
            "micro-batcher started"
        );
        Ok(())
    }

    /// Cooperative drain: the batch in flight completes, queued requests are
    /// rejected with `Closed`, then the consumer exits. Idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);

        // Never started: nothing will ever serve what is buffered.
        let idle = self.rx.lock().ok().and_then(|mut g| g.take());
        if let Some(rx) = idle {
            reject_remaining(rx, &self.counters).await;
        }

        let handle = self.worker.lock().ok().and_then(|mut g| g.take());
        if let Some(handle) = handle {
            self.state.send_replace(BatcherState::Draining);
            if let Err(e) = handle.await {
                tracing::error!(target_id = self.target_label(), error = %e, "micro-batcher consumer aborted");
            }
            tracing::info!(target_id = self.target_label(), "micro-batcher stopped");
        }
        self.state.send_replace(BatcherState::Stopped);
    }

    /// Enqueue `payload` and wait up to `wait` for its result.
    ///
    /// Fails fast with `QueueFull` when the queue is at capacity. A caller
    /// that times out leaves its request in the batch; the late result is
    /// discarded.
    pub async fn submit(&self, payload: I, wait: Duration) -> Result<O> {
        if self.closed.load(Ordering::Acquire) {
            self.counters.rejected_closed.fetch_add(1, Ordering::Relaxed);
            return Err(BatchGateError::Closed);
        }

        let (slot, result) = oneshot::channel();
        let req = PendingRequest {
            payload,
            slot,
            enqueued_at: Instant::now(),
        };
        match self.tx.try_send(req) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.counters
                    .rejected_queue_full
                    .fetch_add(1, Ordering::Relaxed);
                return Err(BatchGateError::QueueFull);
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.rejected_closed.fetch_add(1, Ordering::Relaxed);
                return Err(BatchGateError::Closed);
            }
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        match timeout(wait, result).await {
            Ok(Ok(out)) => out,
            // Slot dropped unwritten: the consumer is gone.
            Ok(Err(_)) => Err(BatchGateError::Closed),
            Err(_) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                if let Some(obs) = &self.observer {
                    obs.metrics.request_timeouts.inc(&obs.labels());
                }
                Err(BatchGateError::Timeout)
            }
        }
    }

    /// Requests currently waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn stats(&self) -> BatcherStats {
        let c = &self.counters;
        let batches = c.batches.load(Ordering::Relaxed);
        let batched = c.batched.load(Ordering::Relaxed);
        BatcherStats {
            state: self.state(),
            queue_depth: self.queue_depth(),
            queue_capacity: self.cfg.max_queue,
            max_batch: self.cfg.max_batch,
            max_latency_ms: self.cfg.max_latency.as_millis() as u64,
            submitted: c.submitted.load(Ordering::Relaxed),
            batches_formed: batches,
            requests_batched: batched,
            avg_batch_size: if batches == 0 {
                0.0
            } else {
                batched as f64 / batches as f64
            },
            largest_batch: c.largest.load(Ordering::Relaxed),
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
            rejected_queue_full: c.rejected_queue_full.load(Ordering::Relaxed),
            rejected_closed: c.rejected_closed.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
        }
    }

    fn target_label(&self) -> &str {
        self.observer
            .as_ref()
            .map(|o| o.target.as_str())
            .unwrap_or("-")
    }
}

/// State owned by the consumer task. The batch under construction lives on
/// its stack; nothing here is shared with producers except the counters.
struct Consumer<I, O> {
    max_batch: usize,
    max_latency: Duration,
    forward: Arc<dyn BatchForward<I, O>>,
    counters: Arc<Counters>,
    observer: Option<Arc<Observer>>,
    state: watch::Receiver<BatcherState>,
    _stopped: StoppedOnExit,
}

/// Publishes `Stopped` however the consumer task ends (return, panic or
/// abort, even before its first poll), so a dead consumer never reads as
/// running.
struct StoppedOnExit(Arc<watch::Sender<BatcherState>>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.send_replace(BatcherState::Stopped);
    }
}

impl<I, O> Consumer<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn run(mut self, mut rx: mpsc::Receiver<PendingRequest<I, O>>) {
        loop {
            let first = tokio::select! {
                biased;
                _ = self.state.wait_for(|s| *s != BatcherState::Running) => break,
                next = rx.recv() => match next {
                    Some(req) => req,
                    None => break,
                },
            };
            let batch = self.collect(first, &mut rx).await;
            self.dispatch(batch).await;
        }
        reject_remaining(rx, &self.counters).await;
    }

    async fn collect(
        &self,
        first: PendingRequest<I, O>,
        rx: &mut mpsc::Receiver<PendingRequest<I, O>>,
    ) -> Vec<PendingRequest<I, O>> {
        let deadline = Instant::now() + self.max_latency;
        let mut batch = Vec::with_capacity(self.max_batch.min(BATCH_PREALLOC));
        batch.push(first);

        while batch.len() < self.max_batch {
            // Anything not received by the deadline belongs to the next batch.
            if Instant::now() >= deadline {
                break;
            }
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(req)) => batch.push(req),
                Ok(None) | Err(_) => break,
            }
        }
        batch
    }

    async fn dispatch(&self, batch: Vec<PendingRequest<I, O>>) {
        let size = batch.len();
        let dispatched_at = Instant::now();

        let mut payloads = Vec::with_capacity(size);
        let mut slots = Vec::with_capacity(size);
        for req in batch {
            if let Some(obs) = &self.observer {
                obs.metrics
                    .queue_wait
                    .observe(&obs.labels(), dispatched_at - req.enqueued_at);
            }
            payloads.push(req.payload);
            slots.push(req.slot);
        }

        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters.batched.fetch_add(size as u64, Ordering::Relaxed);
        self.counters.largest.fetch_max(size, Ordering::Relaxed);

        let outcome = AssertUnwindSafe(self.forward.forward(payloads))
            .catch_unwind()
            .await;
        let elapsed = dispatched_at.elapsed();

        let result = match outcome {
            Ok(Ok(outputs)) if outputs.len() == size => Ok(outputs),
            Ok(Ok(outputs)) => Err(BatchGateError::Backend(format!(
                "forward returned {} outputs for a batch of {}",
                outputs.len(),
                size
            ))),
            Ok(Err(e)) => Err(e.into_backend()),
            Err(_) => Err(BatchGateError::Backend("forward panicked".into())),
        };

        if let Some(obs) = &self.observer {
            let labels = obs.labels();
            obs.metrics.batches.inc(&labels);
            obs.metrics.batch_size.observe_value(&labels, size as u64);
            obs.metrics.forward_duration.observe(&labels, elapsed);
            if result.is_err() {
                obs.metrics.batch_failures.inc(&labels);
            }
        }

        match result {
            Ok(outputs) => {
                tracing::debug!(
                    size,
                    elapsed_us = elapsed.as_micros() as u64,
                    "batch forwarded"
                );
                for (slot, out) in slots.into_iter().zip(outputs) {
                    // Receiver gone means the caller timed out.
                    let _ = slot.send(Ok(out));
                }
            }
            Err(err) => {
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(size, error = %err, "batch failed");
                for slot in slots {
                    let _ = slot.send(Err(err.clone()));
                }
            }
        }
    }
}

async fn reject_remaining<I, O>(mut rx: mpsc::Receiver<PendingRequest<I, O>>, counters: &Counters) {
    rx.close();
    while let Some(req) = rx.recv().await {
        counters.rejected_closed.fetch_add(1, Ordering::Relaxed);
        let _ = req.slot.send(Err(BatchGateError::Closed));
    }
}
