//! Trace workers and the worker pool.
//!
//! Workers are long-running tokio tasks draining the shared queue in batches,
//! grouping records by owning context and writing them under a bounded retry
//! policy. Every blocking wait races against the stop signal so shutdown
//! never hangs on a sleeping worker.

use crate::context::ExecutionContext;
use crate::trace::queue::{TraceQueue, TraceQueueStats};
use crate::trace::record::TraceRecord;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Tuning knobs for a trace worker.
#[derive(Debug, Clone, Copy)]
pub struct TraceWorkerConfig {
    /// Maximum records drained per batch
    pub batch_size: usize,
    /// How long to wait on an empty queue before re-polling
    pub batch_timeout: Duration,
    /// Retries for a failed write before the group is dropped
    pub max_retries: u32,
    /// Delay between retries
    pub retry_delay: Duration,
}

impl Default for TraceWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout: Duration::from_millis(100),
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
        }
    }
}

/// Counters exported by one worker.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TraceWorkerStats {
    /// Records successfully written into contexts
    pub processed_count: u64,
    /// Records dropped after exhausted retries
    pub error_count: u64,
}

/// A single queue-draining worker.
pub struct TraceWorker {
    id: usize,
    queue: Arc<TraceQueue>,
    config: TraceWorkerConfig,
    contexts: RwLock<HashMap<String, Arc<ExecutionContext>>>,
    running: AtomicBool,
    in_flight: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TraceWorker {
    /// Creates a worker over the shared queue.
    pub fn new(id: usize, queue: Arc<TraceQueue>, config: TraceWorkerConfig) -> Self {
        Self {
            id,
            queue,
            config,
            contexts: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            in_flight: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            stop_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Makes a context routable by this worker.
    pub fn register(&self, execution_id: impl Into<String>, ctx: Arc<ExecutionContext>) {
        self.contexts.write().insert(execution_id.into(), ctx);
    }

    /// Removes a context from routing.
    pub fn unregister(&self, execution_id: &str) {
        self.contexts.write().remove(execution_id);
    }

    /// Spawns the drain loop. Idempotent: a running worker is left alone.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let (tx, rx) = watch::channel(false);
        *self.stop_tx.lock() = Some(tx);
        let worker = Arc::clone(self);
        let handle = tokio::spawn(worker.run(rx));
        *self.handle.lock() = Some(handle);
    }

    /// Signals the loop to stop and joins it. Idempotent; a worker that was
    /// never started returns immediately.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Drains the queue until it reads empty.
    pub async fn flush(&self) {
        loop {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let batch = self.queue.dequeue_batch(self.config.batch_size);
            if batch.is_empty() {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                return;
            }
            self.process_batch(batch, None).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> TraceWorkerStats {
        TraceWorkerStats {
            processed_count: self.processed.load(Ordering::Relaxed),
            error_count: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Whether any batch is currently being written.
    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        debug!(worker = self.id, "trace worker started");
        loop {
            // The in-flight counter spans dequeue through write so a flush
            // never declares the queue settled while a batch is in hand.
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let batch = self.queue.dequeue_batch(self.config.batch_size);
            if batch.is_empty() {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                if *stop_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.config.batch_timeout) => {}
                    _ = stop_rx.changed() => {}
                }
                continue;
            }
            self.process_batch(batch, Some(&mut stop_rx)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        // Final sweep for records that raced the stop signal.
        self.flush().await;
        debug!(worker = self.id, "trace worker stopped");
    }

    async fn process_batch(&self, batch: Vec<TraceRecord>, mut stop_rx: Option<&mut watch::Receiver<bool>>) {
        let mut groups: HashMap<String, Vec<TraceRecord>> = HashMap::new();
        for record in batch {
            groups.entry(record.execution_id.clone()).or_default().push(record);
        }

        for (execution_id, records) in groups {
            let ctx = self.contexts.read().get(&execution_id).cloned();
            let ctx = match ctx {
                Some(ctx) => ctx,
                None => {
                    // The context was destroyed before its records drained;
                    // normal teardown, not an error.
                    debug!(
                        worker = self.id,
                        execution_id = %execution_id,
                        dropped = records.len(),
                        "dropping trace records for unregistered context"
                    );
                    continue;
                }
            };
            self.write_group(&ctx, &execution_id, records, stop_rx.as_deref_mut())
                .await;
        }
    }

    async fn write_group(
        &self,
        ctx: &ExecutionContext,
        execution_id: &str,
        records: Vec<TraceRecord>,
        mut stop_rx: Option<&mut watch::Receiver<bool>>,
    ) {
        let group_len = records.len() as u64;
        let mut attempt = 0u32;
        loop {
            match ctx.record_trace_records(&records) {
                Ok(()) => {
                    self.processed.fetch_add(group_len, Ordering::Relaxed);
                    return;
                }
                Err(err) if err.is_context_missing() => {
                    debug!(
                        worker = self.id,
                        execution_id = %execution_id,
                        "context gone before drain: {err}"
                    );
                    return;
                }
                Err(err) => {
                    if attempt >= self.config.max_retries {
                        self.errors.fetch_add(group_len, Ordering::Relaxed);
                        warn!(
                            worker = self.id,
                            execution_id = %execution_id,
                            dropped = group_len,
                            "dropping trace records after {attempt} retries: {err}"
                        );
                        return;
                    }
                    attempt += 1;
                    let stopped = match stop_rx.as_deref_mut() {
                        Some(stop_rx) => {
                            tokio::select! {
                                _ = tokio::time::sleep(self.config.retry_delay) => false,
                                _ = stop_rx.changed() => true,
                            }
                        }
                        None => {
                            tokio::time::sleep(self.config.retry_delay).await;
                            false
                        }
                    };
                    if stopped {
                        // Shutting down; give up on the remaining retries.
                        self.errors.fetch_add(group_len, Ordering::Relaxed);
                        warn!(
                            worker = self.id,
                            execution_id = %execution_id,
                            dropped = group_len,
                            "dropping trace records on stop: {err}"
                        );
                        return;
                    }
                }
            }
        }
    }
}

/// Aggregate statistics over a pool.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TraceWorkerPoolStats {
    /// Number of workers
    pub workers: usize,
    /// Records successfully written across all workers
    pub processed_count: u64,
    /// Records dropped across all workers
    pub error_count: u64,
    /// Shared queue counters
    pub queue: TraceQueueStats,
}

/// A fixed set of workers sharing one queue.
pub struct TraceWorkerPool {
    workers: Vec<Arc<TraceWorker>>,
    queue: Arc<TraceQueue>,
    running: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
}

impl TraceWorkerPool {
    /// Creates `worker_count` workers over `queue`.
    pub fn new(queue: Arc<TraceQueue>, worker_count: usize, config: TraceWorkerConfig) -> Self {
        let workers = (0..worker_count.max(1))
            .map(|id| Arc::new(TraceWorker::new(id, Arc::clone(&queue), config)))
            .collect();
        Self {
            workers,
            queue,
            running: AtomicBool::new(false),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Starts every worker. Idempotent under the lifecycle lock.
    pub async fn start(&self) {
        let _guard = self.lifecycle.lock().await;
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        for worker in &self.workers {
            worker.start();
        }
        debug!(workers = self.workers.len(), "trace worker pool started");
    }

    /// Stops every worker, joining their loops. Idempotent.
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for worker in &self.workers {
            worker.stop().await;
        }
        debug!(workers = self.workers.len(), "trace worker pool stopped");
    }

    /// Makes a context routable by every worker.
    pub fn register(&self, execution_id: &str, ctx: &Arc<ExecutionContext>) {
        for worker in &self.workers {
            worker.register(execution_id, Arc::clone(ctx));
        }
    }

    /// Removes a context from every worker.
    pub fn unregister(&self, execution_id: &str) {
        for worker in &self.workers {
            worker.unregister(execution_id);
        }
    }

    /// Drains the queue and waits for in-flight batches to settle.
    ///
    /// Every record enqueued before this call returns is either written into
    /// its context or counted in `error_count`.
    pub async fn flush(&self) {
        loop {
            for worker in &self.workers {
                worker.flush().await;
            }
            let settled = self.queue.is_empty()
                && self.workers.iter().all(|w| !w.is_in_flight());
            if settled {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    /// Aggregate counter snapshot.
    pub fn stats(&self) -> TraceWorkerPoolStats {
        let mut stats = TraceWorkerPoolStats {
            workers: self.workers.len(),
            queue: self.queue.stats(),
            ..Default::default()
        };
        for worker in &self.workers {
            let w = worker.stats();
            stats.processed_count += w.processed_count;
            stats.error_count += w.error_count;
        }
        stats
    }
}
