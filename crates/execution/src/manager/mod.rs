//! The execution-context manager.
//!
//! Owns the registry of live contexts and everything that polices them: the
//! periodic expiry sweep, isolation and cleanup verification, result
//! consistency, trace integrity, replay, async trace recording and the debug
//! surface. One manager exists per runtime; tests construct as many as they
//! like.

pub mod cleanup;
pub mod debug;
pub mod isolation;

use crate::address::Address;
use crate::context::snapshot::ContextStateSnapshot;
use crate::context::{CallScope, ExecutionContext};
use crate::determinism::verifier::ExecutionResultVerifier;
use crate::error::{ExecutionError, Result};
use crate::services::RuntimeServices;
use crate::shutdown::{Shutdown, GRACEFUL_SHUTDOWN_TIMEOUT, SHUTDOWN_POLL_INTERVAL};
use crate::trace::integrity::{ExecutionTrace, IntegrityConfig, IntegrityReport, TraceIntegrityChecker};
use crate::trace::queue::{TraceQueue, TraceQueueStats};
use crate::trace::replay::{ReplayOperation, TraceReplayStore};
use crate::trace::worker::{TraceWorkerConfig, TraceWorkerPool, TraceWorkerPoolStats};
use async_trait::async_trait;
use cleanup::CleanupVerifier;
use debug::{ContextDebugger, DebugMode, DebugTool};
use isolation::{check_memory_leak, IsolationEnforcer, LeakReport, MemoryLeakReport};
use ispc_config::BlockchainConfig;
use ispc_time::Clock;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Aggregate manager statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerStats {
    /// Currently live contexts
    pub active_contexts: usize,
    /// Contexts created over the manager's lifetime
    pub created_total: u64,
    /// Contexts destroyed over the manager's lifetime
    pub destroyed_total: u64,
    /// Contexts removed by the expiry sweep
    pub expired_total: u64,
    /// Whether async trace recording is on
    pub async_trace_enabled: bool,
    /// Shared queue counters when async tracing is on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<TraceQueueStats>,
    /// Worker-pool counters when async tracing is on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_pool: Option<TraceWorkerPoolStats>,
}

struct AsyncTraceState {
    queue: Arc<TraceQueue>,
    pool: Arc<TraceWorkerPool>,
}

/// Registry and lifecycle authority for execution contexts.
pub struct ExecutionContextManager {
    services: Arc<RuntimeServices>,
    contexts: RwLock<HashMap<String, Arc<ExecutionContext>>>,
    isolation: IsolationEnforcer,
    cleanup: CleanupVerifier,
    result_verifier: ExecutionResultVerifier,
    integrity: TraceIntegrityChecker,
    replay: TraceReplayStore,
    async_trace: RwLock<Option<AsyncTraceState>>,
    trace_lifecycle: tokio::sync::Mutex<()>,
    debug_mode: RwLock<DebugMode>,
    shutting_down: AtomicBool,
    created_total: AtomicU64,
    destroyed_total: AtomicU64,
    expired_total: AtomicU64,
    sweep_stop: Mutex<Option<watch::Sender<bool>>>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ExecutionContextManager {
    /// Creates a manager over the given configuration and clock.
    pub fn new(config: BlockchainConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let max_lifetime_ns = config
            .execution
            .ispc
            .max_context_lifetime_ms
            .saturating_mul(1_000_000);
        Arc::new(Self {
            services: Arc::new(RuntimeServices::new(clock, config)),
            contexts: RwLock::new(HashMap::new()),
            isolation: IsolationEnforcer::new(max_lifetime_ns),
            cleanup: CleanupVerifier::new(),
            result_verifier: ExecutionResultVerifier::new(),
            integrity: TraceIntegrityChecker::new(IntegrityConfig::default()),
            replay: TraceReplayStore::new(),
            async_trace: RwLock::new(None),
            trace_lifecycle: tokio::sync::Mutex::new(()),
            debug_mode: RwLock::new(DebugMode::Off),
            shutting_down: AtomicBool::new(false),
            created_total: AtomicU64::new(0),
            destroyed_total: AtomicU64::new(0),
            expired_total: AtomicU64::new(0),
            sweep_stop: Mutex::new(None),
            sweep_handle: Mutex::new(None),
        })
    }

    /// The shared runtime services handed to contexts.
    pub fn services(&self) -> &Arc<RuntimeServices> {
        &self.services
    }

    fn now_ns(&self) -> u64 {
        self.services.now_ns()
    }

    /// Creates and registers a context.
    ///
    /// An empty `execution_id` gets a clock-derived one. Deadline and
    /// correlation ids are inherited from `scope`. A malformed caller hex
    /// falls back to the zero address; an empty caller means no transaction
    /// draft is pre-created.
    pub fn create_context(
        &self,
        scope: &CallScope,
        execution_id: &str,
        caller_address_hex: &str,
    ) -> Result<Arc<ExecutionContext>> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(ExecutionError::ShutdownInProgress);
        }
        let now = self.now_ns();
        let execution_id = if execution_id.is_empty() {
            format!("exec_{}", now)
        } else {
            execution_id.to_string()
        };
        let caller = if caller_address_hex.is_empty() {
            None
        } else {
            Some(Address::from_hex(caller_address_hex).unwrap_or_else(|_| Address::zero()))
        };

        let ctx = Arc::new(ExecutionContext::new(
            execution_id.clone(),
            scope,
            caller,
            Vec::new(),
            Some(Arc::clone(&self.services)),
            None,
        ));

        {
            let mut contexts = self.contexts.write();
            if contexts.contains_key(&execution_id) {
                return Err(ExecutionError::ContextAlreadyExists { execution_id });
            }
            contexts.insert(execution_id.clone(), Arc::clone(&ctx));
        }
        self.created_total.fetch_add(1, Ordering::Relaxed);
        self.isolation.track_context(&execution_id, now);

        if let Some(state) = self.async_trace.read().as_ref() {
            state.pool.register(&execution_id, &ctx);
            ctx.set_trace_queue(Some(Arc::clone(&state.queue)));
        }

        info!(
            execution_id = %execution_id,
            has_deadline = scope.deadline_ns.is_some(),
            "execution context created"
        );
        Ok(ctx)
    }

    /// Destroys a context. Idempotent: unknown ids succeed as no-ops.
    pub fn destroy_context(&self, execution_id: &str) -> Result<()> {
        self.destroy_with_method(execution_id, "destroy_context")
    }

    fn destroy_with_method(&self, execution_id: &str, method: &str) -> Result<()> {
        let removed = self.contexts.write().remove(execution_id);
        let ctx = match removed {
            Some(ctx) => ctx,
            None => return Ok(()),
        };
        let now = self.now_ns();
        ctx.mark_destroyed();
        ctx.set_trace_queue(None);
        self.isolation.mark_destroyed(execution_id, now);
        self.cleanup
            .record_cleanup(execution_id, now, method, true, None);
        if let Some(state) = self.async_trace.read().as_ref() {
            state.pool.unregister(execution_id);
        }
        self.destroyed_total.fetch_add(1, Ordering::Relaxed);
        info!(execution_id = %execution_id, method = method, "execution context destroyed");
        Ok(())
    }

    /// Looks up a live context.
    pub fn get_context(&self, execution_id: &str) -> Result<Arc<ExecutionContext>> {
        let ctx = self
            .contexts
            .read()
            .get(execution_id)
            .cloned()
            .ok_or_else(|| ExecutionError::ContextNotFound {
                execution_id: execution_id.to_string(),
            })?;
        let now = self.now_ns();
        if ctx.is_expired(now) {
            return Err(ExecutionError::ContextExpired {
                execution_id: execution_id.to_string(),
            });
        }
        self.isolation.note_access(execution_id, now);
        ctx.note_access(now);
        Ok(ctx)
    }

    /// Ids of every live context.
    pub fn list_contexts(&self) -> Vec<String> {
        self.contexts.read().keys().cloned().collect()
    }

    /// Number of live contexts.
    pub fn active_context_count(&self) -> usize {
        self.contexts.read().len()
    }

    /// Aggregate statistics.
    pub fn get_stats(&self) -> ManagerStats {
        let state = self.async_trace.read();
        ManagerStats {
            active_contexts: self.contexts.read().len(),
            created_total: self.created_total.load(Ordering::Relaxed),
            destroyed_total: self.destroyed_total.load(Ordering::Relaxed),
            expired_total: self.expired_total.load(Ordering::Relaxed),
            async_trace_enabled: state.is_some(),
            queue: state.as_ref().map(|s| s.queue.stats()),
            worker_pool: state.as_ref().map(|s| s.pool.stats()),
        }
    }

    /// Starts the periodic expiry sweep. Idempotent.
    pub fn start_cleanup_task(self: &Arc<Self>) {
        let mut handle_slot = self.sweep_handle.lock();
        if handle_slot.is_some() {
            return;
        }
        let interval =
            Duration::from_millis(self.services.config().execution.ispc.cleanup_interval_ms);
        let (tx, mut rx) = watch::channel(false);
        *self.sweep_stop.lock() = Some(tx);
        let manager = Arc::clone(self);
        *handle_slot = Some(tokio::spawn(async move {
            debug!("context cleanup task started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = rx.changed() => {}
                }
                if *rx.borrow() {
                    break;
                }
                manager.sweep_expired_contexts();
            }
            debug!("context cleanup task stopped");
        }));
    }

    /// Stops the periodic sweep, joining its task.
    pub async fn stop_cleanup_task(&self) {
        if let Some(tx) = self.sweep_stop.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.sweep_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// One sweep tick: destroys expired contexts and ages out old tracking.
    ///
    /// Only contexts carrying a deadline are ever considered. Returns how
    /// many were removed.
    pub fn sweep_expired_contexts(&self) -> usize {
        let now = self.now_ns();
        let expired: Vec<String> = {
            let contexts = self.contexts.read();
            contexts
                .iter()
                .filter(|(_, ctx)| ctx.is_expired(now))
                .map(|(id, _)| id.clone())
                .collect()
        };
        for execution_id in &expired {
            if self.destroy_with_method(execution_id, "expiry_sweep").is_ok() {
                self.expired_total.fetch_add(1, Ordering::Relaxed);
                info!(execution_id = %execution_id, "expired context swept");
            }
        }
        let max_age_ns = self
            .services
            .config()
            .execution
            .ispc
            .tracking_max_age_ms
            .saturating_mul(1_000_000);
        self.isolation.cleanup_old_tracking(max_age_ns, now);
        expired.len()
    }

    /// Switches trace recording onto a shared queue and worker pool.
    ///
    /// Idempotent: enabling twice leaves the first pool in place.
    pub async fn enable_async_trace_recording(
        &self,
        workers: usize,
        batch_size: usize,
        batch_timeout: Duration,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<()> {
        let _guard = self.trace_lifecycle.lock().await;
        if self.async_trace.read().is_some() {
            return Ok(());
        }
        let queue = Arc::new(TraceQueue::new());
        let pool = Arc::new(TraceWorkerPool::new(
            Arc::clone(&queue),
            workers,
            TraceWorkerConfig {
                batch_size,
                batch_timeout,
                max_retries,
                retry_delay,
            },
        ));
        *self.async_trace.write() = Some(AsyncTraceState {
            queue: Arc::clone(&queue),
            pool: Arc::clone(&pool),
        });
        {
            let contexts = self.contexts.read();
            for (execution_id, ctx) in contexts.iter() {
                pool.register(execution_id, ctx);
                ctx.set_trace_queue(Some(Arc::clone(&queue)));
            }
        }
        pool.start().await;
        info!(workers, batch_size, "async trace recording enabled");
        Ok(())
    }

    /// Applies the configured trace mode: enables the async pipeline with
    /// the configured knobs when `async_trace.enabled` is set.
    pub async fn apply_configured_trace_mode(&self) -> Result<()> {
        let trace_config = self.services.config().execution.ispc.async_trace.clone();
        if !trace_config.enabled {
            return Ok(());
        }
        self.enable_async_trace_recording(
            trace_config.workers,
            trace_config.batch_size,
            Duration::from_millis(trace_config.batch_timeout_ms),
            trace_config.max_retries,
            Duration::from_millis(trace_config.retry_delay_ms),
        )
        .await
    }

    /// Drains and tears down the async trace pipeline. Idempotent.
    pub async fn disable_async_trace_recording(&self) -> Result<()> {
        let _guard = self.trace_lifecycle.lock().await;
        let state = match self.async_trace.write().take() {
            Some(state) => state,
            None => return Ok(()),
        };
        {
            let contexts = self.contexts.read();
            for ctx in contexts.values() {
                ctx.set_trace_queue(None);
            }
        }
        state.pool.flush().await;
        state.pool.stop().await;
        info!("async trace recording disabled");
        Ok(())
    }

    /// Drains the shared queue. A no-op while async tracing is off.
    pub async fn flush_trace_queue(&self) -> Result<()> {
        let _guard = self.trace_lifecycle.lock().await;
        let pool = self.async_trace.read().as_ref().map(|s| Arc::clone(&s.pool));
        if let Some(pool) = pool {
            pool.flush().await;
        }
        Ok(())
    }

    /// Queue counters, when async tracing is on.
    pub fn get_trace_queue_stats(&self) -> Option<TraceQueueStats> {
        self.async_trace.read().as_ref().map(|s| s.queue.stats())
    }

    /// Worker-pool counters, when async tracing is on.
    pub fn get_trace_pool_stats(&self) -> Option<TraceWorkerPoolStats> {
        self.async_trace.read().as_ref().map(|s| s.pool.stats())
    }

    /// Whether trace records ride the shared queue.
    pub fn is_async_trace_recording_enabled(&self) -> bool {
        self.async_trace.read().is_some()
    }

    /// Leak findings from the isolation enforcer.
    pub fn detect_context_leaks(&self) -> Vec<LeakReport> {
        self.isolation.detect_leaks(self.now_ns())
    }

    /// Whether an execution was destroyed cleanly.
    pub fn verify_context_cleanup(&self, execution_id: &str) -> bool {
        self.cleanup.verify_cleanup(execution_id)
    }

    /// The cleanup verifier.
    pub fn cleanup_verifier(&self) -> &CleanupVerifier {
        &self.cleanup
    }

    /// The isolation enforcer.
    pub fn isolation_enforcer(&self) -> &IsolationEnforcer {
        &self.isolation
    }

    /// Detached read-only copy of a live context.
    pub fn deep_copy_context(&self, execution_id: &str) -> Result<ExecutionContext> {
        let ctx = self.get_context(execution_id)?;
        Ok(ctx.deep_copy())
    }

    /// Verifies two live contexts are isolated from each other.
    pub fn verify_context_isolation(&self, id_a: &str, id_b: &str) -> Result<()> {
        let a = self.get_context(id_a)?;
        let b = self.get_context(id_b)?;
        isolation::verify_context_isolation(&a, &b)
    }

    /// Compares two RSS samples taken around an execution window.
    pub fn check_memory_leak(&self, before_bytes: u64, after_bytes: u64) -> MemoryLeakReport {
        check_memory_leak(before_bytes, after_bytes)
    }

    /// Current process RSS, for leak bracketing.
    pub fn memory_sample(&self) -> u64 {
        self.services.memory().current_rss_bytes()
    }

    /// Records a finalized execution result for consistency checking.
    pub fn record_execution_result(&self, input_hash: &[u8], result_hash: &[u8]) -> Result<()> {
        self.result_verifier
            .record(input_hash, result_hash, self.now_ns())
    }

    /// Checks a candidate result without recording it.
    pub fn verify_execution_result(&self, input_hash: &[u8], result_hash: &[u8]) -> Result<()> {
        self.result_verifier.verify(input_hash, result_hash)
    }

    /// The result verifier.
    pub fn result_verifier(&self) -> &ExecutionResultVerifier {
        &self.result_verifier
    }

    /// Runs every registered validation rule over a trace.
    pub fn validate_trace(&self, trace: &ExecutionTrace) -> Vec<String> {
        self.integrity.validate_trace(trace)
    }

    /// Runs the enabled integrity checks over a trace.
    pub fn check_trace_integrity(&self, trace: &ExecutionTrace) -> IntegrityReport {
        self.integrity.check_integrity(trace)
    }

    /// Registers a named trace validation rule.
    pub fn register_trace_validation_rule<F>(&self, name: &str, rule: F)
    where
        F: Fn(&ExecutionTrace) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.integrity.register_rule(name, rule);
    }

    /// Stores a live context's trace for later replay.
    pub fn record_trace_for_replay(&self, execution_id: &str) -> Result<()> {
        let ctx = self.get_context(execution_id)?;
        let now = self.now_ns();
        self.replay.record_trace(ExecutionTrace::from_context(&ctx, now), now);
        Ok(())
    }

    /// Replays a stored trace through `handler` in timestamp order.
    pub fn replay_trace<F>(&self, execution_id: &str, handler: F) -> Result<usize>
    where
        F: FnMut(&ReplayOperation) -> Result<()>,
    {
        self.replay.replay_trace(execution_id, handler)
    }

    /// The replay store.
    pub fn replay_store(&self) -> &TraceReplayStore {
        &self.replay
    }

    /// Current debug verbosity.
    pub fn debug_mode(&self) -> DebugMode {
        *self.debug_mode.read()
    }

    /// Sets the debug verbosity.
    pub fn set_debug_mode(&self, mode: DebugMode) {
        *self.debug_mode.write() = mode;
        info!(mode = %mode, "debug mode changed");
    }

    /// Interactive debugger over this manager.
    pub fn get_debugger(self: &Arc<Self>) -> ContextDebugger {
        ContextDebugger::new(Arc::clone(self))
    }

    /// Programmatic debug tool over this manager.
    pub fn get_debug_tool(self: &Arc<Self>) -> DebugTool {
        DebugTool::new(Arc::clone(self))
    }

    /// JSON snapshot of a live context's state.
    pub fn export_context_state(&self, execution_id: &str, include_stack: bool) -> Result<Vec<u8>> {
        let ctx = self.get_context(execution_id)?;
        let snapshot = ContextStateSnapshot::capture(&ctx, self.now_ns(), include_stack);
        serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| ExecutionError::invalid_argument(format!("serialize snapshot: {e}")))
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Graceful shutdown with an explicit drain timeout.
    ///
    /// New contexts are rejected immediately; live ones get `drain_timeout`
    /// to be destroyed by their coordinators before being forced down.
    pub async fn shutdown_with_timeout(&self, drain_timeout: Duration) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("execution context manager shutting down");
        self.stop_cleanup_task().await;
        self.disable_async_trace_recording().await?;

        let deadline = tokio::time::Instant::now() + drain_timeout;
        while self.active_context_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL.min(drain_timeout)).await;
        }
        let remaining = self.list_contexts();
        if !remaining.is_empty() {
            warn!(
                remaining = remaining.len(),
                "forcing shutdown past drain timeout"
            );
            for execution_id in remaining {
                let _ = self.destroy_with_method(&execution_id, "shutdown");
            }
        }
        info!("execution context manager shut down");
        Ok(())
    }
}

#[async_trait]
impl Shutdown for ExecutionContextManager {
    fn name(&self) -> &str {
        "execution-context-manager"
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(GRACEFUL_SHUTDOWN_TIMEOUT).await
    }
}
