//! Trace recording pipeline: record shapes, the lock-free queue, the drain
//! workers, integrity checking and replay.

pub mod integrity;
pub mod queue;
pub mod record;
pub mod replay;
pub mod worker;

pub use integrity::{
    compute_trace_hash, ExecutionTrace, IntegrityConfig, IntegrityReport, TraceIntegrityChecker,
};
pub use queue::{TraceQueue, TraceQueueStats};
pub use record::{
    ExecutionEvent, HostCallSnapshot, HostFunctionCall, StateChange, StateChangeType, TraceRecord,
    TraceRecordPayload,
};
pub use replay::{ReplayOperation, ReplayRecord, TraceReplayStore, REPLAY_STORE_CAPACITY};
pub use worker::{TraceWorker, TraceWorkerConfig, TraceWorkerPool, TraceWorkerPoolStats, TraceWorkerStats};
