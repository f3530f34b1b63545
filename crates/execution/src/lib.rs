//! Execution-context subsystem for the ISPC contract runtime.
//!
//! The ISPC (Intrinsic Self-Proving Compute) execution layer runs WASM/ONNX
//! contracts and must be able to prove, after the fact, exactly what each
//! invocation did. This crate owns the per-invocation runtime environment
//! that makes that possible:
//!
//! - one isolated [`context::ExecutionContext`] per contract invocation,
//!   holding the transaction draft, trace buffers and resource counters;
//! - a lock-free [`trace::TraceQueue`] plus [`trace::TraceWorkerPool`] for
//!   asynchronous trace ingestion off the execution hot path;
//! - [`determinism`] services pinning timestamps and RNG seeds so identical
//!   inputs produce byte-identical outputs and traces on every node;
//! - the [`manager::ExecutionContextManager`] registry with expiry sweeps,
//!   isolation and cleanup verification, trace integrity checking, replay
//!   and a debug surface.
//!
//! Engines call in through the [`host_abi::HostAbi`] port; the coordinator
//! owns context creation, flushing and destruction.

pub mod address;
pub mod context;
pub mod determinism;
pub mod error;
pub mod host_abi;
pub mod manager;
pub mod memory;
pub mod services;
pub mod shutdown;
pub mod trace;
pub mod value;

pub use address::Address;
pub use context::draft::{DraftInput, DraftOutput, DraftTransaction, TransactionDraft};
pub use context::resource::ResourceUsage;
pub use context::snapshot::{ContextStateSnapshot, ResourceUsageSnapshot};
pub use context::{CallScope, ExecutionContext};
pub use determinism::{DeterministicEnforcer, DeterministicRandomSource, ExecutionResultVerifier};
pub use error::{ExecutionError, Result};
pub use host_abi::HostAbi;
pub use manager::debug::{ContextDebugger, DebugMode, DebugTool};
pub use manager::isolation::{IsolationEnforcer, LeakReport};
pub use manager::{ExecutionContextManager, ManagerStats};
pub use services::RuntimeServices;
pub use shutdown::{Shutdown, GRACEFUL_SHUTDOWN_TIMEOUT};
pub use trace::{
    ExecutionEvent, ExecutionTrace, HostCallSnapshot, HostFunctionCall, IntegrityConfig,
    IntegrityReport, StateChange, StateChangeType, TraceIntegrityChecker, TraceQueue,
    TraceQueueStats, TraceRecord, TraceRecordPayload, TraceReplayStore, TraceWorkerConfig,
    TraceWorkerPool,
};
pub use value::TraceValue;
