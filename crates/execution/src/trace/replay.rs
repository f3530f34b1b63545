//! Trace replay for debugging.
//!
//! A bounded store of recently finalized traces. Replaying walks every
//! recorded operation in timestamp order through a caller-supplied handler,
//! which is how an operator re-observes a suspicious execution without
//! re-running the contract.

use crate::error::{ExecutionError, Result};
use crate::trace::integrity::ExecutionTrace;
use crate::trace::record::{ExecutionEvent, HostFunctionCall, StateChange};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Maximum traces retained for replay.
pub const REPLAY_STORE_CAPACITY: usize = 100;

/// One stored trace plus replay bookkeeping.
#[derive(Debug, Clone)]
pub struct ReplayRecord {
    /// Owning execution
    pub execution_id: String,
    /// The stored trace
    pub trace: ExecutionTrace,
    /// When the trace was stored, nanoseconds
    pub recorded_at_ns: u64,
    /// How many times it was replayed
    pub replay_count: u64,
}

/// One operation observed during replay.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOperation {
    /// A host-function call
    HostCall(HostFunctionCall),
    /// A state change
    StateChange(StateChange),
    /// An execution event
    Event(ExecutionEvent),
}

impl ReplayOperation {
    fn timestamp_ns(&self) -> u64 {
        match self {
            ReplayOperation::HostCall(call) => call.timestamp_ns,
            ReplayOperation::StateChange(change) => change.timestamp_ns,
            ReplayOperation::Event(event) => event.timestamp_ns,
        }
    }
}

/// Bounded FIFO of replayable traces.
#[derive(Default)]
pub struct TraceReplayStore {
    records: Mutex<VecDeque<ReplayRecord>>,
}

impl TraceReplayStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a trace, evicting the oldest entry past capacity.
    pub fn record_trace(&self, trace: ExecutionTrace, now_ns: u64) {
        let mut records = self.records.lock();
        if records.len() == REPLAY_STORE_CAPACITY {
            records.pop_front();
        }
        records.push_back(ReplayRecord {
            execution_id: trace.execution_id.clone(),
            trace,
            recorded_at_ns: now_ns,
            replay_count: 0,
        });
    }

    /// Number of stored traces.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of the stored record for an execution, if any.
    pub fn get(&self, execution_id: &str) -> Option<ReplayRecord> {
        self.records
            .lock()
            .iter()
            .find(|r| r.execution_id == execution_id)
            .cloned()
    }

    /// Replays a stored trace through `handler` in timestamp order.
    ///
    /// Handler errors short-circuit the walk; the replay counter only moves
    /// on a complete pass. Returns the number of operations replayed.
    pub fn replay_trace<F>(&self, execution_id: &str, mut handler: F) -> Result<usize>
    where
        F: FnMut(&ReplayOperation) -> Result<()>,
    {
        let trace = {
            let records = self.records.lock();
            records
                .iter()
                .find(|r| r.execution_id == execution_id)
                .map(|r| r.trace.clone())
                .ok_or_else(|| ExecutionError::ContextNotFound {
                    execution_id: execution_id.to_string(),
                })?
        };

        let mut operations: Vec<ReplayOperation> = Vec::with_capacity(
            trace.host_calls.len() + trace.state_changes.len() + trace.events.len(),
        );
        operations.extend(trace.host_calls.into_iter().map(ReplayOperation::HostCall));
        operations.extend(
            trace
                .state_changes
                .into_iter()
                .map(ReplayOperation::StateChange),
        );
        operations.extend(trace.events.into_iter().map(ReplayOperation::Event));
        operations.sort_by_key(ReplayOperation::timestamp_ns);

        for operation in &operations {
            handler(operation)?;
        }

        let mut records = self.records.lock();
        if let Some(record) = records.iter_mut().find(|r| r.execution_id == execution_id) {
            record.replay_count += 1;
        }
        Ok(operations.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::record::StateChangeType;
    use crate::value::TraceValue;

    fn trace_with_operations(execution_id: &str) -> ExecutionTrace {
        ExecutionTrace {
            execution_id: execution_id.into(),
            start_time_ns: 100,
            end_time_ns: 900,
            total_duration_ns: 800,
            host_calls: vec![
                HostFunctionCall::new(1, "first").with_timestamp_ns(200),
                HostFunctionCall::new(2, "third").with_timestamp_ns(600),
            ],
            state_changes: vec![StateChange {
                change_type: StateChangeType::UtxoCreate,
                key: "utxo:1".into(),
                old_value: None,
                new_value: None,
                timestamp_ns: 400,
            }],
            events: vec![ExecutionEvent {
                event_type: "custom".into(),
                data: TraceValue::empty_map(),
                timestamp_ns: 800,
            }],
        }
    }

    #[test]
    fn replay_walks_operations_in_timestamp_order() {
        let store = TraceReplayStore::new();
        store.record_trace(trace_with_operations("r1"), 1_000);

        let mut seen = Vec::new();
        let replayed = store
            .replay_trace("r1", |op| {
                seen.push(match op {
                    ReplayOperation::HostCall(call) => call.function_name.clone(),
                    ReplayOperation::StateChange(change) => change.key.clone(),
                    ReplayOperation::Event(event) => event.event_type.clone(),
                });
                Ok(())
            })
            .unwrap();
        assert_eq!(replayed, 4);
        assert_eq!(seen, vec!["first", "utxo:1", "third", "custom"]);
        assert_eq!(store.get("r1").unwrap().replay_count, 1);
    }

    #[test]
    fn handler_errors_short_circuit() {
        let store = TraceReplayStore::new();
        store.record_trace(trace_with_operations("r2"), 1_000);

        let mut visited = 0;
        let err = store
            .replay_trace("r2", |_| {
                visited += 1;
                if visited == 2 {
                    Err(ExecutionError::trace_write("handler refused"))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert_eq!(visited, 2);
        assert!(matches!(err, ExecutionError::TraceWriteFailed { .. }));
        // An aborted replay does not count.
        assert_eq!(store.get("r2").unwrap().replay_count, 0);
    }

    #[test]
    fn unknown_executions_are_not_found() {
        let store = TraceReplayStore::new();
        let err = store.replay_trace("ghost", |_| Ok(())).unwrap_err();
        assert!(err.is_context_missing());
    }

    #[test]
    fn capacity_is_bounded_fifo() {
        let store = TraceReplayStore::new();
        for index in 0..REPLAY_STORE_CAPACITY + 10 {
            let mut trace = trace_with_operations(&format!("r{index}"));
            trace.execution_id = format!("r{index}");
            store.record_trace(trace, index as u64);
        }
        assert_eq!(store.len(), REPLAY_STORE_CAPACITY);
        // The ten oldest entries were evicted.
        assert!(store.get("r0").is_none());
        assert!(store.get("r9").is_none());
        assert!(store.get("r10").is_some());
    }

    #[test]
    fn stable_sort_preserves_ties() {
        let store = TraceReplayStore::new();
        let mut trace = trace_with_operations("r3");
        // Same timestamp for a call and a change: insertion category order
        // (calls before changes) must hold.
        trace.host_calls[1].timestamp_ns = 400;
        store.record_trace(trace, 0);
        let mut seen = Vec::new();
        store
            .replay_trace("r3", |op| {
                seen.push(matches!(op, ReplayOperation::HostCall(_)));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![true, true, false, false]);
    }
}
