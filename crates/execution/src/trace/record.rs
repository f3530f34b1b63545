//! Trace record shapes.
//!
//! One contract invocation produces an ordered stream of host-function calls,
//! state changes and execution events. These are the shapes buffered inside a
//! context and, in asynchronous mode, carried through the shared queue.

use crate::value::TraceValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Event type stamped on auto-emitted host-call events.
pub const EVENT_HOST_FUNCTION_CALL: &str = "host_function_call";
/// Event type stamped on auto-emitted state-change events.
pub const EVENT_STATE_CHANGE: &str = "state_change";

/// One host-function invocation observed by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostFunctionCall {
    /// Ordering key assigned by the engine, strictly increasing per context
    pub sequence: u64,
    /// Host function name, e.g. `GetBlockHeight`
    pub function_name: String,
    /// Call parameters as supplied by the engine
    pub parameters: TraceValue,
    /// Call result as observed by the engine
    pub result: TraceValue,
    /// Absolute timestamp, nanoseconds since the Unix epoch
    pub timestamp_ns: u64,
    /// Time elapsed since the previous call in the same context
    pub duration_ns: u64,
    /// Whether the call succeeded
    pub success: bool,
    /// Error detail when `success` is false
    pub error: Option<String>,
}

impl HostFunctionCall {
    /// Builds a successful call record; the context stamps timing on record.
    pub fn new(sequence: u64, function_name: impl Into<String>) -> Self {
        Self {
            sequence,
            function_name: function_name.into(),
            parameters: TraceValue::empty_map(),
            result: TraceValue::empty_map(),
            timestamp_ns: 0,
            duration_ns: 0,
            success: true,
            error: None,
        }
    }

    /// Sets the parameter payload.
    pub fn with_parameters(mut self, parameters: impl Into<TraceValue>) -> Self {
        self.parameters = parameters.into();
        self
    }

    /// Sets the result payload.
    pub fn with_result(mut self, result: impl Into<TraceValue>) -> Self {
        self.result = result.into();
        self
    }

    /// Sets the absolute timestamp.
    pub fn with_timestamp_ns(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    /// Marks the call failed with an error detail.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// The projected host-call shape handed to external consumers.
///
/// Parameters and results are always maps here; non-map payloads are wrapped
/// as `{"value": …}` on projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostCallSnapshot {
    /// Ordering key assigned by the engine
    pub sequence: u64,
    /// Host function name
    pub function_name: String,
    /// Parameters, projected to a uniform map
    pub parameters: BTreeMap<String, TraceValue>,
    /// Result, projected to a uniform map
    pub result: BTreeMap<String, TraceValue>,
    /// Absolute timestamp, nanoseconds
    pub timestamp_ns: u64,
    /// Delta since the previous call, nanoseconds
    pub duration_ns: u64,
    /// Whether the call succeeded
    pub success: bool,
    /// Error detail when the call failed
    pub error: Option<String>,
}

impl From<&HostFunctionCall> for HostCallSnapshot {
    fn from(call: &HostFunctionCall) -> Self {
        Self {
            sequence: call.sequence,
            function_name: call.function_name.clone(),
            parameters: call.parameters.to_map_payload(),
            result: call.result.to_map_payload(),
            timestamp_ns: call.timestamp_ns,
            duration_ns: call.duration_ns,
            success: call.success,
            error: call.error.clone(),
        }
    }
}

/// Kind of a recorded state mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChangeType {
    /// A new UTXO was created
    UtxoCreate,
    /// An existing UTXO was spent
    UtxoSpend,
    /// A contract storage slot was written
    StorageSet,
    /// A contract storage slot was removed
    StorageDelete,
}

impl StateChangeType {
    /// Wire name of the change type.
    pub fn as_str(&self) -> &'static str {
        match self {
            StateChangeType::UtxoCreate => "utxo_create",
            StateChangeType::UtxoSpend => "utxo_spend",
            StateChangeType::StorageSet => "storage_set",
            StateChangeType::StorageDelete => "storage_delete",
        }
    }
}

impl fmt::Display for StateChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One state mutation observed by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    /// Kind of mutation
    pub change_type: StateChangeType,
    /// Key the mutation touched
    pub key: String,
    /// Value before the mutation, if any
    pub old_value: Option<TraceValue>,
    /// Value after the mutation, if any
    pub new_value: Option<TraceValue>,
    /// Absolute timestamp, nanoseconds
    pub timestamp_ns: u64,
}

/// An event emitted during execution.
///
/// The runtime emits one automatically for every recorded host call and state
/// change; contracts may add their own through the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Event type tag
    pub event_type: String,
    /// Opaque event payload
    pub data: TraceValue,
    /// Absolute timestamp, nanoseconds
    pub timestamp_ns: u64,
}

/// Payload variants carried through the trace queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraceRecordPayload {
    /// A host-function call record
    HostCall(HostFunctionCall),
    /// A state-change record
    StateChange(StateChange),
    /// An execution event
    Event(ExecutionEvent),
}

/// A queue element: one trace payload plus its owning context id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Id of the context that produced the payload
    pub execution_id: String,
    /// The payload itself
    pub payload: TraceRecordPayload,
}

impl TraceRecord {
    /// Wraps a host call for the queue.
    pub fn host_call(execution_id: impl Into<String>, call: HostFunctionCall) -> Self {
        Self {
            execution_id: execution_id.into(),
            payload: TraceRecordPayload::HostCall(call),
        }
    }

    /// Wraps a state change for the queue.
    pub fn state_change(execution_id: impl Into<String>, change: StateChange) -> Self {
        Self {
            execution_id: execution_id.into(),
            payload: TraceRecordPayload::StateChange(change),
        }
    }

    /// Wraps an event for the queue.
    pub fn event(execution_id: impl Into<String>, event: ExecutionEvent) -> Self {
        Self {
            execution_id: execution_id.into(),
            payload: TraceRecordPayload::Event(event),
        }
    }
}
