//! Per-invocation execution contexts.
//!
//! One context exists per contract invocation. It carries identity and
//! correlation data, the transaction draft, the ordered trace buffers, the
//! determinism enforcer and resource counters. The owning engine is the only
//! writer on the hot path; the manager, coordinator and trace workers read
//! and append under the context's own lock.

pub mod draft;
pub mod resource;
pub mod snapshot;

use crate::address::Address;
use crate::determinism::{DeterministicEnforcer, DeterministicRandomSource};
use crate::error::{ExecutionError, Result};
use crate::host_abi::HostAbi;
use crate::services::RuntimeServices;
use crate::trace::queue::TraceQueue;
use crate::trace::record::{
    ExecutionEvent, HostCallSnapshot, HostFunctionCall, StateChange, StateChangeType, TraceRecord,
    TraceRecordPayload, EVENT_HOST_FUNCTION_CALL, EVENT_STATE_CHANGE,
};
use crate::value::TraceValue;
use draft::TransactionDraft;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use resource::{ResourceUsage, TRACE_CALL_OVERHEAD_BYTES};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Initial capacity of the host-call buffer.
const HOST_CALL_BUFFER_CAPACITY: usize = 100;
/// Initial capacity of the state-change buffer.
const STATE_CHANGE_BUFFER_CAPACITY: usize = 50;
/// Initial capacity of the event buffers.
const EVENT_BUFFER_CAPACITY: usize = 50;

/// Correlation data inherited from the calling request.
#[derive(Debug, Clone, Default)]
pub struct CallScope {
    /// Absolute deadline; `None` means the execution never expires
    pub deadline_ns: Option<u64>,
    /// Distributed-trace correlation id
    pub trace_id: String,
    /// Request correlation id
    pub request_id: String,
    /// Acting user id
    pub user_id: String,
}

struct ContextInner {
    contract_address: Option<Address>,
    init_params: Vec<u8>,
    draft: Option<TransactionDraft>,
    host_calls: Vec<HostFunctionCall>,
    state_changes: Vec<StateChange>,
    execution_events: Vec<ExecutionEvent>,
    events: Vec<ExecutionEvent>,
    return_data: Vec<u8>,
    state_before: Vec<u8>,
    state_after: Vec<u8>,
    last_call_time_ns: u64,
    last_access_ns: u64,
    resource: ResourceUsage,
}

/// The per-invocation runtime environment of one contract call.
pub struct ExecutionContext {
    execution_id: String,
    created_at_ns: u64,
    expires_at_ns: u64,
    has_deadline: bool,
    trace_id: String,
    request_id: String,
    user_id: String,
    caller_address: Address,
    services: Option<Arc<RuntimeServices>>,
    host_abi: RwLock<Option<Arc<dyn HostAbi>>>,
    enforcer: DeterministicEnforcer,
    random: OnceCell<Arc<DeterministicRandomSource>>,
    async_queue: RwLock<Option<Arc<TraceQueue>>>,
    destroyed: AtomicBool,
    inner: RwLock<ContextInner>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("execution_id", &self.execution_id)
            .field("created_at_ns", &self.created_at_ns)
            .field("expires_at_ns", &self.expires_at_ns)
            .field("has_deadline", &self.has_deadline)
            .field("trace_id", &self.trace_id)
            .field("request_id", &self.request_id)
            .field("user_id", &self.user_id)
            .field("caller_address", &self.caller_address)
            .field("destroyed", &self.destroyed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Creates a context.
    ///
    /// A draft is pre-created exactly when a caller address was supplied, so
    /// executions entered through the transaction path never observe
    /// "draft not initialized". `fixed_timestamp_ns` pins the deterministic
    /// timestamp; when absent the creation instant is pinned instead.
    pub fn new(
        execution_id: impl Into<String>,
        scope: &CallScope,
        caller: Option<Address>,
        init_params: Vec<u8>,
        services: Option<Arc<RuntimeServices>>,
        fixed_timestamp_ns: Option<u64>,
    ) -> Self {
        let execution_id = execution_id.into();
        let created_at_ns = match &services {
            Some(services) => services.now_ns(),
            None => system_now_ns(),
        };
        let caller_address = caller.unwrap_or_else(Address::zero);
        let draft = caller.map(|address| {
            TransactionDraft::new(execution_id.clone(), address, created_at_ns)
        });
        let enforcer = DeterministicEnforcer::new(
            execution_id.clone(),
            init_params.clone(),
            fixed_timestamp_ns,
            created_at_ns,
        );

        Self {
            execution_id,
            created_at_ns,
            expires_at_ns: scope.deadline_ns.unwrap_or(0),
            has_deadline: scope.deadline_ns.is_some(),
            trace_id: scope.trace_id.clone(),
            request_id: scope.request_id.clone(),
            user_id: scope.user_id.clone(),
            caller_address,
            services,
            host_abi: RwLock::new(None),
            enforcer,
            random: OnceCell::new(),
            async_queue: RwLock::new(None),
            destroyed: AtomicBool::new(false),
            inner: RwLock::new(ContextInner {
                contract_address: None,
                init_params,
                draft,
                host_calls: Vec::with_capacity(HOST_CALL_BUFFER_CAPACITY),
                state_changes: Vec::with_capacity(STATE_CHANGE_BUFFER_CAPACITY),
                execution_events: Vec::with_capacity(EVENT_BUFFER_CAPACITY),
                events: Vec::with_capacity(EVENT_BUFFER_CAPACITY),
                return_data: Vec::new(),
                state_before: Vec::new(),
                state_after: Vec::new(),
                last_call_time_ns: 0,
                last_access_ns: created_at_ns,
                resource: ResourceUsage::new(created_at_ns),
            }),
        }
    }

    fn now_ns(&self) -> u64 {
        match &self.services {
            Some(services) => services.now_ns(),
            None => system_now_ns(),
        }
    }

    /// Unique identity of this execution.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Creation instant, nanoseconds.
    pub fn created_at_ns(&self) -> u64 {
        self.created_at_ns
    }

    /// Deadline instant; only authoritative when [`Self::has_deadline`].
    pub fn expires_at_ns(&self) -> u64 {
        self.expires_at_ns
    }

    /// Whether a deadline was inherited from the caller.
    pub fn has_deadline(&self) -> bool {
        self.has_deadline
    }

    /// Whether the deadline has passed at `now_ns`.
    pub fn is_expired(&self, now_ns: u64) -> bool {
        self.has_deadline && now_ns > self.expires_at_ns
    }

    /// Distributed-trace correlation id.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Request correlation id.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Acting user id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Address that initiated the execution.
    pub fn caller_address(&self) -> Address {
        self.caller_address
    }

    /// The executing contract's address, once set.
    pub fn contract_address(&self) -> Option<Address> {
        self.inner.read().contract_address
    }

    /// Sets the contract address. Exactly 20 bytes, set once.
    pub fn set_contract_address(&self, bytes: &[u8]) -> Result<()> {
        let address = Address::from_bytes(bytes)?;
        let mut inner = self.inner.write();
        if inner.contract_address.is_some() {
            return Err(ExecutionError::invalid_argument(
                "contract address already set",
            ));
        }
        inner.contract_address = Some(address);
        Ok(())
    }

    /// The injected hostABI port.
    pub fn host_abi(&self) -> Result<Arc<dyn HostAbi>> {
        self.host_abi
            .read()
            .clone()
            .ok_or(ExecutionError::HostAbiNotSet)
    }

    /// Injects the hostABI port. Set-once discipline is the caller's.
    pub fn set_host_abi(&self, abi: Arc<dyn HostAbi>) {
        *self.host_abi.write() = Some(abi);
    }

    /// Copy of the transaction draft.
    pub fn transaction_draft(&self) -> Result<TransactionDraft> {
        self.inner
            .read()
            .draft
            .clone()
            .ok_or(ExecutionError::DraftNotInitialized)
    }

    /// Replaces the transaction draft.
    pub fn update_transaction_draft(&self, draft: TransactionDraft) -> Result<()> {
        if draft.draft_id.is_empty() {
            return Err(ExecutionError::NilTransactionDraft);
        }
        self.inner.write().draft = Some(draft);
        Ok(())
    }

    /// Records one host-function call. The hot path.
    ///
    /// Synchronous mode appends to the buffer under the write lock; async
    /// mode pre-computes timing, bumps the counters, emits the auto event
    /// synchronously and routes the record through the shared queue.
    pub fn record_host_function_call(&self, mut call: HostFunctionCall) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ExecutionError::ContextNotFound {
                execution_id: self.execution_id.clone(),
            });
        }
        let now = self.now_ns();
        let queue = self.async_queue.read().clone();

        let mut inner = self.inner.write();
        let previous = if inner.last_call_time_ns == 0 {
            self.created_at_ns
        } else {
            inner.last_call_time_ns
        };
        call.duration_ns = now.saturating_sub(previous);
        if call.timestamp_ns == 0 {
            call.timestamp_ns = now;
        }
        inner.last_call_time_ns = now;
        inner.resource.host_function_calls += 1;
        classify_query(&call.function_name, &mut inner.resource);
        let auto_event = ExecutionEvent {
            event_type: EVENT_HOST_FUNCTION_CALL.to_string(),
            data: TraceValue::map([
                ("name", TraceValue::String(call.function_name.clone())),
                ("sequence", TraceValue::Integer(call.sequence as i64)),
            ]),
            timestamp_ns: now,
        };
        inner.execution_events.push(auto_event);

        match queue {
            Some(queue) => {
                drop(inner);
                queue.enqueue(TraceRecord::host_call(self.execution_id.clone(), call));
            }
            None => {
                if let Some(services) = &self.services {
                    let rss = services.memory().current_rss_bytes();
                    inner.resource.sample_memory(rss);
                }
                inner.host_calls.push(call);
            }
        }
        Ok(())
    }

    /// Records one state change.
    pub fn record_state_change(
        &self,
        change_type: StateChangeType,
        key: impl Into<String>,
        old_value: Option<TraceValue>,
        new_value: Option<TraceValue>,
    ) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ExecutionError::ContextNotFound {
                execution_id: self.execution_id.clone(),
            });
        }
        let now = self.now_ns();
        let key = key.into();
        let change = StateChange {
            change_type,
            key: key.clone(),
            old_value,
            new_value,
            timestamp_ns: now,
        };
        let queue = self.async_queue.read().clone();

        let mut inner = self.inner.write();
        inner.resource.state_changes += 1;
        let auto_event = ExecutionEvent {
            event_type: EVENT_STATE_CHANGE.to_string(),
            data: TraceValue::map([
                ("type", TraceValue::String(change_type.as_str().to_string())),
                ("key", TraceValue::String(key)),
            ]),
            timestamp_ns: now,
        };
        inner.execution_events.push(auto_event);

        match queue {
            Some(queue) => {
                drop(inner);
                queue.enqueue(TraceRecord::state_change(self.execution_id.clone(), change));
            }
            None => {
                inner.state_changes.push(change);
            }
        }
        Ok(())
    }

    /// Appends a batch of drained trace records.
    ///
    /// Called by the trace workers; no per-record timing is recomputed, the
    /// records carry whatever the enqueue path baked in.
    pub fn record_trace_records(&self, records: &[TraceRecord]) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ExecutionError::ContextNotFound {
                execution_id: self.execution_id.clone(),
            });
        }
        let mut inner = self.inner.write();
        for record in records {
            match &record.payload {
                TraceRecordPayload::HostCall(call) => {
                    // In the queued flow the enqueue path already counted this
                    // call, so counters overcount there; they are advisory in
                    // async mode, the buffers are the equivalence surface.
                    inner.resource.host_function_calls += 1;
                    classify_query(&call.function_name, &mut inner.resource);
                    inner.host_calls.push(call.clone());
                }
                TraceRecordPayload::StateChange(change) => {
                    inner.resource.state_changes += 1;
                    inner.state_changes.push(change.clone());
                }
                TraceRecordPayload::Event(event) => {
                    inner.execution_events.push(event.clone());
                }
            }
        }
        Ok(())
    }

    /// Snapshot of the host-call buffer in the external shape.
    pub fn execution_trace(&self) -> Vec<HostCallSnapshot> {
        self.inner
            .read()
            .host_calls
            .iter()
            .map(HostCallSnapshot::from)
            .collect()
    }

    /// Copy of the raw host-call buffer.
    pub fn host_calls(&self) -> Vec<HostFunctionCall> {
        self.inner.read().host_calls.clone()
    }

    /// Copy of the state-change buffer.
    pub fn state_changes(&self) -> Vec<StateChange> {
        self.inner.read().state_changes.clone()
    }

    /// Copy of the auto-emitted execution-event buffer.
    pub fn execution_events(&self) -> Vec<ExecutionEvent> {
        self.inner.read().execution_events.clone()
    }

    /// Sets the business return data.
    pub fn set_return_data(&self, data: &[u8]) {
        self.inner.write().return_data = data.to_vec();
    }

    /// Defensive copy of the business return data.
    pub fn return_data(&self) -> Vec<u8> {
        self.inner.read().return_data.clone()
    }

    /// Appends a business event, stamping the deterministic timestamp when
    /// the caller left it zero.
    pub fn add_event(&self, mut event: ExecutionEvent) {
        if event.timestamp_ns == 0 {
            event.timestamp_ns = self.enforcer.fixed_timestamp_ns();
        }
        self.inner.write().events.push(event);
    }

    /// Copy of the business events.
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.inner.read().events.clone()
    }

    /// Replaces the init parameters.
    pub fn set_init_params(&self, params: &[u8]) {
        self.inner.write().init_params = params.to_vec();
    }

    /// Defensive copy of the init parameters.
    pub fn init_params(&self) -> Vec<u8> {
        self.inner.read().init_params.clone()
    }

    /// Stores the before/after state snapshots.
    pub fn set_state_snapshots(&self, before: &[u8], after: &[u8]) {
        let mut inner = self.inner.write();
        inner.state_before = before.to_vec();
        inner.state_after = after.to_vec();
    }

    /// Defensive copy of the pre-execution state snapshot.
    pub fn state_before(&self) -> Vec<u8> {
        self.inner.read().state_before.clone()
    }

    /// Defensive copy of the post-execution state snapshot.
    pub fn state_after(&self) -> Vec<u8> {
        self.inner.read().state_after.clone()
    }

    /// Chain height through the hostABI; zero when unavailable.
    pub fn block_height(&self) -> u64 {
        match self.host_abi() {
            Ok(abi) => abi.block_height().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// The pinned block timestamp every node observes identically.
    pub fn block_timestamp_ns(&self) -> u64 {
        self.enforcer.fixed_timestamp_ns()
    }

    /// Chain identifier from configuration; empty for detached copies.
    pub fn chain_id(&self) -> String {
        self.services
            .as_ref()
            .map(|s| s.chain_id().to_string())
            .unwrap_or_default()
    }

    /// Deterministic transaction id of the current draft; empty without one.
    pub fn transaction_id(&self) -> String {
        self.inner
            .read()
            .draft
            .as_ref()
            .map(|d| d.transaction.transaction_id())
            .unwrap_or_default()
    }

    /// Identity of the current draft; empty without one.
    pub fn draft_id(&self) -> String {
        self.inner
            .read()
            .draft
            .as_ref()
            .map(|d| d.draft_id.clone())
            .unwrap_or_default()
    }

    /// The pinned deterministic timestamp.
    pub fn deterministic_timestamp_ns(&self) -> u64 {
        self.enforcer.fixed_timestamp_ns()
    }

    /// The seeded random source, derived lazily from the enforcer.
    pub fn deterministic_random_source(&self) -> Arc<DeterministicRandomSource> {
        self.random
            .get_or_init(|| Arc::new(DeterministicRandomSource::new(self.enforcer.fixed_seed())))
            .clone()
    }

    /// The determinism enforcer.
    pub fn enforcer(&self) -> &DeterministicEnforcer {
        &self.enforcer
    }

    /// Closes the statistics: stamps the end time and the trace size estimate.
    pub fn finalize_resource_usage(&self) {
        let now = self.now_ns();
        let mut inner = self.inner.write();
        inner.resource.end_time_ns = now;
        inner.resource.trace_size_bytes = inner
            .host_calls
            .iter()
            .map(|c| c.function_name.len() as u64 + TRACE_CALL_OVERHEAD_BYTES)
            .sum();
        inner.resource.finalized = true;
    }

    /// Copy of the resource counters.
    pub fn resource_usage(&self) -> ResourceUsage {
        self.inner.read().resource.clone()
    }

    /// Marks the context destroyed; later `record_*` calls fail as missing.
    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    /// Whether the manager already destroyed this context.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Routes subsequent `record_*` calls through the shared queue.
    pub(crate) fn set_trace_queue(&self, queue: Option<Arc<TraceQueue>>) {
        *self.async_queue.write() = queue;
    }

    /// Notes a read access for the snapshot surface.
    pub(crate) fn note_access(&self, now_ns: u64) {
        self.inner.write().last_access_ns = now_ns;
    }

    /// Last read access, nanoseconds.
    pub fn last_access_ns(&self) -> u64 {
        self.inner.read().last_access_ns
    }

    /// Detached read-only copy.
    ///
    /// Buffers and byte arrays are cloned, the hostABI port is shared, the
    /// manager port is dropped and resource counters start fresh; snapshots
    /// are for debugging and audit, not for further execution.
    pub fn deep_copy(&self) -> ExecutionContext {
        let inner = self.inner.read();
        ExecutionContext {
            execution_id: self.execution_id.clone(),
            created_at_ns: self.created_at_ns,
            expires_at_ns: self.expires_at_ns,
            has_deadline: self.has_deadline,
            trace_id: self.trace_id.clone(),
            request_id: self.request_id.clone(),
            user_id: self.user_id.clone(),
            caller_address: self.caller_address,
            services: None,
            host_abi: RwLock::new(self.host_abi.read().clone()),
            enforcer: self.enforcer.clone(),
            random: OnceCell::new(),
            async_queue: RwLock::new(None),
            destroyed: AtomicBool::new(self.destroyed.load(Ordering::Acquire)),
            inner: RwLock::new(ContextInner {
                contract_address: inner.contract_address,
                init_params: inner.init_params.clone(),
                draft: inner.draft.clone(),
                host_calls: inner.host_calls.clone(),
                state_changes: inner.state_changes.clone(),
                execution_events: inner.execution_events.clone(),
                events: inner.events.clone(),
                return_data: inner.return_data.clone(),
                state_before: inner.state_before.clone(),
                state_after: inner.state_after.clone(),
                last_call_time_ns: inner.last_call_time_ns,
                last_access_ns: inner.last_access_ns,
                resource: ResourceUsage::new(self.created_at_ns),
            }),
        }
    }

    /// Raw pointer of the host-call buffer, for isolation verification.
    pub(crate) fn host_call_buffer_ptr(&self) -> *const HostFunctionCall {
        self.inner.read().host_calls.as_ptr()
    }
}

fn system_now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Folds a host call into the query counters by naming convention.
fn classify_query(function_name: &str, resource: &mut ResourceUsage) {
    let lowered = function_name.to_ascii_lowercase();
    if lowered.contains("utxo") {
        resource.utxo_queries += 1;
    } else if lowered.contains("resource") {
        resource.resource_queries += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::WRAPPED_VALUE_KEY;
    use std::collections::BTreeMap;

    struct FixedHeightAbi {
        height: u64,
    }

    impl HostAbi for FixedHeightAbi {
        fn block_height(&self) -> Result<u64> {
            Ok(self.height)
        }

        fn append_asset_output(
            &self,
            ctx: &ExecutionContext,
            recipient: Address,
            amount: u64,
            memo: &str,
            metadata: &BTreeMap<String, TraceValue>,
        ) -> Result<()> {
            let mut draft = ctx.transaction_draft()?;
            draft.transaction.outputs.push(draft::DraftOutput {
                recipient,
                amount,
                memo: memo.to_string(),
                metadata: metadata.clone(),
            });
            ctx.update_transaction_draft(draft)
        }
    }

    fn context_with_caller() -> ExecutionContext {
        ExecutionContext::new(
            "e1",
            &CallScope::default(),
            Some(Address::zero()),
            Vec::new(),
            None,
            Some(1_000),
        )
    }

    #[test]
    fn synchronous_single_call_round_trip() {
        let ctx = context_with_caller();
        let call = HostFunctionCall::new(1, "noop").with_timestamp_ns(5_000);
        ctx.record_host_function_call(call).unwrap();

        let trace = ctx.execution_trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].sequence, 1);
        assert_eq!(trace[0].function_name, "noop");
        assert!(trace[0].parameters.is_empty());
        assert!(trace[0].result.is_empty());
        assert_eq!(ctx.resource_usage().host_function_calls, 1);

        let events = ctx.execution_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EVENT_HOST_FUNCTION_CALL);
    }

    #[test]
    fn non_map_payloads_project_as_wrapped_values() {
        let ctx = context_with_caller();
        let call = HostFunctionCall::new(1, "echo").with_parameters("plain");
        ctx.record_host_function_call(call).unwrap();
        let trace = ctx.execution_trace();
        assert_eq!(
            trace[0].parameters.get(WRAPPED_VALUE_KEY),
            Some(&TraceValue::String("plain".into()))
        );
    }

    #[test]
    fn durations_are_deltas_between_calls() {
        let ctx = context_with_caller();
        ctx.record_host_function_call(HostFunctionCall::new(1, "a"))
            .unwrap();
        ctx.record_host_function_call(HostFunctionCall::new(2, "b"))
            .unwrap();
        let trace = ctx.execution_trace();
        assert_eq!(trace.len(), 2);
        // First delta is measured from context creation.
        assert!(trace[0].duration_ns <= trace[1].timestamp_ns);
    }

    #[test]
    fn state_changes_emit_auto_events() {
        let ctx = context_with_caller();
        ctx.record_state_change(
            StateChangeType::UtxoCreate,
            "utxo:1",
            None,
            Some(TraceValue::Integer(5)),
        )
        .unwrap();
        assert_eq!(ctx.resource_usage().state_changes, 1);
        let events = ctx.execution_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EVENT_STATE_CHANGE);
        assert_eq!(ctx.state_changes().len(), 1);
    }

    #[test]
    fn draft_is_pre_created_only_with_a_caller() {
        let with_caller = context_with_caller();
        let draft = with_caller.transaction_draft().unwrap();
        assert!(draft.draft_id.starts_with("draft_e1_"));

        let without_caller = ExecutionContext::new(
            "e2",
            &CallScope::default(),
            None,
            Vec::new(),
            None,
            None,
        );
        let err = without_caller.transaction_draft().unwrap_err();
        assert_eq!(err, ExecutionError::DraftNotInitialized);
        assert_eq!(without_caller.transaction_id(), "");
        assert_eq!(without_caller.draft_id(), "");
    }

    #[test]
    fn nil_draft_update_is_rejected() {
        let ctx = context_with_caller();
        let mut draft = ctx.transaction_draft().unwrap();
        draft.draft_id.clear();
        let err = ctx.update_transaction_draft(draft).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot update with nil transaction draft"
        );
    }

    #[test]
    fn contract_address_is_length_checked_and_set_once() {
        let ctx = context_with_caller();
        assert!(ctx.set_contract_address(&[1u8; 19]).is_err());
        assert!(ctx.contract_address().is_none());
        ctx.set_contract_address(&[1u8; 20]).unwrap();
        assert!(ctx.set_contract_address(&[2u8; 20]).is_err());
        assert_eq!(ctx.contract_address().unwrap().as_bytes(), &[1u8; 20]);
    }

    #[test]
    fn return_data_and_init_params_are_defensive_copies() {
        let ctx = context_with_caller();
        ctx.set_return_data(&[1, 2, 3]);
        let mut copy = ctx.return_data();
        copy[0] = 9;
        assert_eq!(ctx.return_data(), vec![1, 2, 3]);

        ctx.set_init_params(&[7, 8]);
        let mut params = ctx.init_params();
        params.push(9);
        assert_eq!(ctx.init_params(), vec![7, 8]);
    }

    #[test]
    fn state_snapshots_round_trip() {
        let ctx = context_with_caller();
        ctx.set_state_snapshots(b"before", b"after");
        assert_eq!(ctx.state_before(), b"before");
        assert_eq!(ctx.state_after(), b"after");
    }

    #[test]
    fn business_events_get_the_deterministic_timestamp() {
        let ctx = context_with_caller();
        ctx.add_event(ExecutionEvent {
            event_type: "transfer".into(),
            data: TraceValue::empty_map(),
            timestamp_ns: 0,
        });
        let events = ctx.events();
        assert_eq!(events[0].timestamp_ns, 1_000);
    }

    #[test]
    fn deterministic_views_are_pinned() {
        let ctx = context_with_caller();
        assert_eq!(ctx.block_timestamp_ns(), 1_000);
        assert_eq!(ctx.deterministic_timestamp_ns(), 1_000);
        assert_eq!(ctx.block_height(), 0);
        ctx.set_host_abi(Arc::new(FixedHeightAbi { height: 42 }));
        assert_eq!(ctx.block_height(), 42);
    }

    #[test]
    fn host_abi_can_append_outputs_through_the_context() {
        let ctx = context_with_caller();
        ctx.set_host_abi(Arc::new(FixedHeightAbi { height: 1 }));
        let abi = ctx.host_abi().unwrap();
        abi.append_asset_output(&ctx, Address::zero(), 25, "memo", &BTreeMap::new())
            .unwrap();
        let draft = ctx.transaction_draft().unwrap();
        assert_eq!(draft.transaction.outputs.len(), 1);
        assert_eq!(draft.transaction.outputs[0].amount, 25);
        assert_ne!(ctx.transaction_id(), "");
    }

    #[test]
    fn drained_records_match_direct_recording() {
        let direct = context_with_caller();
        let drained = context_with_caller();
        let call = HostFunctionCall::new(3, "noop").with_timestamp_ns(10);
        direct.record_host_function_call(call.clone()).unwrap();

        let mut expected = call;
        expected.duration_ns = direct.execution_trace()[0].duration_ns;
        drained
            .record_trace_records(&[TraceRecord::host_call("e1", expected)])
            .unwrap();
        assert_eq!(direct.execution_trace(), drained.execution_trace());
    }

    #[test]
    fn destroyed_contexts_reject_recording() {
        let ctx = context_with_caller();
        ctx.mark_destroyed();
        let err = ctx
            .record_host_function_call(HostFunctionCall::new(1, "noop"))
            .unwrap_err();
        assert!(err.is_context_missing());
        let err = ctx
            .record_trace_records(&[TraceRecord::host_call(
                "e1",
                HostFunctionCall::new(1, "noop"),
            )])
            .unwrap_err();
        assert!(err.is_context_missing());
    }

    #[test]
    fn finalize_estimates_trace_size() {
        let ctx = context_with_caller();
        ctx.record_host_function_call(HostFunctionCall::new(1, "noop"))
            .unwrap();
        ctx.record_host_function_call(HostFunctionCall::new(2, "getutxobalance"))
            .unwrap();
        ctx.finalize_resource_usage();
        let usage = ctx.resource_usage();
        assert!(usage.finalized);
        assert!(usage.end_time_ns >= usage.start_time_ns);
        assert_eq!(
            usage.trace_size_bytes,
            ("noop".len() as u64 + 64) + ("getutxobalance".len() as u64 + 64)
        );
        assert_eq!(usage.utxo_queries, 1);
    }

    #[test]
    fn deep_copy_detaches_buffers_and_drops_counters() {
        let ctx = context_with_caller();
        ctx.record_host_function_call(HostFunctionCall::new(1, "noop"))
            .unwrap();
        ctx.set_return_data(&[1, 2, 3]);

        let copy = ctx.deep_copy();
        assert_eq!(copy.execution_id(), ctx.execution_id());
        assert_eq!(copy.execution_trace(), ctx.execution_trace());
        assert_eq!(copy.return_data(), ctx.return_data());
        assert_eq!(copy.resource_usage().host_function_calls, 0);
        assert_eq!(copy.chain_id(), "");

        // Mutating the copy leaves the original untouched.
        copy.record_host_function_call(HostFunctionCall::new(2, "other"))
            .unwrap();
        assert_eq!(ctx.execution_trace().len(), 1);
        assert_eq!(copy.execution_trace().len(), 2);
    }

    #[test]
    fn random_source_is_stable_per_context() {
        let ctx = context_with_caller();
        let source = ctx.deterministic_random_source();
        let again = ctx.deterministic_random_source();
        assert!(Arc::ptr_eq(&source, &again));
        assert!(source.int63() >= 0);
    }
}
