//! Exported context-state snapshots.
//!
//! The JSON field set here is consumed by external debug tooling; names are
//! stable and must not be reworded.

use crate::context::ExecutionContext;
use serde::{Deserialize, Serialize};

/// Resource counters in the exported shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsageSnapshot {
    /// Wall-clock execution time so far, milliseconds
    pub execution_time_ms: u64,
    /// Highest observed process RSS
    pub peak_memory_bytes: u64,
    /// Host-function calls recorded
    pub host_function_calls: u64,
    /// Host calls classified as UTXO queries
    pub utxo_queries: u64,
    /// Host calls classified as resource queries
    pub resource_queries: u64,
}

/// Point-in-time JSON export of one execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextStateSnapshot {
    /// Execution identity
    pub execution_id: String,
    /// Distributed-trace correlation id
    pub trace_id: String,
    /// Request correlation id
    pub request_id: String,
    /// Acting user id
    pub user_id: String,
    /// Creation instant, RFC 3339
    pub created_at: String,
    /// Last read access, RFC 3339
    pub last_access_at: String,
    /// Execution duration so far, milliseconds
    pub duration: u64,
    /// Contract address, hex; empty until set
    pub contract_address: String,
    /// Caller address, hex
    pub caller_address: String,
    /// Deterministic transaction id of the current draft
    pub transaction_id: String,
    /// Chain height observed through the hostABI
    pub block_height: u64,
    /// Pinned block timestamp, nanoseconds
    pub block_timestamp: u64,
    /// Host-call buffer size
    pub host_function_calls: u64,
    /// State-change buffer size
    pub state_changes: u64,
    /// Execution-event buffer size
    pub execution_events: u64,
    /// Resource counters
    pub resource_usage: ResourceUsageSnapshot,
    /// Business return data, hex
    pub return_data: String,
    /// Optional task stack dump
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl ContextStateSnapshot {
    /// Captures a snapshot of `ctx` at `now_ns`.
    pub fn capture(ctx: &ExecutionContext, now_ns: u64, include_stack: bool) -> Self {
        let usage = ctx.resource_usage();
        let trace_len = ctx.execution_trace().len() as u64;
        let state_len = ctx.state_changes().len() as u64;
        let event_len = ctx.execution_events().len() as u64;
        Self {
            execution_id: ctx.execution_id().to_string(),
            trace_id: ctx.trace_id().to_string(),
            request_id: ctx.request_id().to_string(),
            user_id: ctx.user_id().to_string(),
            created_at: rfc3339(ctx.created_at_ns()),
            last_access_at: rfc3339(ctx.last_access_ns()),
            duration: now_ns.saturating_sub(ctx.created_at_ns()) / 1_000_000,
            contract_address: ctx
                .contract_address()
                .map(|a| a.to_hex())
                .unwrap_or_default(),
            caller_address: ctx.caller_address().to_hex(),
            transaction_id: ctx.transaction_id(),
            block_height: ctx.block_height(),
            block_timestamp: ctx.block_timestamp_ns(),
            host_function_calls: trace_len,
            state_changes: state_len,
            execution_events: event_len,
            resource_usage: ResourceUsageSnapshot {
                execution_time_ms: usage.execution_time_ms(now_ns),
                peak_memory_bytes: usage.peak_memory_bytes,
                host_function_calls: usage.host_function_calls,
                utxo_queries: usage.utxo_queries,
                resource_queries: usage.resource_queries,
            },
            return_data: hex::encode(ctx.return_data()),
            stack_trace: include_stack.then(capture_stack),
        }
    }
}

fn rfc3339(ns: u64) -> String {
    chrono::DateTime::from_timestamp((ns / 1_000_000_000) as i64, (ns % 1_000_000_000) as u32)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn capture_stack() -> String {
    std::backtrace::Backtrace::force_capture().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::context::CallScope;
    use crate::trace::record::HostFunctionCall;

    fn sample_context() -> ExecutionContext {
        let ctx = ExecutionContext::new(
            "snap-1",
            &CallScope {
                deadline_ns: None,
                trace_id: "trace-9".into(),
                request_id: "req-9".into(),
                user_id: "user-9".into(),
            },
            Some(Address::zero()),
            Vec::new(),
            None,
            Some(500),
        );
        ctx.record_host_function_call(HostFunctionCall::new(1, "noop"))
            .unwrap();
        ctx.set_return_data(&[0xde, 0xad]);
        ctx
    }

    #[test]
    fn snapshot_carries_the_stable_field_set() {
        let ctx = sample_context();
        let snapshot = ContextStateSnapshot::capture(&ctx, ctx.created_at_ns(), false);
        assert_eq!(snapshot.execution_id, "snap-1");
        assert_eq!(snapshot.trace_id, "trace-9");
        assert_eq!(snapshot.host_function_calls, 1);
        assert_eq!(snapshot.block_timestamp, 500);
        assert_eq!(snapshot.return_data, "dead");
        assert!(snapshot.stack_trace.is_none());

        let json = serde_json::to_value(&snapshot).unwrap();
        for field in [
            "execution_id",
            "trace_id",
            "request_id",
            "user_id",
            "created_at",
            "last_access_at",
            "duration",
            "contract_address",
            "caller_address",
            "transaction_id",
            "block_height",
            "block_timestamp",
            "host_function_calls",
            "state_changes",
            "execution_events",
            "resource_usage",
            "return_data",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        let usage = json.get("resource_usage").unwrap();
        for field in [
            "execution_time_ms",
            "peak_memory_bytes",
            "host_function_calls",
            "utxo_queries",
            "resource_queries",
        ] {
            assert!(usage.get(field).is_some(), "missing usage field {field}");
        }
    }

    #[test]
    fn stack_dump_is_opt_in() {
        let ctx = sample_context();
        let snapshot = ContextStateSnapshot::capture(&ctx, ctx.created_at_ns(), true);
        assert!(snapshot.stack_trace.is_some());
    }
}
