//! Trace integrity checking.
//!
//! Finalized traces feed the ZK proof generator; a malformed trace wastes a
//! proving cycle at best. The checker runs a configurable set of structural
//! rules and computes the canonical trace hash proofs commit to. Violations
//! are reported, never fatal: ingest treats them as warnings until the
//! engine's sequence contract is tightened.

use crate::context::ExecutionContext;
use crate::trace::record::{ExecutionEvent, HostFunctionCall, StateChange, StateChangeType};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// One execution's complete trace, detached from its context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionTrace {
    /// Owning execution
    pub execution_id: String,
    /// Execution start, nanoseconds
    pub start_time_ns: u64,
    /// Execution end, nanoseconds
    pub end_time_ns: u64,
    /// Recorded total duration, nanoseconds
    pub total_duration_ns: u64,
    /// Ordered host calls
    pub host_calls: Vec<HostFunctionCall>,
    /// Ordered state changes
    pub state_changes: Vec<StateChange>,
    /// Ordered execution events
    pub events: Vec<ExecutionEvent>,
}

impl ExecutionTrace {
    /// Captures the trace of a live context.
    ///
    /// An unfinalized context gets `now_ns` as its end bound.
    pub fn from_context(ctx: &ExecutionContext, now_ns: u64) -> Self {
        let usage = ctx.resource_usage();
        let end_time_ns = if usage.end_time_ns != 0 {
            usage.end_time_ns
        } else {
            now_ns
        };
        Self {
            execution_id: ctx.execution_id().to_string(),
            start_time_ns: usage.start_time_ns,
            end_time_ns,
            total_duration_ns: end_time_ns.saturating_sub(usage.start_time_ns),
            host_calls: ctx.host_calls(),
            state_changes: ctx.state_changes(),
            events: ctx.execution_events(),
        }
    }
}

/// Which checks `check_integrity` runs.
#[derive(Debug, Clone, Copy)]
pub struct IntegrityConfig {
    /// Timestamp bounds and monotonicity
    pub check_time_order: bool,
    /// Sequence-number ordering
    pub check_call_order: bool,
    /// UTXO create/spend consistency
    pub check_state_consistency: bool,
    /// Canonical trace hashing
    pub check_trace_hash: bool,
    /// Largest tolerated gap between adjacent host calls
    pub max_time_gap: Duration,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            check_time_order: true,
            check_call_order: true,
            check_state_consistency: true,
            check_trace_hash: true,
            max_time_gap: Duration::from_secs(3600),
        }
    }
}

/// Outcome of an integrity check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    /// Whether every enabled check passed
    pub is_valid: bool,
    /// Time-order check outcome (true when disabled)
    pub time_order_ok: bool,
    /// Call-order check outcome (true when disabled)
    pub call_order_ok: bool,
    /// State-consistency check outcome (true when disabled)
    pub state_consistency_ok: bool,
    /// Human-readable findings
    pub issues: Vec<String>,
    /// Host calls inspected
    pub host_call_count: usize,
    /// State changes inspected
    pub state_change_count: usize,
    /// Hex SHA-256 of the canonical trace serialization
    pub trace_hash: String,
}

type ValidationFn = dyn Fn(&ExecutionTrace) -> Result<(), String> + Send + Sync;

struct NamedRule {
    name: String,
    rule: Box<ValidationFn>,
}

/// Structural validator for finalized traces.
pub struct TraceIntegrityChecker {
    config: IntegrityConfig,
    rules: RwLock<Vec<NamedRule>>,
}

impl TraceIntegrityChecker {
    /// Creates a checker with the default rules registered.
    pub fn new(config: IntegrityConfig) -> Self {
        let checker = Self {
            config,
            rules: RwLock::new(Vec::new()),
        };
        let max_gap = config.max_time_gap;
        checker.register_rule("time_order", move |trace| {
            collect(time_order_issues(trace, max_gap))
        });
        checker.register_rule("call_order", |trace| collect(call_order_issues(trace)));
        checker.register_rule("state_consistency", |trace| {
            collect(state_consistency_issues(trace))
        });
        checker
    }

    /// Registers a named validation rule.
    pub fn register_rule<F>(&self, name: impl Into<String>, rule: F)
    where
        F: Fn(&ExecutionTrace) -> Result<(), String> + Send + Sync + 'static,
    {
        self.rules.write().push(NamedRule {
            name: name.into(),
            rule: Box::new(rule),
        });
    }

    /// Runs every registered rule and returns the failures.
    pub fn validate_trace(&self, trace: &ExecutionTrace) -> Vec<String> {
        let rules = self.rules.read();
        let mut failures = Vec::new();
        for named in rules.iter() {
            if let Err(message) = (named.rule)(trace) {
                failures.push(format!("{}: {}", named.name, message));
            }
        }
        failures
    }

    /// Runs the enabled checks and reports the outcome.
    pub fn check_integrity(&self, trace: &ExecutionTrace) -> IntegrityReport {
        let mut report = IntegrityReport {
            is_valid: true,
            time_order_ok: true,
            call_order_ok: true,
            state_consistency_ok: true,
            host_call_count: trace.host_calls.len(),
            state_change_count: trace.state_changes.len(),
            ..IntegrityReport::default()
        };

        if self.config.check_time_order {
            let issues = time_order_issues(trace, self.config.max_time_gap);
            report.time_order_ok = issues.is_empty();
            report.issues.extend(issues);
        }
        if self.config.check_call_order {
            let issues = call_order_issues(trace);
            report.call_order_ok = issues.is_empty();
            report.issues.extend(issues);
        }
        if self.config.check_state_consistency {
            let issues = state_consistency_issues(trace);
            report.state_consistency_ok = issues.is_empty();
            report.issues.extend(issues);
        }
        if self.config.check_trace_hash {
            report.trace_hash = compute_trace_hash(trace);
        }
        report.is_valid = report.issues.is_empty();
        report
    }
}

impl Default for TraceIntegrityChecker {
    fn default() -> Self {
        Self::new(IntegrityConfig::default())
    }
}

fn collect(issues: Vec<String>) -> Result<(), String> {
    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues.join("; "))
    }
}

fn time_order_issues(trace: &ExecutionTrace, max_gap: Duration) -> Vec<String> {
    let mut issues = Vec::new();
    if trace.execution_id.is_empty() {
        issues.push("execution id is empty".to_string());
    }
    if trace.start_time_ns == 0 || trace.end_time_ns == 0 {
        issues.push("start or end timestamp is zero".to_string());
    }
    if trace.end_time_ns < trace.start_time_ns {
        issues.push(format!(
            "end timestamp {} precedes start timestamp {}",
            trace.end_time_ns, trace.start_time_ns
        ));
    }
    let span = trace.end_time_ns.saturating_sub(trace.start_time_ns);
    if trace.total_duration_ns.abs_diff(span) > Duration::from_secs(1).as_nanos() as u64 {
        issues.push(format!(
            "recorded duration {}ns disagrees with span {}ns",
            trace.total_duration_ns, span
        ));
    }
    let max_gap_ns = max_gap.as_nanos() as u64;
    for (index, pair) in trace.host_calls.windows(2).enumerate() {
        let (prev, cur) = (&pair[0], &pair[1]);
        if cur.timestamp_ns < prev.timestamp_ns {
            issues.push(format!(
                "host call {} timestamp {} precedes call {} timestamp {}",
                index + 1,
                cur.timestamp_ns,
                index,
                prev.timestamp_ns
            ));
        } else if cur.timestamp_ns - prev.timestamp_ns > max_gap_ns {
            issues.push(format!(
                "gap between host calls {} and {} exceeds {}s",
                index,
                index + 1,
                max_gap.as_secs()
            ));
        }
    }
    for (index, call) in trace.host_calls.iter().enumerate() {
        if call.timestamp_ns < trace.start_time_ns || call.timestamp_ns > trace.end_time_ns {
            issues.push(format!(
                "host call {} timestamp {} falls outside [{}, {}]",
                index, call.timestamp_ns, trace.start_time_ns, trace.end_time_ns
            ));
        }
    }
    for (index, change) in trace.state_changes.iter().enumerate() {
        if change.timestamp_ns < trace.start_time_ns || change.timestamp_ns > trace.end_time_ns {
            issues.push(format!(
                "state change {} timestamp {} falls outside [{}, {}]",
                index, change.timestamp_ns, trace.start_time_ns, trace.end_time_ns
            ));
        }
    }
    issues
}

fn call_order_issues(trace: &ExecutionTrace) -> Vec<String> {
    let mut issues = Vec::new();
    for (index, pair) in trace.host_calls.windows(2).enumerate() {
        let (prev, cur) = (&pair[0], &pair[1]);
        if cur.sequence <= prev.sequence {
            issues.push(format!(
                "call order violation: sequence {} at index {} is not greater than {}",
                cur.sequence,
                index + 1,
                prev.sequence
            ));
        } else if cur.timestamp_ns < prev.timestamp_ns {
            // Sequence rose while time fell: one of them is lying.
            issues.push(format!(
                "call order violation: rising sequence {} with falling timestamp at index {}",
                cur.sequence,
                index + 1
            ));
        }
    }
    issues
}

fn state_consistency_issues(trace: &ExecutionTrace) -> Vec<String> {
    let mut issues = Vec::new();
    for (index, pair) in trace.state_changes.windows(2).enumerate() {
        let (prev, cur) = (&pair[0], &pair[1]);
        if prev.key != cur.key {
            continue;
        }
        if prev.change_type == StateChangeType::UtxoCreate
            && cur.change_type == StateChangeType::UtxoCreate
        {
            issues.push(format!(
                "state consistency violation: utxo {} created twice at index {}",
                cur.key,
                index + 1
            ));
        }
        if prev.change_type == StateChangeType::UtxoSpend
            && cur.change_type == StateChangeType::UtxoSpend
        {
            issues.push(format!(
                "state consistency violation: utxo {} spent twice at index {}",
                cur.key,
                index + 1
            ));
        }
    }
    issues
}

/// Hex SHA-256 over the canonical trace serialization.
///
/// Layout: execution id, start and end as big-endian u64 nanoseconds, then
/// per host call the length-prefixed name and big-endian timestamp, then per
/// state change the length-prefixed type and key and big-endian timestamp.
pub fn compute_trace_hash(trace: &ExecutionTrace) -> String {
    let mut hasher = Sha256::new();
    hasher.update(trace.execution_id.as_bytes());
    hasher.update(trace.start_time_ns.to_be_bytes());
    hasher.update(trace.end_time_ns.to_be_bytes());
    for call in &trace.host_calls {
        hasher.update((call.function_name.len() as u32).to_be_bytes());
        hasher.update(call.function_name.as_bytes());
        hasher.update(call.timestamp_ns.to_be_bytes());
    }
    for change in &trace.state_changes {
        let type_name = change.change_type.as_str();
        hasher.update((type_name.len() as u32).to_be_bytes());
        hasher.update(type_name.as_bytes());
        hasher.update((change.key.len() as u32).to_be_bytes());
        hasher.update(change.key.as_bytes());
        hasher.update(change.timestamp_ns.to_be_bytes());
    }
    hex::encode(hasher.finalize())
}
