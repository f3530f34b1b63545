//! Context isolation enforcement.
//!
//! The enforcer tracks every context the manager has seen, watches for leaks
//! (contexts that outlive their welcome or are hammered by reads) and backs
//! the pairwise isolation verification used by audits.

use crate::context::ExecutionContext;
use crate::error::{ExecutionError, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// Access count past which a context is flagged as suspicious.
pub const MAX_ACCESS_COUNT: u64 = 10_000;

/// Memory growth past which a before/after pair is flagged, bytes.
pub const MEMORY_LEAK_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

/// Lifecycle bookkeeping for one tracked context.
#[derive(Debug, Clone, Default)]
pub struct ContextTracking {
    /// When the context was created, nanoseconds
    pub created_at_ns: u64,
    /// Last read access, nanoseconds
    pub last_access_ns: u64,
    /// Number of read accesses
    pub access_count: u64,
    /// Whether the context was destroyed
    pub is_destroyed: bool,
    /// Destruction instant, nanoseconds
    pub destroyed_at_ns: u64,
}

/// One leak finding.
#[derive(Debug, Clone, Serialize)]
pub struct LeakReport {
    /// The suspicious context
    pub execution_id: String,
    /// Age at detection, nanoseconds
    pub age_ns: u64,
    /// Accesses at detection
    pub access_count: u64,
    /// Why it was flagged
    pub reason: String,
}

/// Tracks live and recently destroyed contexts.
pub struct IsolationEnforcer {
    tracking: RwLock<HashMap<String, ContextTracking>>,
    max_lifetime_ns: u64,
}

impl IsolationEnforcer {
    /// Creates an enforcer flagging contexts older than `max_lifetime_ns`.
    pub fn new(max_lifetime_ns: u64) -> Self {
        Self {
            tracking: RwLock::new(HashMap::new()),
            max_lifetime_ns,
        }
    }

    /// Starts tracking a context. Insertion-idempotent.
    pub fn track_context(&self, execution_id: &str, now_ns: u64) {
        self.tracking
            .write()
            .entry(execution_id.to_string())
            .or_insert_with(|| ContextTracking {
                created_at_ns: now_ns,
                last_access_ns: now_ns,
                ..ContextTracking::default()
            });
    }

    /// Notes a read access.
    pub fn note_access(&self, execution_id: &str, now_ns: u64) {
        if let Some(tracking) = self.tracking.write().get_mut(execution_id) {
            tracking.access_count += 1;
            tracking.last_access_ns = now_ns;
        }
    }

    /// Marks a context destroyed, keeping the record for leak detection.
    pub fn mark_destroyed(&self, execution_id: &str, now_ns: u64) {
        if let Some(tracking) = self.tracking.write().get_mut(execution_id) {
            tracking.is_destroyed = true;
            tracking.destroyed_at_ns = now_ns;
        }
    }

    /// Copy of the tracking record, if any.
    pub fn get(&self, execution_id: &str) -> Option<ContextTracking> {
        self.tracking.read().get(execution_id).cloned()
    }

    /// Number of tracked records, destroyed ones included.
    pub fn tracked_count(&self) -> usize {
        self.tracking.read().len()
    }

    /// Flags undestroyed contexts past the lifetime bound and any record
    /// with an excessive access count.
    pub fn detect_leaks(&self, now_ns: u64) -> Vec<LeakReport> {
        let tracking = self.tracking.read();
        let mut reports = Vec::new();
        for (execution_id, record) in tracking.iter() {
            let age_ns = now_ns.saturating_sub(record.created_at_ns);
            if !record.is_destroyed && age_ns > self.max_lifetime_ns {
                reports.push(LeakReport {
                    execution_id: execution_id.clone(),
                    age_ns,
                    access_count: record.access_count,
                    reason: format!(
                        "context alive for {}ms, max lifetime {}ms",
                        age_ns / 1_000_000,
                        self.max_lifetime_ns / 1_000_000
                    ),
                });
            }
            if record.access_count > MAX_ACCESS_COUNT {
                reports.push(LeakReport {
                    execution_id: execution_id.clone(),
                    age_ns,
                    access_count: record.access_count,
                    reason: format!(
                        "access count {} exceeds {}",
                        record.access_count, MAX_ACCESS_COUNT
                    ),
                });
            }
        }
        reports
    }

    /// Drops destroyed records older than `max_age_ns`.
    pub fn cleanup_old_tracking(&self, max_age_ns: u64, now_ns: u64) -> usize {
        let mut tracking = self.tracking.write();
        let before = tracking.len();
        tracking.retain(|_, record| {
            !(record.is_destroyed && now_ns.saturating_sub(record.destroyed_at_ns) > max_age_ns)
        });
        before - tracking.len()
    }
}

/// Outcome of a before/after memory comparison.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryLeakReport {
    /// RSS before the execution window, bytes
    pub before_bytes: u64,
    /// RSS after the execution window, bytes
    pub after_bytes: u64,
    /// Growth across the window, bytes
    pub growth_bytes: u64,
    /// Whether the growth crosses the leak threshold
    pub suspected: bool,
}

/// Compares two RSS samples taken around an execution window.
pub fn check_memory_leak(before_bytes: u64, after_bytes: u64) -> MemoryLeakReport {
    let growth_bytes = after_bytes.saturating_sub(before_bytes);
    MemoryLeakReport {
        before_bytes,
        after_bytes,
        growth_bytes,
        suspected: growth_bytes > MEMORY_LEAK_THRESHOLD_BYTES,
    }
}

/// Verifies two contexts are isolated from each other.
///
/// Identities must differ and non-empty trace buffers must live in distinct
/// storage. Shared hostABI or manager ports are permitted by design.
pub fn verify_context_isolation(a: &ExecutionContext, b: &ExecutionContext) -> Result<()> {
    if std::ptr::eq(a, b) {
        return Err(ExecutionError::IntegrityViolation {
            message: "contexts are the same instance".to_string(),
        });
    }
    if a.execution_id() == b.execution_id() {
        return Err(ExecutionError::IntegrityViolation {
            message: format!(
                "contexts share execution id {}",
                a.execution_id()
            ),
        });
    }
    let a_ptr = a.host_call_buffer_ptr();
    let b_ptr = b.host_call_buffer_ptr();
    if !a_ptr.is_null() && a_ptr == b_ptr && !a.host_calls().is_empty() {
        return Err(ExecutionError::IntegrityViolation {
            message: "contexts share a host-call buffer".to_string(),
        });
    }
    Ok(())
}
