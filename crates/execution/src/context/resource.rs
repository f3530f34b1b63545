//! Per-execution resource accounting.

use serde::{Deserialize, Serialize};

/// Estimated fixed bookkeeping cost of one traced host call.
pub const TRACE_CALL_OVERHEAD_BYTES: u64 = 64;

/// Counters accumulated while a context executes.
///
/// The peak-memory figure samples process-wide RSS and is advisory: several
/// live contexts in one process will each observe the shared total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Host-function calls recorded
    pub host_function_calls: u64,
    /// State changes recorded
    pub state_changes: u64,
    /// Host calls classified as UTXO queries
    pub utxo_queries: u64,
    /// Host calls classified as resource queries
    pub resource_queries: u64,
    /// Highest process RSS observed during execution
    pub peak_memory_bytes: u64,
    /// Estimated byte size of the recorded trace
    pub trace_size_bytes: u64,
    /// Execution start, nanoseconds
    pub start_time_ns: u64,
    /// Execution end, nanoseconds; zero until finalized
    pub end_time_ns: u64,
    /// Whether the statistics were finalized
    pub finalized: bool,
}

impl ResourceUsage {
    /// Starts accounting at `start_time_ns`.
    pub fn new(start_time_ns: u64) -> Self {
        Self {
            start_time_ns,
            ..Self::default()
        }
    }

    /// Folds a memory sample into the peak.
    pub fn sample_memory(&mut self, rss_bytes: u64) {
        if rss_bytes > self.peak_memory_bytes {
            self.peak_memory_bytes = rss_bytes;
        }
    }

    /// Wall-clock execution time in milliseconds.
    ///
    /// Until finalization the end bound is the caller-supplied `now_ns`.
    pub fn execution_time_ms(&self, now_ns: u64) -> u64 {
        let end = if self.end_time_ns != 0 {
            self.end_time_ns
        } else {
            now_ns
        };
        end.saturating_sub(self.start_time_ns) / 1_000_000
    }
}
