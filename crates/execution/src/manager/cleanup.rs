//! Cleanup verification.
//!
//! Every context destruction leaves a record of how it happened. Auditors ask
//! the verifier whether a given execution was torn down cleanly.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// How one context was destroyed.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupRecord {
    /// The destroyed execution
    pub execution_id: String,
    /// Destruction instant, nanoseconds
    pub cleaned_at_ns: u64,
    /// What triggered it, e.g. `destroy_context` or `expiry_sweep`
    pub method: String,
    /// Whether teardown completed cleanly
    pub success: bool,
    /// Failure detail, if any
    pub error: Option<String>,
}

/// Registry of past destructions.
#[derive(Default)]
pub struct CleanupVerifier {
    records: RwLock<HashMap<String, CleanupRecord>>,
}

impl CleanupVerifier {
    /// Creates an empty verifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a destruction.
    pub fn record_cleanup(
        &self,
        execution_id: &str,
        now_ns: u64,
        method: &str,
        success: bool,
        error: Option<String>,
    ) {
        self.records.write().insert(
            execution_id.to_string(),
            CleanupRecord {
                execution_id: execution_id.to_string(),
                cleaned_at_ns: now_ns,
                method: method.to_string(),
                success,
                error,
            },
        );
    }

    /// Whether the execution was destroyed cleanly.
    pub fn verify_cleanup(&self, execution_id: &str) -> bool {
        self.records
            .read()
            .get(execution_id)
            .map(|r| r.success)
            .unwrap_or(false)
    }

    /// Copy of the cleanup record, if any.
    pub fn get(&self, execution_id: &str) -> Option<CleanupRecord> {
        self.records.read().get(execution_id).cloned()
    }

    /// Number of recorded destructions.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_requires_a_successful_record() {
        let verifier = CleanupVerifier::new();
        assert!(!verifier.verify_cleanup("c1"));
        verifier.record_cleanup("c1", 100, "destroy_context", true, None);
        assert!(verifier.verify_cleanup("c1"));
        let record = verifier.get("c1").unwrap();
        assert_eq!(record.method, "destroy_context");
        assert_eq!(record.cleaned_at_ns, 100);
    }

    #[test]
    fn failed_cleanups_do_not_verify() {
        let verifier = CleanupVerifier::new();
        verifier.record_cleanup("c2", 5, "expiry_sweep", false, Some("queue jammed".into()));
        assert!(!verifier.verify_cleanup("c2"));
        assert_eq!(verifier.get("c2").unwrap().error.as_deref(), Some("queue jammed"));
    }
}
