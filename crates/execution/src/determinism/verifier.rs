//! Cross-run execution-result verification.
//!
//! Nodes record `(input hash, result hash)` pairs as executions finalize; a
//! second run of the same input must reproduce the same result hash
//! byte-for-byte or the chain's self-proving property is broken.

use crate::determinism::enforcer::first_mismatch;
use crate::error::{ExecutionError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// One verified input/result pairing.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    /// The input hash this record keys on
    pub input_hash: Vec<u8>,
    /// The result hash every run must reproduce
    pub result_hash: Vec<u8>,
    /// How many runs reproduced it
    pub occurrence_count: u64,
    /// First observation, nanoseconds
    pub first_seen_ns: u64,
    /// Latest observation, nanoseconds
    pub last_seen_ns: u64,
}

/// Registry of observed execution results, keyed by hex input hash.
#[derive(Default)]
pub struct ExecutionResultVerifier {
    records: RwLock<HashMap<String, ResultRecord>>,
}

impl ExecutionResultVerifier {
    /// Creates an empty verifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a finalized execution result.
    ///
    /// A repeated input must carry a byte-identical result hash; any
    /// difference fails with the position of the first mismatch.
    pub fn record(&self, input_hash: &[u8], result_hash: &[u8], now_ns: u64) -> Result<()> {
        if input_hash.is_empty() {
            return Err(ExecutionError::invalid_argument(
                "input hash must not be empty",
            ));
        }
        if result_hash.is_empty() {
            return Err(ExecutionError::invalid_argument(
                "result hash must not be empty",
            ));
        }
        let key = hex::encode(input_hash);
        let mut records = self.records.write();
        match records.get_mut(&key) {
            Some(existing) => {
                if let Some(position) = first_mismatch(&existing.result_hash, result_hash) {
                    return Err(ExecutionError::InconsistentResult { position });
                }
                existing.occurrence_count += 1;
                existing.last_seen_ns = now_ns;
                Ok(())
            }
            None => {
                records.insert(
                    key,
                    ResultRecord {
                        input_hash: input_hash.to_vec(),
                        result_hash: result_hash.to_vec(),
                        occurrence_count: 1,
                        first_seen_ns: now_ns,
                        last_seen_ns: now_ns,
                    },
                );
                Ok(())
            }
        }
    }

    /// Pure read: checks a candidate result without recording anything.
    ///
    /// Unknown inputs are consistent by definition (first run).
    pub fn verify(&self, input_hash: &[u8], result_hash: &[u8]) -> Result<()> {
        let key = hex::encode(input_hash);
        let records = self.records.read();
        match records.get(&key) {
            Some(existing) => match first_mismatch(&existing.result_hash, result_hash) {
                Some(position) => Err(ExecutionError::InconsistentResult { position }),
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Copy of the record for an input hash, if any.
    pub fn get(&self, input_hash: &[u8]) -> Option<ResultRecord> {
        self.records.read().get(&hex::encode(input_hash)).cloned()
    }

    /// Number of distinct inputs observed.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no inputs were observed yet.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
