//! Per-context determinism enforcement.
//!
//! The enforcer pins the timestamp a contract can observe and derives the RNG
//! seed and input hash from the invocation identity, so identical inputs
//! yield identical outputs and traces on every node.

use crate::error::{ExecutionError, Result};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};

/// Size of the derived hashes in bytes.
pub const INPUT_HASH_SIZE: usize = 32;

/// Pins timestamp, seed and input identity for one execution.
pub struct DeterministicEnforcer {
    execution_id: String,
    input_params: Vec<u8>,
    fixed_timestamp_ns: u64,
    fixed_seed: i64,
    input_hash: [u8; INPUT_HASH_SIZE],
    result_hash: RwLock<Option<Vec<u8>>>,
}

impl DeterministicEnforcer {
    /// Derives the enforcer for `(execution_id, input_params)`.
    ///
    /// When `fixed_timestamp_ns` is absent the construction instant of the
    /// deterministic clock is pinned instead.
    pub fn new(
        execution_id: impl Into<String>,
        input_params: Vec<u8>,
        fixed_timestamp_ns: Option<u64>,
        now_ns: u64,
    ) -> Self {
        let execution_id = execution_id.into();
        let fixed_timestamp_ns = fixed_timestamp_ns.unwrap_or(now_ns);

        let mut seed_hasher = Sha256::new();
        seed_hasher.update(execution_id.as_bytes());
        seed_hasher.update(&input_params);
        let seed_digest = seed_hasher.finalize();
        let mut seed_bytes = [0u8; 8];
        seed_bytes.copy_from_slice(&seed_digest[..8]);
        let fixed_seed = i64::from_be_bytes(seed_bytes);

        let mut input_hasher = Sha256::new();
        input_hasher.update(execution_id.as_bytes());
        input_hasher.update(&input_params);
        input_hasher.update(fixed_timestamp_ns.to_be_bytes());
        let input_hash: [u8; INPUT_HASH_SIZE] = input_hasher.finalize().into();

        Self {
            execution_id,
            input_params,
            fixed_timestamp_ns,
            fixed_seed,
            input_hash,
            result_hash: RwLock::new(None),
        }
    }

    /// The execution this enforcer belongs to.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// The pinned timestamp, constant for the context's whole life.
    pub fn fixed_timestamp_ns(&self) -> u64 {
        self.fixed_timestamp_ns
    }

    /// The derived RNG seed.
    pub fn fixed_seed(&self) -> i64 {
        self.fixed_seed
    }

    /// The derived input hash.
    pub fn input_hash(&self) -> &[u8; INPUT_HASH_SIZE] {
        &self.input_hash
    }

    /// Records the result hash after execution. Set-once.
    pub fn set_result_hash(&self, hash: Vec<u8>) -> Result<()> {
        if hash.is_empty() {
            return Err(ExecutionError::invalid_argument(
                "result hash must not be empty",
            ));
        }
        let mut stored = self.result_hash.write();
        if stored.is_some() {
            return Err(ExecutionError::invalid_argument(
                "result hash already recorded",
            ));
        }
        *stored = Some(hash);
        Ok(())
    }

    /// Copy of the recorded result hash, if any.
    pub fn result_hash(&self) -> Option<Vec<u8>> {
        self.result_hash.read().clone()
    }

    /// Checks a candidate result against the recorded hash.
    ///
    /// The first run (nothing recorded yet) always passes.
    pub fn verify_execution_consistency(&self, candidate: &[u8]) -> Result<()> {
        let stored = self.result_hash.read();
        let expected = match stored.as_deref() {
            Some(expected) => expected,
            None => return Ok(()),
        };
        match first_mismatch(expected, candidate) {
            Some(position) => Err(ExecutionError::InconsistentResult { position }),
            None => Ok(()),
        }
    }
}

impl Clone for DeterministicEnforcer {
    fn clone(&self) -> Self {
        Self {
            execution_id: self.execution_id.clone(),
            input_params: self.input_params.clone(),
            fixed_timestamp_ns: self.fixed_timestamp_ns,
            fixed_seed: self.fixed_seed,
            input_hash: self.input_hash,
            result_hash: RwLock::new(self.result_hash.read().clone()),
        }
    }
}

impl std::fmt::Debug for DeterministicEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeterministicEnforcer")
            .field("execution_id", &self.execution_id)
            .field("fixed_timestamp_ns", &self.fixed_timestamp_ns)
            .field("fixed_seed", &self.fixed_seed)
            .field("input_hash", &hex::encode(self.input_hash))
            .finish()
    }
}

/// Index of the first differing byte, or the shorter length on prefix match.
pub(crate) fn first_mismatch(expected: &[u8], actual: &[u8]) -> Option<usize> {
    for (position, (a, b)) in expected.iter().zip(actual.iter()).enumerate() {
        if a != b {
            return Some(position);
        }
    }
    if expected.len() != actual.len() {
        return Some(expected.len().min(actual.len()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn derivations_are_reproducible() {
        let a = DeterministicEnforcer::new("e5", b"params".to_vec(), Some(1_000), 9_999);
        let b = DeterministicEnforcer::new("e5", b"params".to_vec(), Some(1_000), 12);
        assert_eq!(a.fixed_seed(), b.fixed_seed());
        assert_eq!(a.input_hash(), b.input_hash());
        assert_eq!(a.fixed_timestamp_ns(), 1_000);
    }

    #[test]
    fn seed_is_leading_hash_bytes_big_endian() {
        let enforcer = DeterministicEnforcer::new("abc", b"xyz".to_vec(), Some(0), 0);
        let mut hasher = Sha256::new();
        hasher.update(b"abc");
        hasher.update(b"xyz");
        let digest = hasher.finalize();
        let mut expected = [0u8; 8];
        expected.copy_from_slice(&digest[..8]);
        assert_eq!(enforcer.fixed_seed(), i64::from_be_bytes(expected));
    }

    #[test]
    fn input_hash_covers_timestamp() {
        let a = DeterministicEnforcer::new("e", b"p".to_vec(), Some(1), 0);
        let b = DeterministicEnforcer::new("e", b"p".to_vec(), Some(2), 0);
        assert_ne!(a.input_hash(), b.input_hash());
    }

    #[test]
    fn missing_timestamp_pins_construction_instant() {
        let enforcer = DeterministicEnforcer::new("e", Vec::new(), None, 777);
        assert_eq!(enforcer.fixed_timestamp_ns(), 777);
    }

    #[test]
    fn first_run_is_always_consistent() {
        let enforcer = DeterministicEnforcer::new("e", Vec::new(), Some(0), 0);
        assert!(enforcer.verify_execution_consistency(b"anything").is_ok());
    }

    #[test]
    fn mismatch_reports_first_differing_byte() {
        let enforcer = DeterministicEnforcer::new("e", Vec::new(), Some(0), 0);
        enforcer.set_result_hash(vec![1, 2, 3, 4]).unwrap();
        assert!(enforcer.verify_execution_consistency(&[1, 2, 3, 4]).is_ok());
        let err = enforcer
            .verify_execution_consistency(&[1, 2, 9, 4])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "execution result inconsistent: first mismatch at byte 2"
        );
        // A strict prefix mismatches at the shorter length.
        let err = enforcer.verify_execution_consistency(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, ExecutionError::InconsistentResult { position: 3 });
    }

    #[test]
    fn result_hash_is_set_once() {
        let enforcer = DeterministicEnforcer::new("e", Vec::new(), Some(0), 0);
        enforcer.set_result_hash(vec![9]).unwrap();
        assert!(enforcer.set_result_hash(vec![9]).is_err());
        assert!(DeterministicEnforcer::new("e", Vec::new(), Some(0), 0)
            .set_result_hash(Vec::new())
            .is_err());
    }
}
