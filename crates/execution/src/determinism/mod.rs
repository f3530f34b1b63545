//! Determinism services: pinned clocks and seeds, reproducible randomness,
//! and cross-run result verification.

pub mod enforcer;
pub mod random;
pub mod verifier;

pub use enforcer::DeterministicEnforcer;
pub use random::DeterministicRandomSource;
pub use verifier::{ExecutionResultVerifier, ResultRecord};
