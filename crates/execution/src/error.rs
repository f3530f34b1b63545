//! Error types for the ISPC execution layer
//!
//! The display strings of several variants are wire-stable: coordinators and
//! cross-language tooling match on them, so they must not be reworded.

use thiserror::Error;

/// Execution-layer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// No live context is registered under the id
    #[error("execution context not found: {execution_id}")]
    ContextNotFound {
        /// The id that missed
        execution_id: String,
    },

    /// The context exists but its deadline has passed
    #[error("execution context expired: {execution_id}")]
    ContextExpired {
        /// The expired id
        execution_id: String,
    },

    /// A context with this id is already live
    #[error("execution context already exists: {execution_id}")]
    ContextAlreadyExists {
        /// The duplicated id
        execution_id: String,
    },

    /// The context was created without a caller, so no draft was pre-created
    #[error("transaction draft not initialized")]
    DraftNotInitialized,

    /// The replacement draft carries no identity
    #[error("cannot update with nil transaction draft")]
    NilTransactionDraft,

    /// The hostABI port was read before injection
    #[error("hostABI not set")]
    HostAbiNotSet,

    /// Contract addresses are exactly 20 bytes
    #[error("contract address must be 20 bytes, got {actual}")]
    InvalidContractAddress {
        /// Length of the rejected value
        actual: usize,
    },

    /// Two runs with the same input hash produced different result hashes
    #[error("execution result inconsistent: first mismatch at byte {position}")]
    InconsistentResult {
        /// Index of the first differing byte; length of the shorter hash when
        /// only the lengths differ
        position: usize,
    },

    /// The manager is shutting down and rejects new work
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// A caller-supplied value failed validation
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the value
        message: String,
    },

    /// A trace validation rule failed
    #[error("trace integrity violation: {message}")]
    IntegrityViolation {
        /// Rule detail
        message: String,
    },

    /// A trace write failed for a reason the worker may retry
    #[error("trace write failed: {message}")]
    TraceWriteFailed {
        /// Failure detail
        message: String,
    },
}

impl ExecutionError {
    /// Shorthand for [`ExecutionError::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ExecutionError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Shorthand for [`ExecutionError::TraceWriteFailed`].
    pub fn trace_write(message: impl Into<String>) -> Self {
        ExecutionError::TraceWriteFailed {
            message: message.into(),
        }
    }

    /// Whether this error means the target context is gone.
    ///
    /// The trace worker treats this as normal teardown and never retries it.
    pub fn is_context_missing(&self) -> bool {
        matches!(
            self,
            ExecutionError::ContextNotFound { .. } | ExecutionError::ContextExpired { .. }
        )
    }
}

/// Result alias for execution-layer operations
pub type Result<T> = std::result::Result<T, ExecutionError>;
