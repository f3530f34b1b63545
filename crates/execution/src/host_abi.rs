//! The hostABI port.
//!
//! Host functions reach chain state and mutate the transaction draft through
//! this engine-agnostic interface. The coordinator injects one implementation
//! per context after creation; the execution core never constructs one.

use crate::address::Address;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::value::TraceValue;
use std::collections::BTreeMap;

/// Chain-state access and draft mutation for host functions.
///
/// Implementations are shared across threads and treated as immutable once
/// injected; a context only ever holds them behind an `Arc`.
pub trait HostAbi: Send + Sync {
    /// Height of the chain tip visible to this execution.
    fn block_height(&self) -> Result<u64>;

    /// Appends an asset output to the context's transaction draft.
    fn append_asset_output(
        &self,
        ctx: &ExecutionContext,
        recipient: Address,
        amount: u64,
        memo: &str,
        metadata: &BTreeMap<String, TraceValue>,
    ) -> Result<()>;
}
