//! In-flight transaction drafts.
//!
//! A draft is the mutable transaction a contract assembles through the
//! hostABI. Its canonical serialization feeds the deterministic transaction
//! id, so the byte layout here is fixed: field order as written, big-endian
//! integers, length-prefixed variable fields.

use crate::address::Address;
use crate::value::TraceValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A transaction input referencing a UTXO to spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftInput {
    /// Identifier of the UTXO being consumed
    pub utxo_id: String,
    /// Amount carried by the UTXO
    pub amount: u64,
}

/// A transaction output to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftOutput {
    /// Receiving address
    pub recipient: Address,
    /// Amount to transfer
    pub amount: u64,
    /// Free-form memo
    pub memo: String,
    /// Opaque metadata attached by the contract
    pub metadata: BTreeMap<String, TraceValue>,
}

/// The transaction structure under assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftTransaction {
    /// Inputs to consume
    pub inputs: Vec<DraftInput>,
    /// Outputs to create
    pub outputs: Vec<DraftOutput>,
}

impl DraftTransaction {
    /// Canonical byte serialization used for transaction-id hashing.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.inputs.len() as u32).to_be_bytes());
        for input in &self.inputs {
            out.extend_from_slice(&(input.utxo_id.len() as u32).to_be_bytes());
            out.extend_from_slice(input.utxo_id.as_bytes());
            out.extend_from_slice(&input.amount.to_be_bytes());
        }
        out.extend_from_slice(&(self.outputs.len() as u32).to_be_bytes());
        for output in &self.outputs {
            out.extend_from_slice(output.recipient.as_bytes());
            out.extend_from_slice(&output.amount.to_be_bytes());
            out.extend_from_slice(&(output.memo.len() as u32).to_be_bytes());
            out.extend_from_slice(output.memo.as_bytes());
            out.extend_from_slice(&(output.metadata.len() as u32).to_be_bytes());
            for (key, value) in &output.metadata {
                out.extend_from_slice(&(key.len() as u32).to_be_bytes());
                out.extend_from_slice(key.as_bytes());
                // TraceValue maps are ordered, so the JSON form is canonical.
                let encoded = serde_json::to_vec(value).unwrap_or_default();
                out.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
                out.extend_from_slice(&encoded);
            }
        }
        out
    }

    /// Hex SHA-256 of the canonical serialization.
    pub fn transaction_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A mutable, in-flight transaction owned by one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDraft {
    /// Draft identity: `draft_<execution_id>_<created_at_ns>`
    pub draft_id: String,
    /// Owning execution
    pub execution_id: String,
    /// Address that initiated the execution
    pub caller_address: Address,
    /// Creation instant, nanoseconds
    pub created_at_ns: u64,
    /// The transaction under assembly
    pub transaction: DraftTransaction,
}

impl TransactionDraft {
    /// Creates an empty draft for an execution.
    pub fn new(execution_id: impl Into<String>, caller_address: Address, created_at_ns: u64) -> Self {
        let execution_id = execution_id.into();
        Self {
            draft_id: format!("draft_{}_{}", execution_id, created_at_ns),
            execution_id,
            caller_address,
            created_at_ns,
            transaction: DraftTransaction::default(),
        }
    }
}
