//! Nonce and execution-history storage for the verifying forwarder.
//!
//! Defines the `NonceStore` trait that every verifier backend must implement.
//! Provides a `MemoryStore` for testing and in-process relaying.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use metafwd_types::{Address, Result, B256, U256};

pub mod memory;

pub use memory::MemoryStore;

/// One verified forward request, equivalent to the forwarder's
/// `MetaTransactionExecuted` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub from: Address,
    pub to: Address,
    pub nonce: U256,
    pub digest: B256,
    pub relayer: Address,
    pub success: bool,
    pub executed_at: u64,
}

/// The nonce store of a verifying party.
///
/// Nonces are owned and mutated exclusively by the store. `consume_nonce` is
/// the only write and must be an atomic compare-and-increment: of two racing
/// calls with the same `(from, expected)`, exactly one succeeds.
#[async_trait]
pub trait NonceStore: Send + Sync {
    // --- Nonces ---
    /// Latest committed nonce for `from` (0 if never used).
    async fn get_nonce(&self, from: Address) -> Result<U256>;

    /// If the stored nonce equals `expected`, increment it and return the
    /// consumed value. Otherwise fail with `NonceMismatch` and leave it as is.
    async fn consume_nonce(&self, from: Address, expected: U256) -> Result<U256>;

    // --- Execution history (optional) ---
    async fn record_execution(&self, _record: &ExecutionRecord) -> Result<()> {
        Ok(())
    }
    async fn list_executions(&self, _from: Option<Address>) -> Result<Vec<ExecutionRecord>> {
        Ok(Vec::new())
    }
}
