//! In-memory nonce store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::*;
use metafwd_types::{ForwarderError, Result};

/// In-memory nonce store (for testing and in-process relaying).
pub struct MemoryStore {
    nonces: Mutex<HashMap<Address, U256>>,
    executions: Mutex<Vec<ExecutionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            nonces: Mutex::new(HashMap::new()),
            executions: Mutex::new(Vec::new()),
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
        mutex
            .lock()
            .map_err(|_| ForwarderError::Other("memory store lock poisoned".into()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NonceStore for MemoryStore {
    async fn get_nonce(&self, from: Address) -> Result<U256> {
        let nonces = Self::lock(&self.nonces)?;
        Ok(nonces.get(&from).copied().unwrap_or(U256::ZERO))
    }

    async fn consume_nonce(&self, from: Address, expected: U256) -> Result<U256> {
        let mut nonces = Self::lock(&self.nonces)?;
        let current = nonces.entry(from).or_insert(U256::ZERO);
        if *current != expected {
            return Err(ForwarderError::NonceMismatch {
                from,
                expected: *current,
                got: expected,
            });
        }
        let next = current
            .checked_add(U256::from(1u64))
            .ok_or_else(|| ForwarderError::Other(format!("nonce space exhausted for {}", from)))?;
        *current = next;
        tracing::trace!(from = %from, consumed = %expected, "Nonce consumed");
        Ok(expected)
    }

    async fn record_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let mut executions = Self::lock(&self.executions)?;
        executions.push(record.clone());
        Ok(())
    }

    async fn list_executions(&self, from: Option<Address>) -> Result<Vec<ExecutionRecord>> {
        let executions = Self::lock(&self.executions)?;
        let filtered = executions
            .iter()
            .filter(|r| from.map_or(true, |f| r.from == f))
            .cloned()
            .collect();
        Ok(filtered)
    }
}
