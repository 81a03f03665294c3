//! In-process verifying forwarder.
//!
//! Mirrors the on-chain forwarder: checks the nonce and the signature,
//! reserves the relayer's funds, consumes the nonce and only then dispatches
//! the call to the registered target with the ERC-2771 sender suffix.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use metafwd_crypto::eip712::{self, TypeSchema};
use metafwd_crypto::signer::verify_signature;
use metafwd_store::{ExecutionRecord, NonceStore};
use metafwd_types::{
    Address, Bytes, Domain, ExecutionResult, ForwardRequest, ForwarderError, Result, Signature,
    B256, U256,
};

use crate::context;
use crate::request::calldata_gas;
use crate::{BatchPolicy, Forwarder};

/// Local forwarder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalForwarderConfig {
    /// Price per unit of gas charged to the relayer.
    pub gas_price: U256,
    pub batch_policy: BatchPolicy,
}

impl Default for LocalForwarderConfig {
    fn default() -> Self {
        Self {
            gas_price: U256::from(1_000_000_000u64),
            batch_policy: BatchPolicy::Isolated,
        }
    }
}

/// A call as seen by the target contract.
#[derive(Debug, Clone)]
pub struct ForwardedCall {
    /// The forwarder performing the call (`msg.sender`).
    pub forwarder: Address,
    /// Request data with the signer address appended.
    pub calldata: Bytes,
    pub value: U256,
    /// Gas left for the target after paying for the call data.
    pub gas: U256,
    /// Whether the target trusts `forwarder`.
    pub trusted: bool,
}

impl ForwardedCall {
    pub fn msg_sender(&self) -> Address {
        context::msg_sender(&self.calldata, self.forwarder, self.trusted)
    }

    pub fn msg_data(&self) -> &[u8] {
        context::msg_data(&self.calldata, self.trusted)
    }
}

/// What the target reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub success: bool,
    pub return_data: Bytes,
    pub gas_used: u64,
}

impl CallOutcome {
    pub fn success(return_data: Bytes) -> Self {
        Self {
            success: true,
            return_data,
            gas_used: 0,
        }
    }

    pub fn revert(return_data: Bytes) -> Self {
        Self {
            success: false,
            return_data,
            gas_used: 0,
        }
    }

    pub fn with_gas_used(mut self, gas_used: u64) -> Self {
        self.gas_used = gas_used;
        self
    }

    fn out_of_gas() -> Self {
        Self::revert(Bytes::new())
    }
}

/// A contract reachable through the forwarder. What the call does is
/// opaque to the forwarder.
#[async_trait]
pub trait CallTarget: Send + Sync {
    /// ERC-2771 `isTrustedForwarder`.
    fn is_trusted_forwarder(&self, _forwarder: Address) -> bool {
        true
    }

    async fn call(&self, call: ForwardedCall) -> CallOutcome;
}

/// Verifying forwarder backed by a `NonceStore`.
pub struct LocalForwarder {
    domain: Domain,
    types: TypeSchema,
    config: LocalForwarderConfig,
    store: Arc<dyn NonceStore>,
    targets: RwLock<HashMap<Address, Arc<dyn CallTarget>>>,
    relayer: Address,
    relayer_balance: Mutex<U256>,
}

impl LocalForwarder {
    pub fn new(
        domain: Domain,
        store: Arc<dyn NonceStore>,
        relayer: Address,
        config: LocalForwarderConfig,
    ) -> Self {
        Self {
            domain,
            types: eip712::build_types(),
            config,
            store,
            targets: RwLock::new(HashMap::new()),
            relayer,
            relayer_balance: Mutex::new(U256::ZERO),
        }
    }

    /// Address of the forwarder itself (the domain's verifying contract).
    pub fn address(&self) -> Address {
        self.domain.verifying_contract
    }

    pub fn relayer(&self) -> Address {
        self.relayer
    }

    pub fn register_target(&self, address: Address, target: Arc<dyn CallTarget>) -> Result<()> {
        let mut targets = self
            .targets
            .write()
            .map_err(|_| ForwarderError::Other("target registry lock poisoned".into()))?;
        targets.insert(address, target);
        Ok(())
    }

    /// Whether the target at `address` trusts this forwarder. Unknown
    /// addresses trust nobody.
    pub fn is_trusted_by(&self, address: Address) -> Result<bool> {
        Ok(self
            .target(address)?
            .map(|t| t.is_trusted_forwarder(self.address()))
            .unwrap_or(false))
    }

    pub fn fund_relayer(&self, amount: U256) -> Result<U256> {
        let mut balance = self.balance()?;
        *balance = balance.saturating_add(amount);
        Ok(*balance)
    }

    pub fn relayer_balance(&self) -> Result<U256> {
        Ok(*self.balance()?)
    }

    /// Nonce first, then signature. Nothing is written.
    pub async fn check(&self, request: &ForwardRequest, signature: &Signature) -> Result<()> {
        let stored = self.store.get_nonce(request.from).await?;
        if stored != request.nonce {
            return Err(ForwarderError::NonceMismatch {
                from: request.from,
                expected: stored,
                got: request.nonce,
            });
        }
        verify_signature(&self.domain, &self.types, request, signature)
    }

    /// Execution records logged so far, optionally for one sender.
    pub async fn executions(&self, from: Option<Address>) -> Result<Vec<ExecutionRecord>> {
        self.store.list_executions(from).await
    }

    fn balance(&self) -> Result<std::sync::MutexGuard<'_, U256>> {
        self.relayer_balance
            .lock()
            .map_err(|_| ForwarderError::Other("relayer balance lock poisoned".into()))
    }

    fn target(&self, address: Address) -> Result<Option<Arc<dyn CallTarget>>> {
        let targets = self
            .targets
            .read()
            .map_err(|_| ForwarderError::Other("target registry lock poisoned".into()))?;
        Ok(targets.get(&address).cloned())
    }

    fn reserve_funds(&self, cost: U256) -> Result<()> {
        let mut balance = self.balance()?;
        if *balance < cost {
            return Err(ForwarderError::InsufficientRelayFunds {
                relayer: self.relayer,
                required: cost,
                available: *balance,
            });
        }
        *balance -= cost;
        Ok(())
    }

    fn refund(&self, cost: U256) -> Result<()> {
        let mut balance = self.balance()?;
        *balance = balance.saturating_add(cost);
        Ok(())
    }

    async fn dispatch(&self, request: &ForwardRequest) -> Result<CallOutcome> {
        let payload_gas = U256::from(calldata_gas(&request.data));
        if request.gas < payload_gas {
            debug!(to = %request.to, gas = %request.gas, "Gas budget below call data cost");
            return Ok(CallOutcome::out_of_gas());
        }
        let gas_left = request.gas - payload_gas;

        let Some(target) = self.target(request.to)? else {
            // No code at the target: the call succeeds with no return data.
            return Ok(CallOutcome::success(Bytes::new()));
        };

        let trusted = target.is_trusted_forwarder(self.address());
        if !trusted {
            warn!(
                to = %request.to,
                forwarder = %self.address(),
                "Target does not trust this forwarder"
            );
        }

        let outcome = target
            .call(ForwardedCall {
                forwarder: self.address(),
                calldata: context::append_sender(&request.data, request.from),
                value: request.value,
                gas: gas_left,
                trusted,
            })
            .await;

        if U256::from(outcome.gas_used) > gas_left {
            debug!(
                to = %request.to,
                used = outcome.gas_used,
                budget = %gas_left,
                "Forwarded call ran out of gas"
            );
            return Ok(CallOutcome::out_of_gas().with_gas_used(outcome.gas_used));
        }
        Ok(outcome)
    }

    async fn execute_one(
        &self,
        request: &ForwardRequest,
        signature: &Signature,
    ) -> Result<ExecutionResult> {
        let digest = eip712::typed_data_hash(&self.domain, &self.types, request)?;

        if let Err(e) = self.check(request, signature).await {
            warn!(
                from = %request.from,
                nonce = %request.nonce,
                error = %e,
                "Forward request rejected"
            );
            return Err(e);
        }

        let cost = request
            .gas
            .saturating_mul(self.config.gas_price)
            .saturating_add(request.value);
        self.reserve_funds(cost)?;

        // Consumed before dispatch: a reentrant replay from inside the call
        // sees the incremented nonce.
        let nonce = match self.store.consume_nonce(request.from, request.nonce).await {
            Ok(n) => n,
            Err(e) => {
                self.refund(cost)?;
                warn!(from = %request.from, nonce = %request.nonce, error = %e, "Lost nonce race");
                return Err(e);
            }
        };
        info!(from = %request.from, to = %request.to, nonce = %nonce, "Forward request verified");

        let outcome = self.dispatch(request).await?;
        if outcome.success {
            info!(from = %request.from, nonce = %nonce, "Forwarded call succeeded");
        } else {
            warn!(from = %request.from, nonce = %nonce, "Forwarded call reverted");
        }

        let executed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.store
            .record_execution(&ExecutionRecord {
                from: request.from,
                to: request.to,
                nonce,
                digest,
                relayer: self.relayer,
                success: outcome.success,
                executed_at,
            })
            .await?;

        Ok(ExecutionResult {
            success: outcome.success,
            return_data: outcome.return_data,
            nonce,
            digest,
            relay_tx_hash: None,
        })
    }
}

#[async_trait]
impl Forwarder for LocalForwarder {
    fn domain(&self) -> &Domain {
        &self.domain
    }

    async fn get_nonce(&self, from: Address) -> Result<U256> {
        self.store.get_nonce(from).await
    }

    async fn verify(&self, request: &ForwardRequest, signature: &Signature) -> Result<bool> {
        match self.check(request, signature).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_authorization_failure() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn execute(
        &self,
        request: &ForwardRequest,
        signature: &Signature,
    ) -> Result<ExecutionResult> {
        self.execute_one(request, signature).await
    }

    async fn is_trusted_forwarder(&self, target: Address) -> Result<bool> {
        self.is_trusted_by(target)
    }

    async fn find_execution(&self, digest: B256) -> Result<Option<ExecutionRecord>> {
        let records = self.store.list_executions(None).await?;
        Ok(records.into_iter().find(|r| r.digest == digest))
    }

    async fn execute_batch(
        &self,
        requests: &[ForwardRequest],
        signatures: &[Signature],
    ) -> Result<Vec<Result<ExecutionResult>>> {
        if requests.len() != signatures.len() {
            return Err(ForwarderError::Validation(format!(
                "batch has {} requests but {} signatures",
                requests.len(),
                signatures.len()
            )));
        }

        let mut results = Vec::with_capacity(requests.len());
        let mut failed_index = None;

        for (i, (request, signature)) in requests.iter().zip(signatures).enumerate() {
            if let Some(failed_index) = failed_index {
                results.push(Err(ForwarderError::BatchAborted { failed_index }));
                continue;
            }

            let result = self.execute_one(request, signature).await;
            let failed = !matches!(result, Ok(ref r) if r.success);
            if failed && self.config.batch_policy == BatchPolicy::StopOnFailure {
                failed_index = Some(i);
            }
            results.push(result);
        }

        info!(
            items = requests.len(),
            succeeded = results.iter().filter(|r| matches!(r, Ok(e) if e.success)).count(),
            "Batch processed"
        );
        Ok(results)
    }
}
