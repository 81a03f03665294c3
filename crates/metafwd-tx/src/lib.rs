//! Forward request builder, verifier backends and relay clients.
//!
//! - Build forward requests from caller intent
//! - Verify and dispatch in process (`LocalForwarder`)
//! - Submit to an off-chain relay service (`HttpRelayClient`)
//! - Sign through an external wallet (`RemoteSigner`)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use metafwd_crypto::eip712;
use metafwd_store::ExecutionRecord;
use metafwd_types::{
    Address, Domain, ExecutionResult, ForwardRequest, Hex, Result, Signature, B256, U256,
};

pub mod context;
pub mod local;
pub mod relay_client;
pub mod remote_signer;
pub mod request;

pub use local::{CallOutcome, CallTarget, ForwardedCall, LocalForwarder, LocalForwarderConfig};
pub use relay_client::HttpRelayClient;
pub use remote_signer::RemoteSigner;
pub use request::{build_request, RequestParams, DEFAULT_GAS};

/// How a batch reacts to a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Every item is verified and dispatched on its own.
    #[default]
    Isolated,
    /// After the first rejected or reverted item the remaining items are
    /// reported as `BatchAborted` without being verified.
    StopOnFailure,
}

/// The verifying party a forward request is relayed to.
///
/// Implemented by the in-process verifier and by the HTTP relay client; the
/// flow above only ever talks to this trait.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Signing domain the verifier checks signatures against.
    fn domain(&self) -> &Domain;

    /// Latest committed nonce for `from`.
    async fn get_nonce(&self, from: Address) -> Result<U256>;

    /// Side-effect-free check: nonce is current and the signature recovers
    /// `request.from`.
    async fn verify(&self, request: &ForwardRequest, signature: &Signature) -> Result<bool>;

    /// Verify, consume the nonce and dispatch. The relaying party pays.
    async fn execute(
        &self,
        request: &ForwardRequest,
        signature: &Signature,
    ) -> Result<ExecutionResult>;

    /// Execute in array order with one result per item.
    async fn execute_batch(
        &self,
        requests: &[ForwardRequest],
        signatures: &[Signature],
    ) -> Result<Vec<Result<ExecutionResult>>>;

    /// Whether the contract at `target` accepts this forwarder's sender
    /// suffix (`isTrustedForwarder`).
    async fn is_trusted_forwarder(&self, target: Address) -> Result<bool>;

    /// Execution already recorded for the request with this digest. `None`
    /// when the backend has no record or cannot look one up.
    async fn find_execution(&self, _digest: B256) -> Result<Option<ExecutionRecord>> {
        Ok(None)
    }

    /// Wait for the on-chain transaction behind an execution, when the
    /// backend relays asynchronously. `None` when there is nothing to wait for.
    async fn confirm(&self, _result: &ExecutionResult) -> Result<Option<Hex>> {
        Ok(None)
    }

    fn domain_separator(&self) -> B256 {
        eip712::domain_separator(self.domain())
    }
}
