//! Typed-data signing through an external wallet over JSON-RPC.
//!
//! POST {"method": "eth_signTypedData_v4", "params": [address, typedDataJson]}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::warn;

use metafwd_crypto::eip712::{typed_data_hash, typed_data_json, TypeSchema};
use metafwd_crypto::signer::{recover_digest, TypedDataSigner};
use metafwd_types::{Address, Domain, ForwardRequest, ForwarderError, Result, Signature};

/// EIP-1193 "user rejected request".
const USER_REJECTED: i64 = 4001;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub result: Option<String>,
    pub error: Option<RpcError>,
}

/// Turn a JSON-RPC reply into a signature. A refusal, an error or an empty
/// result is `SignerUnavailable`.
pub fn parse_rpc_response(resp: RpcResponse) -> Result<Signature> {
    if let Some(err) = resp.error {
        let reason = if err.code == USER_REJECTED {
            format!("request rejected by wallet: {}", err.message)
        } else {
            format!("wallet error {}: {}", err.code, err.message)
        };
        return Err(ForwarderError::SignerUnavailable(reason));
    }

    match resp.result.as_deref() {
        None | Some("") | Some("0x") => Err(ForwarderError::SignerUnavailable(
            "wallet returned an empty signature".into(),
        )),
        Some(hex) => Signature::from_hex(hex),
    }
}

/// Signer backed by a wallet or key vault exposing `eth_signTypedData_v4`.
pub struct RemoteSigner {
    rpc_url: String,
    address: Address,
    client: reqwest::Client,
    timeout: Duration,
}

impl RemoteSigner {
    pub fn new(rpc_url: &str, address: Address, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(120_000);
        Self {
            rpc_url: rpc_url.to_string(),
            address,
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

#[async_trait]
impl TypedDataSigner for RemoteSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_typed_data(
        &self,
        domain: &Domain,
        types: &TypeSchema,
        request: &ForwardRequest,
    ) -> Result<Signature> {
        let typed_data = typed_data_json(domain, types, request).to_string();
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_signTypedData_v4",
            "params": [self.address.to_string(), typed_data],
        });

        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ForwarderError::SignerUnavailable(format!("wallet unreachable: {}", e)))?;

        if !resp.status().is_success() {
            return Err(ForwarderError::SignerUnavailable(format!(
                "wallet returned status {}",
                resp.status()
            )));
        }

        let rpc: RpcResponse = resp.json().await.map_err(|e| {
            ForwarderError::SignerUnavailable(format!("malformed wallet reply: {}", e))
        })?;
        let signature = parse_rpc_response(rpc)?;

        // The wallet may have signed with a different account than asked.
        let digest = typed_data_hash(domain, types, request)?;
        let recovered = recover_digest(&digest, &signature)?;
        if recovered != self.address {
            warn!(
                expected = %self.address,
                recovered = %recovered,
                "Wallet signed with another account"
            );
            return Err(ForwarderError::SignatureMismatch {
                expected: self.address,
                recovered,
            });
        }
        Ok(signature)
    }
}
