//! HTTP client for an off-chain forwarder relay service.
//!
//! Endpoints:
//! - GET /api/v1/forwarder/nonce?address=<from>
//! - POST /api/v1/forwarder/verify
//! - POST /api/v1/forwarder/execute
//! - POST /api/v1/forwarder/execute_batch
//! - GET /api/v1/forwarder/trusted?target=<to>
//! - GET /api/v1/txhash?txhash=<relay_tx_hash>

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use metafwd_types::{
    Address, Bytes, Domain, ExecutionResult, ForwardRequest, ForwarderError, Hex, Result,
    Signature, U256,
};

use crate::Forwarder;

/// Relay API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayResponse<T> {
    pub code: Option<String>,
    pub message: Option<String>,
    pub user_message: Option<String>,
    pub data: Option<T>,
}

/// Typed rejection reported by the relay service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    /// Stored nonce for `NONCE_MISMATCH`.
    pub expected_nonce: Option<U256>,
    /// Recovered signer for `SIGNATURE_MISMATCH`.
    pub recovered: Option<Address>,
    /// Target return data for `EXECUTION_REVERTED`.
    pub return_data: Option<Bytes>,
    /// Relayer balance for `INSUFFICIENT_RELAY_FUNDS`.
    pub available: Option<U256>,
    pub required: Option<U256>,
    pub relayer: Option<Address>,
}

#[derive(Debug, Serialize)]
struct SignedRequest<'a> {
    request: &'a ForwardRequest,
    signature: &'a Signature,
}

#[derive(Debug, Serialize)]
struct SignedBatch<'a> {
    requests: &'a [ForwardRequest],
    signatures: &'a [Signature],
}

/// One entry of a batch response: either a result or a rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub result: Option<ExecutionResult>,
    pub error: Option<RelayErrorBody>,
}

/// Map a relay rejection for `request` onto the error taxonomy.
pub fn map_error_body(request: &ForwardRequest, body: &RelayErrorBody) -> ForwarderError {
    let message = body.message.clone().unwrap_or_default();
    match body.code.as_deref() {
        Some("NONCE_MISMATCH") => ForwarderError::NonceMismatch {
            from: request.from,
            expected: body.expected_nonce.unwrap_or(request.nonce),
            got: request.nonce,
        },
        Some("SIGNATURE_MISMATCH") => ForwarderError::SignatureMismatch {
            expected: request.from,
            recovered: body.recovered.unwrap_or(Address::ZERO),
        },
        Some("EXECUTION_REVERTED") => ForwarderError::ExecutionReverted {
            nonce: request.nonce,
            return_data: body.return_data.clone().unwrap_or_default(),
        },
        Some("INSUFFICIENT_RELAY_FUNDS") => ForwarderError::InsufficientRelayFunds {
            relayer: body.relayer.unwrap_or(Address::ZERO),
            required: body.required.unwrap_or(U256::ZERO),
            available: body.available.unwrap_or(U256::ZERO),
        },
        Some("INVALID_SIGNATURE") => ForwarderError::InvalidSignature(message),
        Some("VALIDATION") => ForwarderError::Validation(message),
        Some(other) => ForwarderError::Other(format!("relay error {}: {}", other, message)),
        None => ForwarderError::Other(format!("relay error: {}", message)),
    }
}

/// Why a request never produced a readable response.
#[derive(Debug)]
enum SendError {
    /// The service never took the request; resending is safe.
    NotDelivered(String),
    /// The request may have reached the service.
    Ambiguous(String),
}

impl SendError {
    /// For reads, either case can simply be retried.
    fn into_query_error(self) -> ForwarderError {
        match self {
            SendError::NotDelivered(reason) | SendError::Ambiguous(reason) => {
                ForwarderError::RelayUnavailable(reason)
            }
        }
    }

    /// For submissions, a possibly delivered request has an unknown outcome.
    fn into_submit_error(self, request: &ForwardRequest) -> ForwarderError {
        match self {
            SendError::NotDelivered(reason) => ForwarderError::RelayUnavailable(reason),
            SendError::Ambiguous(reason) => ForwarderError::OutcomeUnknown {
                from: request.from,
                nonce: request.nonce,
                reason,
            },
        }
    }
}

/// Relay client for submitting signed forward requests.
pub struct HttpRelayClient {
    base_url: String,
    domain: Domain,
    client: reqwest::Client,
    timeout: Duration,
    poll_attempts: u32,
    poll_interval_ms: u64,
}

impl HttpRelayClient {
    pub fn new(base_url: &str, domain: Domain, timeout_ms: Option<u64>) -> Self {
        let timeout_ms = timeout_ms.unwrap_or(30_000);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            domain,
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(timeout_ms))
                .build()
                .unwrap_or_default(),
            timeout: Duration::from_millis(timeout_ms),
            poll_attempts: 30,
            poll_interval_ms: 1_000,
        }
    }

    /// Polling used by `confirm` while waiting for the on-chain hash.
    pub fn with_polling(mut self, attempts: u32, interval_ms: u64) -> Self {
        self.poll_attempts = attempts;
        self.poll_interval_ms = interval_ms;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a prepared request.
    ///
    /// A refused connection, 429 and 503 mean the service did not take the
    /// request. A timeout or any other failure after the connection was made,
    /// and any other 5xx, may come after the service acted on it.
    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::Response, SendError> {
        let resp = builder.timeout(self.timeout).send().await.map_err(|e| {
            let reason = format!("relay request failed: {}", e);
            if e.is_connect() {
                SendError::NotDelivered(reason)
            } else {
                SendError::Ambiguous(reason)
            }
        })?;

        let status = resp.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, "Relay service unavailable");
            let reason = format!("relay returned status {}: {}", status, body);
            return Err(
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
                {
                    SendError::NotDelivered(reason)
                } else {
                    SendError::Ambiguous(reason)
                },
            );
        }
        Ok(resp)
    }

    async fn query(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.send(builder).await.map_err(SendError::into_query_error)
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<RelayResponse<T>> {
        resp.json()
            .await
            .map_err(|e| ForwarderError::Other(format!("failed to parse relay response: {}", e)))
    }

    /// Decode a single-request response, mapping rejections.
    async fn read_outcome<T: DeserializeOwned>(
        &self,
        request: &ForwardRequest,
        resp: reqwest::Response,
    ) -> Result<T> {
        if resp.status().is_success() {
            let body: RelayResponse<T> = Self::read(resp).await?;
            return body
                .data
                .ok_or_else(|| ForwarderError::Other("relay response carried no data".into()));
        }

        let status = resp.status();
        let body: RelayErrorBody = resp.json().await.unwrap_or_else(|_| RelayErrorBody {
            message: Some(format!("status {}", status)),
            ..Default::default()
        });
        Err(map_error_body(request, &body))
    }

    /// Poll for the on-chain transaction hash of a relay submission.
    ///
    /// GET /api/v1/txhash?txhash=<relay_tx_hash>
    pub async fn get_tx_hash(&self, relay_tx_hash: &str) -> Result<Option<Hex>> {
        let url = format!("{}/api/v1/txhash?txhash={}", self.base_url, relay_tx_hash);
        let resp = self.query(self.client.get(&url)).await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body: RelayResponse<Option<Hex>> = Self::read(resp).await?;
        Ok(body.data.flatten())
    }

    /// Poll for tx hash with retries, waiting between attempts.
    ///
    /// A timeout here says nothing about whether the request landed; the
    /// caller must not reuse its nonce for a different request.
    pub async fn wait_for_tx_hash(
        &self,
        relay_tx_hash: &str,
        max_attempts: u32,
        poll_interval_ms: u64,
    ) -> Result<Hex> {
        for attempt in 0..max_attempts {
            if let Some(tx_hash) = self.get_tx_hash(relay_tx_hash).await? {
                return Ok(tx_hash);
            }
            if attempt + 1 < max_attempts {
                tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
            }
        }
        Err(ForwarderError::RelayUnavailable(format!(
            "tx hash not available after {} attempts for relay tx {}",
            max_attempts, relay_tx_hash
        )))
    }
}

#[async_trait]
impl Forwarder for HttpRelayClient {
    fn domain(&self) -> &Domain {
        &self.domain
    }

    async fn get_nonce(&self, from: Address) -> Result<U256> {
        let url = format!("{}/api/v1/forwarder/nonce?address={}", self.base_url, from);
        let resp = self.query(self.client.get(&url)).await?;
        if !resp.status().is_success() {
            return Err(ForwarderError::Other(format!(
                "nonce query returned status {}",
                resp.status()
            )));
        }
        let body: RelayResponse<U256> = Self::read(resp).await?;
        body.data
            .ok_or_else(|| ForwarderError::Other("nonce response carried no data".into()))
    }

    async fn is_trusted_forwarder(&self, target: Address) -> Result<bool> {
        let url = format!("{}/api/v1/forwarder/trusted?target={}", self.base_url, target);
        let resp = self.query(self.client.get(&url)).await?;
        if !resp.status().is_success() {
            return Err(ForwarderError::Other(format!(
                "trusted-forwarder query returned status {}",
                resp.status()
            )));
        }
        let body: RelayResponse<bool> = Self::read(resp).await?;
        Ok(body.data.unwrap_or(false))
    }

    async fn verify(&self, request: &ForwardRequest, signature: &Signature) -> Result<bool> {
        let resp = self
            .query(
                self.client
                    .post(self.url("/api/v1/forwarder/verify"))
                    .json(&SignedRequest { request, signature }),
            )
            .await?;
        match self.read_outcome::<bool>(request, resp).await {
            Ok(valid) => Ok(valid),
            Err(e) if e.is_authorization_failure() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn execute(
        &self,
        request: &ForwardRequest,
        signature: &Signature,
    ) -> Result<ExecutionResult> {
        debug!(
            from = %request.from,
            nonce = %request.nonce,
            relay = %self.base_url,
            "Submitting forward request"
        );
        let resp = self
            .send(
                self.client
                    .post(self.url("/api/v1/forwarder/execute"))
                    .json(&SignedRequest { request, signature }),
            )
            .await
            .map_err(|e| e.into_submit_error(request))?;
        self.read_outcome(request, resp).await
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
        let Some(first) = requests.first() else {
            return Ok(Vec::new());
        };

        let resp = self
            .send(
                self.client
                    .post(self.url("/api/v1/forwarder/execute_batch"))
                    .json(&SignedBatch { requests, signatures }),
            )
            .await
            .map_err(|e| e.into_submit_error(first))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ForwarderError::Other(format!(
                "relay rejected batch with status {}: {}",
                status, body
            )));
        }

        let body: RelayResponse<Vec<BatchItem>> = Self::read(resp).await?;
        let items = body.data.unwrap_or_default();
        if items.len() != requests.len() {
            return Err(ForwarderError::Other(format!(
                "relay returned {} batch results for {} requests",
                items.len(),
                requests.len()
            )));
        }

        Ok(items
            .into_iter()
            .zip(requests)
            .map(|(item, request)| batch_item_result(request, item))
            .collect())
    }

    async fn confirm(&self, result: &ExecutionResult) -> Result<Option<Hex>> {
        let Some(relay_tx_hash) = result.relay_tx_hash.as_deref() else {
            return Ok(None);
        };
        let tx_hash = self
            .wait_for_tx_hash(relay_tx_hash, self.poll_attempts, self.poll_interval_ms)
            .await?;
        Ok(Some(tx_hash))
    }
}

fn batch_item_result(request: &ForwardRequest, item: BatchItem) -> Result<ExecutionResult> {
    match (item.result, item.error) {
        (Some(result), None) => Ok(result),
        (_, Some(error)) => Err(map_error_body(request, &error)),
        (None, None) => Err(ForwarderError::Other("empty batch item".into())),
    }
}
