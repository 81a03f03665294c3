//! End-to-end meta-transaction flows: prepare, sign, relay.
//!
//! Coordinates the request builder, the injected signer and a `Forwarder`
//! backend so that a user's intent reaches the target contract with the
//! relayer paying for execution.

use std::sync::Arc;
use std::time::Duration;

use alloy_sol_types::SolCall;
use tracing::{debug, info, warn};

use metafwd_crypto::eip712::{self, TypeSchema};
use metafwd_crypto::signer::{sign, TypedDataSigner};
use metafwd_tx::{build_request, Forwarder, HttpRelayClient, RequestParams};
use metafwd_types::{
    Address, Bytes, Domain, ExecutionResult, ForwardRequest, ForwarderError, Hex, RequestState,
    Result, Signature, B256, U256,
};

pub mod calls;
pub mod config;

pub use calls::{decode_return, encode_call_data, function_selector, verify_execution};
pub use config::{ClientConfig, DeployedAddresses, ForwarderConfig};

/// What the user wants executed on their behalf.
#[derive(Debug, Clone)]
pub struct CallIntent {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: Option<U256>,
    pub gas: Option<U256>,
}

impl CallIntent {
    pub fn new(from: Address, to: Address, data: Bytes) -> Self {
        Self {
            from,
            to,
            data,
            value: None,
            gas: None,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_gas(mut self, gas: U256) -> Self {
        self.gas = Some(gas);
        self
    }
}

/// A signed forward request and where it is in its lifecycle.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub request: ForwardRequest,
    pub signature: Signature,
    pub digest: B256,
    pub state: RequestState,
}

impl PreparedRequest {
    fn advance(&mut self, next: RequestState) -> Result<()> {
        self.state = self.state.transition(next)?;
        Ok(())
    }

    fn executed(&mut self, success: bool) -> Result<()> {
        self.advance(RequestState::Verified)?;
        self.advance(RequestState::Executed)?;
        self.advance(if success {
            RequestState::Succeeded
        } else {
            RequestState::Reverted
        })
    }

    /// Move the request to its final state from the verifier's answer. An
    /// unknown outcome or a transport failure leaves it `Submitted`.
    fn settle(&mut self, outcome: &Result<ExecutionResult>) -> Result<()> {
        match outcome {
            Ok(result) => self.executed(result.success),
            Err(ForwarderError::ExecutionReverted { .. }) => self.executed(false),
            Err(e) => match e.reject_reason() {
                Some(reason) => self.advance(RequestState::Rejected(reason)),
                None => Ok(()),
            },
        }
    }
}

/// Meta-transaction client over any `Forwarder` backend.
pub struct MetaTxClient {
    forwarder: Arc<dyn Forwarder>,
    config: ClientConfig,
    types: TypeSchema,
}

impl MetaTxClient {
    pub fn new(forwarder: Arc<dyn Forwarder>, config: ClientConfig) -> Self {
        Self {
            forwarder,
            config,
            types: eip712::build_types(),
        }
    }

    /// Client relaying through the HTTP service at `config.relay_url`.
    pub fn connect_http(config: ClientConfig) -> Result<Self> {
        let relay_url = config
            .relay_url
            .clone()
            .ok_or_else(|| ForwarderError::Validation("relay url is not configured".into()))?;
        let domain = config.forwarder.to_domain()?;
        let relay = HttpRelayClient::new(&relay_url, domain, Some(config.request_timeout_ms))
            .with_polling(config.confirm_attempts, config.confirm_interval_ms);
        Ok(Self::new(Arc::new(relay), config))
    }

    pub fn domain(&self) -> &Domain {
        self.forwarder.domain()
    }

    pub fn domain_separator(&self) -> B256 {
        self.forwarder.domain_separator()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn get_nonce(&self, from: Address) -> Result<U256> {
        self.forwarder.get_nonce(from).await
    }

    /// Fail unless `target` accepts the forwarder's sender suffix. Relaying
    /// to such a target would run the call as the forwarder itself.
    pub async fn ensure_trusted(&self, target: Address) -> Result<()> {
        if self.forwarder.is_trusted_forwarder(target).await? {
            return Ok(());
        }
        Err(ForwarderError::Validation(format!(
            "{} does not trust forwarder {}",
            target,
            self.domain().verifying_contract
        )))
    }

    fn request_params(&self, intent: CallIntent, nonce: U256) -> RequestParams {
        let mut params = RequestParams::new(intent.from, intent.to, nonce, intent.data)
            .with_gas(intent.gas.unwrap_or(U256::from(self.config.default_gas)));
        if let Some(value) = intent.value {
            params = params.with_value(value);
        }
        params
    }

    async fn sign_params(
        &self,
        signer: &dyn TypedDataSigner,
        params: RequestParams,
    ) -> Result<PreparedRequest> {
        let request = build_request(params)?;
        let mut state = RequestState::Built;

        let signature = sign(signer, self.domain(), &self.types, &request).await?;
        state = state.transition(RequestState::Signed)?;
        let digest = eip712::typed_data_hash(self.domain(), &self.types, &request)?;

        Ok(PreparedRequest {
            request,
            signature,
            digest,
            state,
        })
    }

    async fn check_intent(&self, signer: &dyn TypedDataSigner, intent: &CallIntent) -> Result<()> {
        if signer.address() != intent.from {
            return Err(ForwarderError::Validation(format!(
                "signer {} cannot sign for {}",
                signer.address(),
                intent.from
            )));
        }
        if self.config.check_trusted_forwarder {
            self.ensure_trusted(intent.to).await?;
        }
        Ok(())
    }

    /// Read the current nonce, build the request and sign it.
    ///
    /// The nonce is fetched here every time; a request prepared earlier and
    /// never submitted must be prepared again once another request from the
    /// same sender has landed.
    pub async fn prepare(
        &self,
        signer: &dyn TypedDataSigner,
        intent: CallIntent,
    ) -> Result<PreparedRequest> {
        self.check_intent(signer, &intent).await?;
        let nonce = self.forwarder.get_nonce(intent.from).await?;
        debug!(from = %intent.from, to = %intent.to, nonce = %nonce, "Preparing forward request");
        self.sign_params(signer, self.request_params(intent, nonce)).await
    }

    /// Sign several requests from one sender with consecutive nonces, for
    /// submission as a single batch.
    pub async fn prepare_batch(
        &self,
        signer: &dyn TypedDataSigner,
        intents: Vec<CallIntent>,
    ) -> Result<Vec<PreparedRequest>> {
        let from = signer.address();
        for intent in &intents {
            self.check_intent(signer, intent).await?;
        }

        let first = self.forwarder.get_nonce(from).await?;
        let mut prepared = Vec::with_capacity(intents.len());
        for (i, intent) in intents.into_iter().enumerate() {
            let nonce = first
                .checked_add(U256::from(i))
                .ok_or_else(|| ForwarderError::Validation("nonce overflow".into()))?;
            prepared.push(self.sign_params(signer, self.request_params(intent, nonce)).await?);
        }
        Ok(prepared)
    }

    /// Submit a prepared request. `RelayUnavailable` is retried with the
    /// identical signed request up to `max_retries` times; every other
    /// error is returned as is.
    ///
    /// A reverted call comes back as `Ok` with `success == false`. A request
    /// that already reached a final state is refused.
    pub async fn submit(&self, prepared: &mut PreparedRequest) -> Result<ExecutionResult> {
        if prepared.state.is_terminal() {
            return Err(ForwarderError::Validation(format!(
                "request from {} with nonce {} already settled as {:?}",
                prepared.request.from, prepared.request.nonce, prepared.state
            )));
        }
        // Already `Submitted`: an earlier attempt may have been executed.
        let mut resent = prepared.state == RequestState::Submitted;
        if !resent {
            prepared.advance(RequestState::Submitted)?;
        }

        let mut attempt = 0u32;
        let outcome = loop {
            let outcome = self
                .forwarder
                .execute(&prepared.request, &prepared.signature)
                .await;
            match outcome {
                Err(ref e) if e.is_retriable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    resent = true;
                    warn!(
                        from = %prepared.request.from,
                        nonce = %prepared.request.nonce,
                        attempt,
                        error = %e,
                        "Relay unavailable, resubmitting"
                    );
                    let backoff = self.config.retry_backoff_ms * u64::from(attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                other => break other,
            }
        };

        let outcome = match outcome {
            Err(ForwarderError::NonceMismatch { expected, got, .. })
                if resent && expected > got =>
            {
                self.resolve_resent(prepared, expected).await
            }
            other => other,
        };

        prepared.settle(&outcome)?;
        match &outcome {
            Ok(result) => info!(
                from = %prepared.request.from,
                nonce = %prepared.request.nonce,
                success = result.success,
                "Forward request executed"
            ),
            Err(e) => warn!(
                from = %prepared.request.from,
                nonce = %prepared.request.nonce,
                error = %e,
                "Forward request failed"
            ),
        }
        outcome
    }

    /// A resubmission found the nonce already consumed. Either an earlier
    /// attempt of this very request landed or another request took the nonce.
    async fn resolve_resent(
        &self,
        prepared: &PreparedRequest,
        stored: U256,
    ) -> Result<ExecutionResult> {
        if let Some(record) = self.forwarder.find_execution(prepared.digest).await? {
            info!(
                from = %record.from,
                nonce = %record.nonce,
                "Earlier attempt of the request was executed"
            );
            return Ok(ExecutionResult {
                success: record.success,
                return_data: Bytes::new(),
                nonce: record.nonce,
                digest: record.digest,
                relay_tx_hash: None,
            });
        }
        Err(ForwarderError::OutcomeUnknown {
            from: prepared.request.from,
            nonce: prepared.request.nonce,
            reason: format!(
                "nonce moved to {} while an earlier attempt was unconfirmed",
                stored
            ),
        })
    }

    /// Submit prepared requests as one batch, in order.
    pub async fn submit_batch(
        &self,
        prepared: &mut [PreparedRequest],
    ) -> Result<Vec<Result<ExecutionResult>>> {
        for item in prepared.iter_mut() {
            if item.state != RequestState::Submitted {
                item.advance(RequestState::Submitted)?;
            }
        }
        let requests: Vec<ForwardRequest> = prepared.iter().map(|p| p.request.clone()).collect();
        let signatures: Vec<Signature> = prepared.iter().map(|p| p.signature).collect();

        let results = self.forwarder.execute_batch(&requests, &signatures).await?;
        for (item, outcome) in prepared.iter_mut().zip(&results) {
            item.settle(outcome)?;
        }
        info!(
            items = results.len(),
            succeeded = results.iter().filter(|r| matches!(r, Ok(e) if e.success)).count(),
            "Batch submitted"
        );
        Ok(results)
    }

    /// On-chain transaction hash behind an execution, for backends that relay
    /// asynchronously. A timeout says nothing about whether the request
    /// landed: do not reuse its nonce for a different request.
    pub async fn confirm(&self, result: &ExecutionResult) -> Result<Option<Hex>> {
        self.forwarder.confirm(result).await
    }

    /// Prepare, sign and execute one intent. A revert is an error.
    pub async fn sign_and_execute(
        &self,
        signer: &dyn TypedDataSigner,
        intent: CallIntent,
    ) -> Result<ExecutionResult> {
        let mut prepared = self.prepare(signer, intent).await?;
        self.submit(&mut prepared).await?.into_result()
    }

    /// Prepare, sign and execute several intents from one sender as a batch.
    pub async fn sign_and_execute_batch(
        &self,
        signer: &dyn TypedDataSigner,
        intents: Vec<CallIntent>,
    ) -> Result<Vec<Result<ExecutionResult>>> {
        let mut prepared = self.prepare_batch(signer, intents).await?;
        self.submit_batch(&mut prepared).await
    }

    /// Call a contract function as the signer, through the forwarder.
    pub async fn execute_as_user<C: SolCall>(
        &self,
        signer: &dyn TypedDataSigner,
        target: Address,
        call: &C,
    ) -> Result<ExecutionResult> {
        debug!(target = %target, function = C::SIGNATURE, "Executing as user");
        let intent = CallIntent::new(signer.address(), target, encode_call_data(call));
        self.sign_and_execute(signer, intent).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use alloy_sol_types::sol;
    use async_trait::async_trait;
    use metafwd_crypto::eip712::build_domain;
    use metafwd_crypto::signer::LocalSigner;
    use metafwd_store::{ExecutionRecord, MemoryStore};
    use metafwd_tx::{
        CallOutcome, CallTarget, ForwardedCall, LocalForwarder, LocalForwarderConfig,
    };
    use metafwd_types::RejectReason;

    const USER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const OTHER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const FORWARDER: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    sol! {
        function registerCitizen(string name) returns (bool);
    }

    /// Remembers who registered; answers `true`.
    #[derive(Default)]
    struct Registry {
        citizens: Mutex<Vec<(Address, Vec<u8>)>>,
    }

    #[async_trait]
    impl CallTarget for Registry {
        async fn call(&self, call: ForwardedCall) -> CallOutcome {
            self.citizens
                .lock()
                .unwrap()
                .push((call.msg_sender(), call.msg_data().to_vec()));
            let mut word = [0u8; 32];
            word[31] = 1;
            CallOutcome::success(Bytes::copy_from_slice(&word)).with_gas_used(50_000)
        }
    }

    struct Reverter;

    #[async_trait]
    impl CallTarget for Reverter {
        async fn call(&self, _call: ForwardedCall) -> CallOutcome {
            CallOutcome::revert(Bytes::new())
        }
    }

    struct Untrusting;

    #[async_trait]
    impl CallTarget for Untrusting {
        fn is_trusted_forwarder(&self, _forwarder: Address) -> bool {
            false
        }

        async fn call(&self, _call: ForwardedCall) -> CallOutcome {
            CallOutcome::success(Bytes::new())
        }
    }

    #[derive(Clone, Copy)]
    enum Fault {
        /// Fail before reaching the verifier.
        Drop,
        /// Execute, then lose the answer.
        LandThenDrop,
        /// Report a revert as an error, the way the HTTP relay does.
        RevertAsError,
    }

    /// Wraps the local verifier and misbehaves on the first `failures`
    /// executions.
    struct Flaky {
        inner: Arc<LocalForwarder>,
        fault: Fault,
        failures: u32,
        lookup: bool,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(inner: Arc<LocalForwarder>, fault: Fault, failures: u32) -> Self {
            Self {
                inner,
                fault,
                failures,
                lookup: true,
                calls: AtomicU32::new(0),
            }
        }

        fn without_lookup(mut self) -> Self {
            self.lookup = false;
            self
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Forwarder for Flaky {
        fn domain(&self) -> &Domain {
            self.inner.domain()
        }

        async fn get_nonce(&self, from: Address) -> Result<U256> {
            self.inner.get_nonce(from).await
        }

        async fn verify(&self, request: &ForwardRequest, signature: &Signature) -> Result<bool> {
            self.inner.verify(request, signature).await
        }

        async fn execute(
            &self,
            request: &ForwardRequest,
            signature: &Signature,
        ) -> Result<ExecutionResult> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.failures {
                return self.inner.execute(request, signature).await;
            }
            match self.fault {
                Fault::Drop => Err(ForwarderError::RelayUnavailable("connection reset".into())),
                Fault::LandThenDrop => {
                    self.inner.execute(request, signature).await?;
                    Err(ForwarderError::RelayUnavailable("timed out".into()))
                }
                Fault::RevertAsError => self.inner.execute(request, signature).await?.into_result(),
            }
        }

        async fn find_execution(&self, digest: B256) -> Result<Option<ExecutionRecord>> {
            if !self.lookup {
                return Ok(None);
            }
            self.inner.find_execution(digest).await
        }

        async fn execute_batch(
            &self,
            requests: &[ForwardRequest],
            signatures: &[Signature],
        ) -> Result<Vec<Result<ExecutionResult>>> {
            self.inner.execute_batch(requests, signatures).await
        }

        async fn is_trusted_forwarder(&self, target: Address) -> Result<bool> {
            self.inner.is_trusted_forwarder(target).await
        }
    }

    struct Fixture {
        forwarder: Arc<LocalForwarder>,
        registry: Arc<Registry>,
        target: Address,
        reverter: Address,
        untrusting: Address,
        user: LocalSigner,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let domain = build_domain(FORWARDER, 31337).unwrap();
        let forwarder = Arc::new(LocalForwarder::new(
            domain,
            store,
            Address::repeat_byte(0xee),
            LocalForwarderConfig::default(),
        ));
        forwarder.fund_relayer(U256::from(10u64).pow(U256::from(18u64))).unwrap();

        let registry = Arc::new(Registry::default());
        let target = Address::repeat_byte(0x22);
        let reverter = Address::repeat_byte(0x33);
        let untrusting = Address::repeat_byte(0x44);
        forwarder.register_target(target, registry.clone()).unwrap();
        forwarder.register_target(reverter, Arc::new(Reverter)).unwrap();
        forwarder.register_target(untrusting, Arc::new(Untrusting)).unwrap();

        Fixture {
            forwarder,
            registry,
            target,
            reverter,
            untrusting,
            user: LocalSigner::from_hex(USER_KEY).unwrap(),
        }
    }

    fn client(f: &Fixture) -> MetaTxClient {
        let config = ClientConfig {
            retry_backoff_ms: 1,
            ..Default::default()
        };
        MetaTxClient::new(f.forwarder.clone(), config)
    }

    fn intent(f: &Fixture, to: Address) -> CallIntent {
        CallIntent::new(f.user.address(), to, Bytes::from(vec![0x12, 0x34]))
    }

    #[tokio::test]
    async fn test_prepare_uses_current_nonce_and_default_gas() {
        let f = fixture();
        let client = client(&f);

        let prepared = client.prepare(&f.user, intent(&f, f.target)).await.unwrap();
        assert_eq!(prepared.state, RequestState::Signed);
        assert_eq!(prepared.request.nonce, U256::ZERO);
        assert_eq!(prepared.request.gas, U256::from(1_000_000u64));
        assert_eq!(prepared.request.value, U256::ZERO);
        assert!(f.forwarder.verify(&prepared.request, &prepared.signature).await.unwrap());
    }

    #[tokio::test]
    async fn test_sign_and_execute_forwards_sender() {
        let f = fixture();
        let client = client(&f);

        let result = client.sign_and_execute(&f.user, intent(&f, f.target)).await.unwrap();
        assert!(result.success);
        assert_eq!(client.get_nonce(f.user.address()).await.unwrap(), U256::from(1u64));

        let citizens = f.registry.citizens.lock().unwrap();
        assert_eq!(citizens[0], (f.user.address(), vec![0x12, 0x34]));
    }

    #[tokio::test]
    async fn test_submit_tracks_lifecycle() {
        let f = fixture();
        let client = client(&f);

        let mut first = client.prepare(&f.user, intent(&f, f.target)).await.unwrap();
        let mut stale = client.prepare(&f.user, intent(&f, f.target)).await.unwrap();

        client.submit(&mut first).await.unwrap();
        assert_eq!(first.state, RequestState::Succeeded);

        let err = client.submit(&mut stale).await.unwrap_err();
        assert!(matches!(err, ForwarderError::NonceMismatch { .. }));
        assert_eq!(stale.state, RequestState::Rejected(RejectReason::NonceMismatch));

        // Re-preparing picks up the new nonce.
        let mut fresh = client.prepare(&f.user, intent(&f, f.target)).await.unwrap();
        assert_eq!(fresh.request.nonce, U256::from(1u64));
        client.submit(&mut fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_revert_surfaces_as_error_and_consumes_nonce() {
        let f = fixture();
        let client = client(&f);

        let err = client
            .sign_and_execute(&f.user, intent(&f, f.reverter))
            .await
            .unwrap_err();
        assert!(matches!(err, ForwarderError::ExecutionReverted { .. }));
        assert_eq!(client.get_nonce(f.user.address()).await.unwrap(), U256::from(1u64));

        let records = f.forwarder.executions(Some(f.user.address())).await.unwrap();
        assert!(verify_execution(&records[0], f.user.address()).is_err());
    }

    #[tokio::test]
    async fn test_signer_must_match_from() {
        let f = fixture();
        let client = client(&f);
        let other = LocalSigner::from_hex(OTHER_KEY).unwrap();

        let err = client.prepare(&other, intent(&f, f.target)).await.unwrap_err();
        assert!(matches!(err, ForwarderError::Validation(_)));
    }

    #[tokio::test]
    async fn test_untrusting_target_refused() {
        let f = fixture();
        let client = client(&f);

        let err = client.prepare(&f.user, intent(&f, f.untrusting)).await.unwrap_err();
        assert!(matches!(err, ForwarderError::Validation(_)));
        assert_eq!(client.get_nonce(f.user.address()).await.unwrap(), U256::ZERO);
    }

    #[tokio::test]
    async fn test_relay_unavailable_retried_with_same_request() {
        let f = fixture();
        let flaky = Arc::new(Flaky::new(f.forwarder.clone(), Fault::Drop, 2));
        let config = ClientConfig {
            retry_backoff_ms: 1,
            ..Default::default()
        };
        let client = MetaTxClient::new(flaky.clone(), config);

        let result = client.sign_and_execute(&f.user, intent(&f, f.target)).await.unwrap();
        assert!(result.success);
        assert_eq!(result.nonce, U256::ZERO);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let f = fixture();
        let flaky = Arc::new(Flaky::new(f.forwarder.clone(), Fault::Drop, 10));
        let config = ClientConfig {
            max_retries: 1,
            retry_backoff_ms: 1,
            ..Default::default()
        };
        let client = MetaTxClient::new(flaky.clone(), config);

        let err = client.sign_and_execute(&f.user, intent(&f, f.target)).await.unwrap_err();
        assert!(err.is_retriable());
        assert_eq!(flaky.calls(), 2);
        assert_eq!(client.get_nonce(f.user.address()).await.unwrap(), U256::ZERO);
    }

    #[tokio::test]
    async fn test_batch_consecutive_nonces() {
        let f = fixture();
        let client = client(&f);

        let results = client
            .sign_and_execute_batch(&f.user, vec![intent(&f, f.target), intent(&f, f.target)])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, Ok(e) if e.success)));
        assert_eq!(client.get_nonce(f.user.address()).await.unwrap(), U256::from(2u64));
    }

    #[tokio::test]
    async fn test_batch_states_follow_results() {
        let f = fixture();
        let client = client(&f);

        let mut prepared = client
            .prepare_batch(&f.user, vec![intent(&f, f.reverter), intent(&f, f.target)])
            .await
            .unwrap();
        client.submit_batch(&mut prepared).await.unwrap();

        assert_eq!(prepared[0].state, RequestState::Reverted);
        assert_eq!(prepared[1].state, RequestState::Succeeded);
    }

    #[tokio::test]
    async fn test_execute_as_user() {
        let f = fixture();
        let client = client(&f);

        let call = registerCitizenCall { name: "alice".into() };
        let result = client.execute_as_user(&f.user, f.target, &call).await.unwrap();
        assert!(decode_return::<registerCitizenCall>(&result).unwrap()._0);

        let selector = f.registry.citizens.lock().unwrap()[0].1[..4].to_vec();
        assert_eq!(selector, registerCitizenCall::SELECTOR.to_vec());

        let records = f.forwarder.executions(Some(f.user.address())).await.unwrap();
        assert!(verify_execution(&records[0], f.user.address()).is_ok());
    }

    #[tokio::test]
    async fn test_domain_separator_matches_domain() {
        let f = fixture();
        let client = client(&f);
        assert_eq!(client.domain_separator(), eip712::domain_separator(client.domain()));
    }

    #[test]
    fn test_connect_http_requires_relay_url() {
        assert!(matches!(
            MetaTxClient::connect_http(ClientConfig::default()),
            Err(ForwarderError::Validation(_))
        ));
    }

    fn flaky_client(flaky: &Arc<Flaky>) -> MetaTxClient {
        let config = ClientConfig {
            retry_backoff_ms: 1,
            ..Default::default()
        };
        MetaTxClient::new(flaky.clone(), config)
    }

    #[tokio::test]
    async fn test_lost_answer_resolved_from_execution_log() {
        let f = fixture();
        let flaky = Arc::new(Flaky::new(f.forwarder.clone(), Fault::LandThenDrop, 1));
        let client = flaky_client(&flaky);

        let mut prepared = client.prepare(&f.user, intent(&f, f.target)).await.unwrap();
        let result = client.submit(&mut prepared).await.unwrap();

        assert!(result.success);
        assert_eq!(result.nonce, U256::ZERO);
        assert_eq!(prepared.state, RequestState::Succeeded);
        assert_eq!(flaky.calls(), 2);
        assert_eq!(f.registry.citizens.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lost_answer_without_lookup_is_unknown() {
        let f = fixture();
        let flaky =
            Arc::new(Flaky::new(f.forwarder.clone(), Fault::LandThenDrop, 1).without_lookup());
        let client = flaky_client(&flaky);

        let mut prepared = client.prepare(&f.user, intent(&f, f.target)).await.unwrap();
        let err = client.submit(&mut prepared).await.unwrap_err();

        assert!(matches!(err, ForwarderError::OutcomeUnknown { .. }));
        assert!(!err.is_authorization_failure());
        assert_eq!(prepared.state, RequestState::Submitted);
        assert_eq!(client.get_nonce(f.user.address()).await.unwrap(), U256::from(1u64));
    }

    #[tokio::test]
    async fn test_reverted_error_settles_request() {
        let f = fixture();
        let flaky = Arc::new(Flaky::new(f.forwarder.clone(), Fault::RevertAsError, 1));
        let client = flaky_client(&flaky);

        let mut prepared = client.prepare(&f.user, intent(&f, f.reverter)).await.unwrap();
        let err = client.submit(&mut prepared).await.unwrap_err();
        assert!(matches!(err, ForwarderError::ExecutionReverted { .. }));
        assert_eq!(prepared.state, RequestState::Reverted);

        let again = client.submit(&mut prepared).await.unwrap_err();
        assert!(matches!(again, ForwarderError::Validation(_)));
        assert_eq!(flaky.calls(), 1);
    }

    #[tokio::test]
    async fn test_unrecoverable_signature_rejected() {
        let f = fixture();
        let client = client(&f);

        let mut prepared = client.prepare(&f.user, intent(&f, f.target)).await.unwrap();
        prepared.signature = Signature::from_bytes(&[0u8; 65]).unwrap();
        let err = client.submit(&mut prepared).await.unwrap_err();

        assert!(err.is_authorization_failure());
        assert_eq!(prepared.state, RequestState::Rejected(RejectReason::SignatureMismatch));
        assert_eq!(client.get_nonce(f.user.address()).await.unwrap(), U256::ZERO);
    }

    #[tokio::test]
    async fn test_confirm_is_immediate_for_local_relay() {
        let f = fixture();
        let client = client(&f);

        let result = client.sign_and_execute(&f.user, intent(&f, f.target)).await.unwrap();
        assert_eq!(client.confirm(&result).await.unwrap(), None);
    }
}
