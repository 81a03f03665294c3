//! Client and deployment configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use metafwd_crypto::eip712::build_domain_with;
use metafwd_tx::DEFAULT_GAS;
use metafwd_types::{
    Address, Domain, ForwarderError, Result, DEFAULT_DOMAIN_NAME, DEFAULT_DOMAIN_VERSION,
};

/// Name of the forwarder entry in a deployment document.
pub const FORWARDER_CONTRACT: &str = "MetaForwarder";

/// A forwarder deployment: the fields of its signing domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ForwarderConfig {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub address: Option<Address>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DOMAIN_NAME.to_string(),
            version: DEFAULT_DOMAIN_VERSION.to_string(),
            chain_id: 31337,
            address: None,
        }
    }
}

impl ForwarderConfig {
    pub fn to_domain(&self) -> Result<Domain> {
        let address = self.address.ok_or_else(|| {
            ForwarderError::Validation("forwarder address is not configured".into())
        })?;
        build_domain_with(&self.name, &self.version, address, self.chain_id)
    }
}

/// Settings of the meta-transaction client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub forwarder: ForwarderConfig,
    /// Base URL of the relay service, when relaying over HTTP.
    pub relay_url: Option<String>,
    pub request_timeout_ms: u64,
    /// Resubmissions of the same signed request after `RelayUnavailable`.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Polls of the relay for a transaction hash before giving up.
    pub confirm_attempts: u32,
    pub confirm_interval_ms: u64,
    pub default_gas: u64,
    /// Refuse to relay to targets that do not trust the forwarder.
    pub check_trusted_forwarder: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            forwarder: ForwarderConfig::default(),
            relay_url: None,
            request_timeout_ms: 30_000,
            max_retries: 2,
            retry_backoff_ms: 500,
            confirm_attempts: 30,
            confirm_interval_ms: 1_000,
            default_gas: DEFAULT_GAS,
            check_trusted_forwarder: true,
        }
    }
}

/// Deployment document: `{"contracts": {"MetaForwarder": "0x..."}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployedAddresses {
    #[serde(default)]
    pub contracts: HashMap<String, Address>,
}

impl DeployedAddresses {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ForwarderError::Validation(format!("invalid deployment document: {}", e)))
    }

    pub fn get(&self, contract: &str) -> Result<Address> {
        self.contracts.get(contract).copied().ok_or_else(|| {
            ForwarderError::Validation(format!("{} is not deployed", contract))
        })
    }

    pub fn meta_forwarder(&self) -> Result<Address> {
        self.get(FORWARDER_CONTRACT)
    }
}
