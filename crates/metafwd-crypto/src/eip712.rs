//! EIP-712 domain and `ForwardRequest` type descriptors.
//!
//! digest = keccak256(0x19 || 0x01 || domainSeparator || structHash(request))
//!
//! The struct hash walks the schema fields in declaration order, so the
//! schema (not the Rust struct layout) defines the hash preimage.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha3::{Digest, Keccak256};

use metafwd_types::{
    bytes_to_hex, parse_address, Address, Domain, ForwardRequest, ForwarderError, Result, B256,
    DEFAULT_DOMAIN_NAME, DEFAULT_DOMAIN_VERSION, U256,
};

pub const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

pub const FORWARD_REQUEST_TYPE: &str = "ForwardRequest";

/// Solidity types used by the forward request schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Address,
    Uint256,
    Bytes,
}

impl FieldType {
    pub fn solidity_name(&self) -> &'static str {
        match self {
            FieldType::Address => "address",
            FieldType::Uint256 => "uint256",
            FieldType::Bytes => "bytes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

impl TypedField {
    fn new(name: &str, ty: FieldType) -> Self {
        Self { name: name.to_string(), ty }
    }
}

/// Typed-data schema of the primary type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    pub primary_type: String,
    pub fields: Vec<TypedField>,
}

impl TypeSchema {
    /// `ForwardRequest(address from,address to,...)`
    pub fn encode_type(&self) -> String {
        let members: Vec<String> = self
            .fields
            .iter()
            .map(|f| format!("{} {}", f.ty.solidity_name(), f.name))
            .collect();
        format!("{}({})", self.primary_type, members.join(","))
    }

    pub fn type_hash(&self) -> B256 {
        keccak256(self.encode_type().as_bytes())
    }

    /// `{"ForwardRequest": [{"name": "from", "type": "address"}, ...]}`
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(self.primary_type.clone(), json!(self.fields));
        serde_json::Value::Object(map)
    }
}

/// keccak256 over arbitrary bytes.
pub fn keccak256(bytes: &[u8]) -> B256 {
    B256::from_slice(&Keccak256::digest(bytes))
}

/// The fixed, versioned forward request schema. Field order is part of the
/// hash preimage and must match the verifying contract.
pub fn build_types() -> TypeSchema {
    TypeSchema {
        primary_type: FORWARD_REQUEST_TYPE.to_string(),
        fields: vec![
            TypedField::new("from", FieldType::Address),
            TypedField::new("to", FieldType::Address),
            TypedField::new("value", FieldType::Uint256),
            TypedField::new("gas", FieldType::Uint256),
            TypedField::new("nonce", FieldType::Uint256),
            TypedField::new("data", FieldType::Bytes),
        ],
    }
}

/// Build the default "MetaForwarder"/"1" domain for a deployed forwarder.
pub fn build_domain(verifying_contract: &str, chain_id: u64) -> Result<Domain> {
    let address = parse_address(verifying_contract)?;
    build_domain_with(DEFAULT_DOMAIN_NAME, DEFAULT_DOMAIN_VERSION, address, chain_id)
}

/// Build a domain with explicit name and version.
pub fn build_domain_with(
    name: &str,
    version: &str,
    verifying_contract: Address,
    chain_id: u64,
) -> Result<Domain> {
    if chain_id == 0 {
        return Err(ForwarderError::Validation("chain id must be positive".into()));
    }
    if verifying_contract == Address::ZERO {
        return Err(ForwarderError::Validation(
            "verifying contract must not be the zero address".into(),
        ));
    }
    if name.is_empty() {
        return Err(ForwarderError::Validation("domain name must not be empty".into()));
    }
    Ok(Domain {
        name: name.to_string(),
        version: version.to_string(),
        chain_id,
        verifying_contract,
    })
}

/// keccak256(typeHash || keccak(name) || keccak(version) || chainId || verifyingContract)
pub fn domain_separator(domain: &Domain) -> B256 {
    let mut buf = Vec::with_capacity(32 * 5);
    buf.extend_from_slice(keccak256(EIP712_DOMAIN_TYPE.as_bytes()).as_slice());
    buf.extend_from_slice(keccak256(domain.name.as_bytes()).as_slice());
    buf.extend_from_slice(keccak256(domain.version.as_bytes()).as_slice());
    buf.extend_from_slice(&U256::from(domain.chain_id).to_be_bytes::<32>());
    buf.extend_from_slice(&encode_address(&domain.verifying_contract));
    keccak256(&buf)
}

enum FieldValue<'a> {
    Address(&'a Address),
    Uint256(&'a U256),
    Bytes(&'a [u8]),
}

fn field_value<'a>(request: &'a ForwardRequest, name: &str) -> Result<FieldValue<'a>> {
    Ok(match name {
        "from" => FieldValue::Address(&request.from),
        "to" => FieldValue::Address(&request.to),
        "value" => FieldValue::Uint256(&request.value),
        "gas" => FieldValue::Uint256(&request.gas),
        "nonce" => FieldValue::Uint256(&request.nonce),
        "data" => FieldValue::Bytes(&request.data),
        other => {
            return Err(ForwarderError::Validation(format!(
                "schema field '{}' does not exist on ForwardRequest",
                other
            )))
        }
    })
}

fn encode_address(address: &Address) -> [u8; 32] {
    let mut padded = [0u8; 32];
    padded[12..32].copy_from_slice(address.as_slice());
    padded
}

/// hashStruct(request) = keccak256(typeHash || encodeData(request))
pub fn struct_hash(types: &TypeSchema, request: &ForwardRequest) -> Result<B256> {
    let mut buf = Vec::with_capacity(32 * (types.fields.len() + 1));
    buf.extend_from_slice(types.type_hash().as_slice());

    for field in &types.fields {
        let word: [u8; 32] = match (field.ty, field_value(request, &field.name)?) {
            (FieldType::Address, FieldValue::Address(a)) => encode_address(a),
            (FieldType::Uint256, FieldValue::Uint256(v)) => v.to_be_bytes::<32>(),
            (FieldType::Bytes, FieldValue::Bytes(b)) => keccak256(b).0,
            (ty, _) => {
                return Err(ForwarderError::Validation(format!(
                    "schema declares '{}' as {}, which does not match the request field",
                    field.name,
                    ty.solidity_name()
                )))
            }
        };
        buf.extend_from_slice(&word);
    }

    Ok(keccak256(&buf))
}

/// The digest that is signed and later recovered.
pub fn typed_data_hash(
    domain: &Domain,
    types: &TypeSchema,
    request: &ForwardRequest,
) -> Result<B256> {
    let mut buf = Vec::with_capacity(2 + 32 + 32);
    buf.extend_from_slice(b"\x19\x01");
    buf.extend_from_slice(domain_separator(domain).as_slice());
    buf.extend_from_slice(struct_hash(types, request)?.as_slice());
    Ok(keccak256(&buf))
}

/// `eth_signTypedData_v4` payload for external wallets.
pub fn typed_data_json(
    domain: &Domain,
    types: &TypeSchema,
    request: &ForwardRequest,
) -> serde_json::Value {
    let mut all_types = serde_json::Map::new();
    all_types.insert(
        "EIP712Domain".into(),
        json!([
            { "name": "name", "type": "string" },
            { "name": "version", "type": "string" },
            { "name": "chainId", "type": "uint256" },
            { "name": "verifyingContract", "type": "address" },
        ]),
    );
    all_types.insert(types.primary_type.clone(), json!(types.fields));

    json!({
        "types": all_types,
        "primaryType": types.primary_type,
        "domain": {
            "name": domain.name,
            "version": domain.version,
            "chainId": domain.chain_id,
            "verifyingContract": domain.verifying_contract.to_string(),
        },
        "message": {
            "from": request.from.to_string(),
            "to": request.to.to_string(),
            "value": request.value.to_string(),
            "gas": request.gas.to_string(),
            "nonce": request.nonce.to_string(),
            "data": bytes_to_hex(&request.data),
        },
    })
}
