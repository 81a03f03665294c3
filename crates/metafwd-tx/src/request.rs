//! Forward request construction.
//!
//! The builder is pure: the nonce is supplied by the caller, who must have
//! read it from the verifier immediately before building.

use metafwd_types::{Address, Bytes, ForwardRequest, ForwarderError, Result, U256};

/// Gas allowance used when the caller does not specify one.
pub const DEFAULT_GAS: u64 = 1_000_000;

const CALLDATA_ZERO_BYTE_GAS: u64 = 4;
const CALLDATA_NONZERO_BYTE_GAS: u64 = 16;

/// Caller intent for a forward request.
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub from: Address,
    pub to: Address,
    pub value: Option<U256>,
    pub gas: Option<U256>,
    pub nonce: U256,
    pub data: Bytes,
}

impl RequestParams {
    pub fn new(from: Address, to: Address, nonce: U256, data: Bytes) -> Self {
        Self {
            from,
            to,
            value: None,
            gas: None,
            nonce,
            data,
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

/// Gas charged for carrying `data` as calldata.
pub fn calldata_gas(data: &[u8]) -> u64 {
    data.iter()
        .map(|b| {
            if *b == 0 {
                CALLDATA_ZERO_BYTE_GAS
            } else {
                CALLDATA_NONZERO_BYTE_GAS
            }
        })
        .sum()
}

/// Assemble a forward request. `value` defaults to 0 and `gas` to
/// [`DEFAULT_GAS`]. A gas budget that cannot even carry the payload is a
/// validation error; it is never rounded up.
pub fn build_request(params: RequestParams) -> Result<ForwardRequest> {
    if params.from == Address::ZERO {
        return Err(ForwarderError::Validation("from must not be the zero address".into()));
    }

    let value = params.value.unwrap_or(U256::ZERO);
    let gas = params.gas.unwrap_or(U256::from(DEFAULT_GAS));

    let payload_gas = U256::from(calldata_gas(&params.data));
    if gas < payload_gas {
        return Err(ForwarderError::Validation(format!(
            "gas budget {} cannot cover {} bytes of call data ({} gas)",
            gas,
            params.data.len(),
            payload_gas
        )));
    }

    Ok(ForwardRequest {
        from: params.from,
        to: params.to,
        value,
        gas,
        nonce: params.nonce,
        data: params.data,
    })
}
