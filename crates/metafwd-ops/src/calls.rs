//! Target call data helpers and execution checks.

use alloy_sol_types::SolCall;

use metafwd_crypto::eip712::keccak256;
use metafwd_store::ExecutionRecord;
use metafwd_types::{Address, Bytes, ExecutionResult, ForwarderError, Result};

/// First four bytes of keccak256 of a canonical signature such as
/// `"transfer(address,uint256)"`.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&hash[..4]);
    selector
}

/// ABI-encode a contract call, selector included.
pub fn encode_call_data<C: SolCall>(call: &C) -> Bytes {
    Bytes::from(call.abi_encode())
}

/// Decode the return data of a successful forwarded call.
pub fn decode_return<C: SolCall>(result: &ExecutionResult) -> Result<C::Return> {
    if !result.success {
        return Err(ForwarderError::ExecutionReverted {
            nonce: result.nonce,
            return_data: result.return_data.clone(),
        });
    }
    C::abi_decode_returns(&result.return_data, true).map_err(|e| {
        ForwarderError::Validation(format!("cannot decode {} return data: {}", C::SIGNATURE, e))
    })
}

/// Check that an execution record was emitted for `expected_sender` and that
/// the forwarded call went through.
pub fn verify_execution(record: &ExecutionRecord, expected_sender: Address) -> Result<()> {
    if record.from != expected_sender {
        return Err(ForwarderError::Validation(format!(
            "execution of nonce {} was signed by {}, expected {}",
            record.nonce, record.from, expected_sender
        )));
    }
    if !record.success {
        return Err(ForwarderError::Validation(format!(
            "execution of nonce {} for {} reverted",
            record.nonce, record.from
        )));
    }
    Ok(())
}
