//! ERC-2771 calldata context.
//!
//! The forwarder appends the 20-byte signer address to the call data. A
//! target that trusts the forwarder reads the original sender back from the
//! tail; for any other caller the sender is the caller itself.

use metafwd_types::{Address, Bytes};

const ADDRESS_LEN: usize = 20;

/// `data || from`
pub fn append_sender(data: &[u8], from: Address) -> Bytes {
    let mut out = Vec::with_capacity(data.len() + ADDRESS_LEN);
    out.extend_from_slice(data);
    out.extend_from_slice(from.as_slice());
    Bytes::from(out)
}

/// Effective `_msgSender()` of a call.
pub fn msg_sender(calldata: &[u8], caller: Address, caller_is_trusted: bool) -> Address {
    if caller_is_trusted && calldata.len() >= ADDRESS_LEN {
        Address::from_slice(&calldata[calldata.len() - ADDRESS_LEN..])
    } else {
        caller
    }
}

/// Effective `_msgData()`: the call data without the appended sender.
pub fn msg_data(calldata: &[u8], caller_is_trusted: bool) -> &[u8] {
    if caller_is_trusted && calldata.len() >= ADDRESS_LEN {
        &calldata[..calldata.len() - ADDRESS_LEN]
    } else {
        calldata
    }
}
