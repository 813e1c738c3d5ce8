//! Interface to the contract virtual machine.
//!
//! The interpreter itself lives outside this crate. The executor hands it a
//! per-call state buffer, environmental parameters and a mutable gas
//! counter, and interprets the outcome: on success the VM has performed the
//! value transfer through the state buffer; on failure it has left no
//! observable change.

use alloy_primitives::{Address, Bytes, B256};
use keel_cache::VmState;
use thiserror::Error;

/// Failure modes of a contract call.
///
/// VM failures never escape `execute`; they become the "charge fee,
/// transfer nothing" outcome with the error text recorded on the events.
#[derive(Debug, Error)]
pub enum VmError {
    /// The gas counter reached zero.
    #[error("out of gas")]
    OutOfGas,

    /// The contract reverted.
    #[error("reverted: {0}")]
    Reverted(String),

    /// Interpreter fault (bad opcode, stack violation, ...).
    #[error("vm fault: {0}")]
    Fault(String),
}

/// Environmental parameters of one call.
#[derive(Clone, Copy, Debug)]
pub struct VmParams {
    /// Height of the latest committed block.
    pub block_height: u64,
    /// Hash of the latest committed block, as a 32-byte word.
    pub block_hash: B256,
    /// Timestamp of the latest committed block, in seconds.
    pub block_time: u64,
    /// Process-wide gas bound.
    pub gas_limit: u64,
    /// Transaction origin address.
    pub origin: Address,
    /// Hash of the originating transaction.
    pub tx_hash: B256,
}

/// One contract invocation.
#[derive(Clone, Copy, Debug)]
pub struct VmCall<'a> {
    /// Calling account.
    pub caller: Address,
    /// Called (or newly derived) account.
    pub callee: Address,
    /// Code to run.
    pub code: &'a [u8],
    /// Call data.
    pub input: &'a [u8],
    /// Value to transfer on success.
    pub value: u64,
}

/// Contract virtual machine consumed by the executor.
pub trait Vm: Send + Sync {
    /// Run one call against the given state buffer.
    ///
    /// `gas` is decremented as the call executes. On `Ok` the VM has
    /// transferred `call.value` from caller to callee through `state`; on
    /// `Err` it has not touched `state`.
    fn call(
        &self,
        state: &mut dyn VmState,
        params: &VmParams,
        call: VmCall<'_>,
        gas: &mut u64,
    ) -> Result<Bytes, VmError>;

    /// True when the address hosts a built-in native contract. Native
    /// contracts are reachable only from within the VM.
    fn registered_native_contract(&self, address: &Address) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_error_display() {
        assert_eq!(VmError::OutOfGas.to_string(), "out of gas");
        assert_eq!(VmError::Reverted("nope".to_string()).to_string(), "reverted: nope");
        assert_eq!(VmError::Fault("bad opcode".to_string()).to_string(), "vm fault: bad opcode");
    }
}
