//! Shared input validation.
//!
//! Every transaction family funnels its inputs through the same checks:
//! basic well-formedness, signature over the sign-bytes, strict sequence
//! succession and sufficient balance.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use keel_domain::{Account, TxInput, TxOutput};
use tracing::debug;

use crate::ExecutionError;

/// Well-formedness checks that need no state: a non-zero amount, a real
/// address and a present signature.
pub(crate) fn validate_basic(input: &TxInput) -> Result<(), ExecutionError> {
    if input.address.is_zero() {
        return Err(ExecutionError::InvalidAddress);
    }
    if input.amount == 0 {
        return Err(ExecutionError::InvalidAmount);
    }
    if input.signature.is_zero() {
        return Err(ExecutionError::InvalidSignature);
    }
    Ok(())
}

/// Bind the input's public key to the account if the account has none.
///
/// Accounts created from an address alone learn their public key from the
/// first transaction acting on their behalf; the key must derive the
/// account's address. Once bound, any key supplied by later inputs is
/// ignored. The side effect lands on the account; the transaction is never
/// mutated.
pub(crate) fn bind_public_key(
    account: &mut Account,
    input: &TxInput,
) -> Result<(), ExecutionError> {
    if account.public_key.is_some() {
        return Ok(());
    }
    let key = input.public_key.ok_or(ExecutionError::UnknownPubKey)?;
    if key.address() != Some(account.address) {
        return Err(ExecutionError::InvalidPubKey);
    }
    account.public_key = Some(key);
    Ok(())
}

/// Validate one input against its resolved account.
pub(crate) fn validate_input(
    account: &Account,
    sign_bytes: &[u8],
    input: &TxInput,
) -> Result<(), ExecutionError> {
    validate_basic(input)?;
    let key = account.public_key.as_ref().ok_or(ExecutionError::UnknownPubKey)?;
    if !key.verify(sign_bytes, &input.signature) {
        debug!(address = %input.address, "input signature does not verify");
        return Err(ExecutionError::InvalidSignature);
    }
    let expected = account.sequence + 1;
    if input.sequence != expected {
        return Err(ExecutionError::InvalidSequence { got: input.sequence, expected });
    }
    if account.balance < input.amount {
        return Err(ExecutionError::InsufficientFunds);
    }
    Ok(())
}

/// Validate every input, failing fast, and return the input total.
pub(crate) fn validate_inputs(
    accounts: &BTreeMap<Address, Account>,
    sign_bytes: &[u8],
    inputs: &[TxInput],
) -> Result<u64, ExecutionError> {
    let mut total = 0u64;
    for input in inputs {
        let account = accounts
            .get(&input.address)
            .expect("input accounts are resolved before validation");
        validate_input(account, sign_bytes, input)?;
        total = total.checked_add(input.amount).ok_or(ExecutionError::Overflow)?;
    }
    Ok(total)
}

/// Validate every output and return the output total.
pub(crate) fn validate_outputs(outputs: &[TxOutput]) -> Result<u64, ExecutionError> {
    let mut total = 0u64;
    for output in outputs {
        if output.address.is_zero() {
            return Err(ExecutionError::InvalidAddress);
        }
        if output.amount == 0 {
            return Err(ExecutionError::InvalidAmount);
        }
        total = total.checked_add(output.amount).ok_or(ExecutionError::Overflow)?;
    }
    Ok(total)
}
