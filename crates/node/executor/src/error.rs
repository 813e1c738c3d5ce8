//! Execution error types.

use alloy_primitives::Address;
use thiserror::Error;

/// Errors surfaced by transaction execution.
///
/// The dispatcher returns on first error without rolling back mutations
/// already written to the block cache within the same call; the caller
/// decides whether to reset the batch.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Input account does not exist, or a call target holds no code.
    #[error("invalid address")]
    InvalidAddress,

    /// Zero input or output amount.
    #[error("invalid amount")]
    InvalidAmount,

    /// Signature does not verify under the account's public key.
    #[error("invalid signature")]
    InvalidSignature,

    /// Input-provided public key does not derive the input address.
    #[error("invalid public key")]
    InvalidPubKey,

    /// Account has no bound public key and the input supplies none.
    #[error("unknown public key")]
    UnknownPubKey,

    /// Input sequence does not follow the account sequence.
    #[error("invalid sequence: got {got}, expected {expected}")]
    InvalidSequence {
        /// Sequence carried by the input.
        got: u64,
        /// Account sequence plus one.
        expected: u64,
    },

    /// Balance cannot cover the debit, or outputs exceed inputs.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The same address appears twice across a send's inputs and outputs.
    #[error("duplicate address")]
    DuplicateAddress,

    /// The account lacks a required permission.
    #[error("account {address} does not have {permission} permission")]
    PermissionDenied {
        /// Account that failed the check.
        address: Address,
        /// Name of the missing permission.
        permission: &'static str,
    },

    /// Name registration would cover fewer blocks than the minimum.
    #[error("names must be registered for at least {min} blocks")]
    NameRegistrationTooShort {
        /// Configured minimum registration period.
        min: u64,
    },

    /// Non-owner attempted to update a live name entry.
    #[error("account {address} does not own name {name}")]
    NameNotOwned {
        /// Offending sender.
        address: Address,
        /// Name being updated.
        name: String,
    },

    /// Rejected name or data string.
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// Call transaction directed at a registered native contract.
    #[error(
        "attempt to call native contract at {0}: native contracts must be \
         called from a deployed contract or via the typed transactions"
    )]
    NativeContractCall(Address),

    /// Permission mutation that cannot be performed.
    #[error("permission mutation rejected: {0}")]
    PermissionMutationRejected(String),

    /// Envelope bytes did not decode to a known transaction type.
    #[error("unknown transaction type")]
    UnknownTransactionType,

    /// Committer-only operation invoked on a checker.
    #[error("checker cannot commit")]
    CheckerCannotCommit,

    /// Amount arithmetic overflowed.
    #[error("amount overflow")]
    Overflow,

    /// Backing state error.
    #[error("state error: {0}")]
    State(#[from] keel_traits::StateError),
}

#[cfg(test)]
mod tests {
    use keel_traits::StateError;

    use super::*;

    #[test]
    fn sequence_display_carries_both_values() {
        let err = ExecutionError::InvalidSequence { got: 5, expected: 2 };
        assert_eq!(err.to_string(), "invalid sequence: got 5, expected 2");
    }

    #[test]
    fn permission_denied_display() {
        let err = ExecutionError::PermissionDenied {
            address: Address::ZERO,
            permission: "Send",
        };
        assert!(err.to_string().contains("Send permission"));
    }

    #[test]
    fn name_too_short_display() {
        let err = ExecutionError::NameRegistrationTooShort { min: 5 };
        assert_eq!(err.to_string(), "names must be registered for at least 5 blocks");
    }

    #[test]
    fn state_error_converts() {
        let err: ExecutionError = StateError::Backend("io".to_string()).into();
        assert!(matches!(err, ExecutionError::State(_)));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ExecutionError>();
    }
}
