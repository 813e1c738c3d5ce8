//! Backing-state traits.
//!
//! The execution core never talks to a concrete store. It reads and writes
//! through these traits, layered behind the block cache, and treats the
//! root hash as an opaque content digest.

use alloy_primitives::{Address, B256};
use keel_domain::{Account, NameEntry};

use crate::StateError;

/// Read access to accounts, contract storage and the name registry.
pub trait StateRead {
    /// Look up an account by address. `None` means the account does not
    /// exist in the committed state.
    fn get_account(&self, address: &Address) -> Result<Option<Account>, StateError>;

    /// Read one contract storage slot. An absent slot reads as the zero
    /// word; the store is free to not distinguish the two.
    fn get_storage(&self, address: &Address, key: &B256) -> Result<B256, StateError>;

    /// Look up a name-registry entry by name.
    fn get_name(&self, name: &str) -> Result<Option<NameEntry>, StateError>;
}

/// Write access plus durable persistence.
pub trait StateWrite {
    /// Insert or replace an account.
    fn update_account(&self, account: Account) -> Result<(), StateError>;

    /// Delete an account. Deleting an absent account is a no-op.
    fn remove_account(&self, address: &Address) -> Result<(), StateError>;

    /// Write one contract storage slot. Writing the zero word is
    /// equivalent to deleting the slot.
    fn set_storage(&self, address: &Address, key: B256, value: B256) -> Result<(), StateError>;

    /// Insert or replace a name-registry entry.
    fn update_name(&self, entry: NameEntry) -> Result<(), StateError>;

    /// Delete a name-registry entry. Deleting an absent entry is a no-op.
    fn remove_name(&self, name: &str) -> Result<(), StateError>;

    /// Persist the current contents durably.
    fn save(&self) -> Result<(), StateError>;

    /// Content digest of the committed state, used as the post-state root.
    fn root_hash(&self) -> Result<B256, StateError>;
}

/// Iteration over accounts and per-account storage.
pub trait StateIterate {
    /// Visit every account in address order. The consumer returns `true`
    /// to stop early; the result reports whether iteration was stopped.
    fn iterate_accounts(
        &self,
        consumer: &mut dyn FnMut(&Account) -> bool,
    ) -> Result<bool, StateError>;

    /// Visit every storage slot of one account in key order. Same early
    /// stop contract as [`StateIterate::iterate_accounts`].
    fn iterate_storage(
        &self,
        address: &Address,
        consumer: &mut dyn FnMut(&B256, &B256) -> bool,
    ) -> Result<bool, StateError>;
}

/// Full backing state consumed by the batch executor.
pub trait State: StateRead + StateWrite + StateIterate {}

impl<T: StateRead + StateWrite + StateIterate> State for T {}
