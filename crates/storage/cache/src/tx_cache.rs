//! Per-call cache isolating speculative VM writes.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, B256};
use keel_domain::Account;
use keel_traits::{State, StateError};

use crate::BlockCache;

/// State surface the VM reads and writes during one call.
///
/// The VM performs the caller-to-callee value transfer through this
/// interface if and only if the call succeeds; on failure it must leave no
/// observable change behind.
pub trait VmState {
    /// Look up an account.
    fn get_account(&mut self, address: &Address) -> Result<Option<Account>, StateError>;

    /// Write an account.
    fn update_account(&mut self, account: Account);

    /// Delete an account (self-destruct).
    fn remove_account(&mut self, address: &Address);

    /// Read a storage slot; absent reads as the zero word.
    fn get_storage(&mut self, address: &Address, key: &B256) -> Result<B256, StateError>;

    /// Write a storage slot.
    fn set_storage(&mut self, address: &Address, key: B256, value: B256);
}

/// Buffer over the block cache for one VM invocation.
///
/// Reads fall through to the block cache; writes stay in the buffer until
/// [`TxCache::sync`] promotes them. Dropping the cache without syncing
/// discards every buffered write, which is how a failed call leaves the
/// block cache untouched.
#[derive(Debug)]
pub struct TxCache<'a, S> {
    block: &'a mut BlockCache<S>,
    accounts: BTreeMap<Address, Account>,
    removed: BTreeSet<Address>,
    storage: BTreeMap<(Address, B256), B256>,
}

impl<'a, S: State> TxCache<'a, S> {
    /// Empty buffer over the given block cache.
    pub fn new(block: &'a mut BlockCache<S>) -> Self {
        Self {
            block,
            accounts: BTreeMap::new(),
            removed: BTreeSet::new(),
            storage: BTreeMap::new(),
        }
    }

    /// Promote every buffered write into the block cache.
    pub fn sync(self) {
        for (_, account) in self.accounts {
            self.block.update_account(account);
        }
        for address in self.removed {
            self.block.remove_account(&address);
        }
        for ((address, key), value) in self.storage {
            self.block.set_storage(&address, key, value);
        }
    }
}

impl<S: State> VmState for TxCache<'_, S> {
    fn get_account(&mut self, address: &Address) -> Result<Option<Account>, StateError> {
        if self.removed.contains(address) {
            return Ok(None);
        }
        if let Some(account) = self.accounts.get(address) {
            return Ok(Some(account.clone()));
        }
        self.block.get_account(address)
    }

    fn update_account(&mut self, account: Account) {
        self.removed.remove(&account.address);
        self.accounts.insert(account.address, account);
    }

    fn remove_account(&mut self, address: &Address) {
        self.accounts.remove(address);
        self.removed.insert(*address);
    }

    fn get_storage(&mut self, address: &Address, key: &B256) -> Result<B256, StateError> {
        if let Some(value) = self.storage.get(&(*address, *key)) {
            return Ok(*value);
        }
        self.block.get_storage(address, key)
    }

    fn set_storage(&mut self, address: &Address, key: B256, value: B256) {
        self.storage.insert((*address, key), value);
    }
}
