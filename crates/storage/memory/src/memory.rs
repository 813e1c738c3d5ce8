//! In-memory backing state.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::{keccak256, Address, B256};
use bytes::BufMut;
use commonware_codec::Write;
use keel_domain::{Account, NameEntry};
use keel_traits::{StateError, StateIterate, StateRead, StateWrite};
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct MemoryStateInner {
    accounts: BTreeMap<Address, Account>,
    storage: BTreeMap<(Address, B256), B256>,
    names: BTreeMap<String, NameEntry>,
}

/// In-memory backing state.
///
/// A cloneable handle over shared maps. `save` has nothing durable to do;
/// the root hash is recomputed from current contents, so committed state is
/// always reflected in the digest.
#[derive(Clone, Debug, Default)]
pub struct MemoryState {
    inner: Arc<RwLock<MemoryStateInner>>,
}

impl MemoryState {
    /// Empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account, for genesis construction and tests.
    pub fn with_account(self, account: Account) -> Self {
        self.inner.write().accounts.insert(account.address, account);
        self
    }

    /// Number of accounts currently stored.
    pub fn account_count(&self) -> usize {
        self.inner.read().accounts.len()
    }
}

impl StateRead for MemoryState {
    fn get_account(&self, address: &Address) -> Result<Option<Account>, StateError> {
        Ok(self.inner.read().accounts.get(address).cloned())
    }

    fn get_storage(&self, address: &Address, key: &B256) -> Result<B256, StateError> {
        Ok(self
            .inner
            .read()
            .storage
            .get(&(*address, *key))
            .copied()
            .unwrap_or(B256::ZERO))
    }

    fn get_name(&self, name: &str) -> Result<Option<NameEntry>, StateError> {
        Ok(self.inner.read().names.get(name).cloned())
    }
}

impl StateWrite for MemoryState {
    fn update_account(&self, account: Account) -> Result<(), StateError> {
        self.inner.write().accounts.insert(account.address, account);
        Ok(())
    }

    fn remove_account(&self, address: &Address) -> Result<(), StateError> {
        let mut inner = self.inner.write();
        inner.accounts.remove(address);
        inner
            .storage
            .retain(|(slot_address, _), _| slot_address != address);
        Ok(())
    }

    fn set_storage(&self, address: &Address, key: B256, value: B256) -> Result<(), StateError> {
        let mut inner = self.inner.write();
        // A zero word is indistinguishable from an absent slot; keep the
        // map canonical so the root digest is too.
        if value.is_zero() {
            inner.storage.remove(&(*address, key));
        } else {
            inner.storage.insert((*address, key), value);
        }
        Ok(())
    }

    fn update_name(&self, entry: NameEntry) -> Result<(), StateError> {
        self.inner.write().names.insert(entry.name.clone(), entry);
        Ok(())
    }

    fn remove_name(&self, name: &str) -> Result<(), StateError> {
        self.inner.write().names.remove(name);
        Ok(())
    }

    fn save(&self) -> Result<(), StateError> {
        Ok(())
    }

    fn root_hash(&self) -> Result<B256, StateError> {
        let inner = self.inner.read();
        let mut buf = Vec::new();
        (inner.accounts.len() as u64).write(&mut buf);
        for account in inner.accounts.values() {
            account.write(&mut buf);
        }
        (inner.storage.len() as u64).write(&mut buf);
        for ((address, key), value) in &inner.storage {
            buf.put_slice(address.as_slice());
            buf.put_slice(key.as_slice());
            buf.put_slice(value.as_slice());
        }
        (inner.names.len() as u64).write(&mut buf);
        for entry in inner.names.values() {
            entry.write(&mut buf);
        }
        Ok(keccak256(&buf))
    }
}

impl StateIterate for MemoryState {
    fn iterate_accounts(
        &self,
        consumer: &mut dyn FnMut(&Account) -> bool,
    ) -> Result<bool, StateError> {
        let inner = self.inner.read();
        for account in inner.accounts.values() {
            if consumer(account) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn iterate_storage(
        &self,
        address: &Address,
        consumer: &mut dyn FnMut(&B256, &B256) -> bool,
    ) -> Result<bool, StateError> {
        let inner = self.inner.read();
        for ((slot_address, key), value) in &inner.storage {
            if slot_address != address {
                continue;
            }
            if consumer(key, value) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(byte: u8, balance: u64) -> Account {
        Account::new(Address::repeat_byte(byte)).with_balance(balance)
    }

    #[test]
    fn missing_account_reads_none() {
        let state = MemoryState::new();
        assert_eq!(state.get_account(&Address::repeat_byte(0x01)).unwrap(), None);
    }

    #[test]
    fn account_roundtrip() {
        let state = MemoryState::new();
        state.update_account(account(0x01, 500)).unwrap();
        let loaded = state.get_account(&Address::repeat_byte(0x01)).unwrap().unwrap();
        assert_eq!(loaded.balance, 500);
    }

    #[test]
    fn remove_account_drops_storage() {
        let address = Address::repeat_byte(0x01);
        let state = MemoryState::new();
        state.update_account(account(0x01, 0)).unwrap();
        state
            .set_storage(&address, B256::repeat_byte(0x0a), B256::repeat_byte(0x0b))
            .unwrap();
        state.remove_account(&address).unwrap();
        assert_eq!(state.get_account(&address).unwrap(), None);
        assert_eq!(
            state.get_storage(&address, &B256::repeat_byte(0x0a)).unwrap(),
            B256::ZERO
        );
    }

    #[test]
    fn absent_storage_reads_zero() {
        let state = MemoryState::new();
        let value = state
            .get_storage(&Address::repeat_byte(0x01), &B256::repeat_byte(0x02))
            .unwrap();
        assert_eq!(value, B256::ZERO);
    }

    #[test]
    fn zero_storage_write_is_canonical() {
        let address = Address::repeat_byte(0x01);
        let key = B256::repeat_byte(0x02);
        let state = MemoryState::new();
        let empty_root = state.root_hash().unwrap();

        state.set_storage(&address, key, B256::repeat_byte(0x03)).unwrap();
        assert_ne!(state.root_hash().unwrap(), empty_root);

        state.set_storage(&address, key, B256::ZERO).unwrap();
        assert_eq!(state.root_hash().unwrap(), empty_root);
    }

    #[test]
    fn name_roundtrip() {
        let state = MemoryState::new();
        let entry = NameEntry {
            name: "foo".to_string(),
            owner: Address::repeat_byte(0x01),
            data: "bar".to_string(),
            expires: 10,
        };
        state.update_name(entry.clone()).unwrap();
        assert_eq!(state.get_name("foo").unwrap(), Some(entry));
        state.remove_name("foo").unwrap();
        assert_eq!(state.get_name("foo").unwrap(), None);
    }

    #[test]
    fn root_hash_tracks_contents() {
        let state = MemoryState::new();
        let empty = state.root_hash().unwrap();
        state.update_account(account(0x01, 1)).unwrap();
        let one = state.root_hash().unwrap();
        assert_ne!(empty, one);
        state.update_account(account(0x01, 2)).unwrap();
        assert_ne!(one, state.root_hash().unwrap());
    }

    #[test]
    fn root_hash_is_insertion_order_independent() {
        let a = MemoryState::new()
            .with_account(account(0x01, 1))
            .with_account(account(0x02, 2));
        let b = MemoryState::new()
            .with_account(account(0x02, 2))
            .with_account(account(0x01, 1));
        assert_eq!(a.root_hash().unwrap(), b.root_hash().unwrap());
    }

    #[test]
    fn save_is_a_noop() {
        let state = MemoryState::new().with_account(account(0x01, 1));
        let before = state.root_hash().unwrap();
        state.save().unwrap();
        assert_eq!(state.root_hash().unwrap(), before);
    }

    #[test]
    fn iterate_accounts_in_address_order() {
        let state = MemoryState::new()
            .with_account(account(0x02, 2))
            .with_account(account(0x01, 1));
        let mut seen = Vec::new();
        let stopped = state
            .iterate_accounts(&mut |account| {
                seen.push(account.address);
                false
            })
            .unwrap();
        assert!(!stopped);
        assert_eq!(seen, vec![Address::repeat_byte(0x01), Address::repeat_byte(0x02)]);
    }

    #[test]
    fn iterate_accounts_stops_early() {
        let state = MemoryState::new()
            .with_account(account(0x01, 1))
            .with_account(account(0x02, 2));
        let mut seen = 0;
        let stopped = state
            .iterate_accounts(&mut |_| {
                seen += 1;
                true
            })
            .unwrap();
        assert!(stopped);
        assert_eq!(seen, 1);
    }

    #[test]
    fn iterate_storage_filters_by_account() {
        let a = Address::repeat_byte(0x01);
        let b = Address::repeat_byte(0x02);
        let state = MemoryState::new();
        state.set_storage(&a, B256::repeat_byte(0x01), B256::repeat_byte(0x11)).unwrap();
        state.set_storage(&b, B256::repeat_byte(0x02), B256::repeat_byte(0x22)).unwrap();
        let mut seen = Vec::new();
        state
            .iterate_storage(&a, &mut |key, value| {
                seen.push((*key, *value));
                false
            })
            .unwrap();
        assert_eq!(seen, vec![(B256::repeat_byte(0x01), B256::repeat_byte(0x11))]);
    }
}
