//! Write-through cache over the backing state for one batch.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256};
use keel_domain::{Account, NameEntry};
use keel_traits::{State, StateError};

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    /// `None` caches an absent value.
    value: Option<V>,
    dirty: bool,
    removed: bool,
}

impl<V> CacheEntry<V> {
    fn loaded(value: Option<V>) -> Self {
        Self { value, dirty: false, removed: false }
    }

    fn updated(value: V) -> Self {
        Self { value: Some(value), dirty: true, removed: false }
    }

    fn removed() -> Self {
        Self { value: None, dirty: true, removed: true }
    }

    fn read(&self) -> Option<&V> {
        if self.removed {
            None
        } else {
            self.value.as_ref()
        }
    }
}

#[derive(Clone, Debug)]
struct StorageEntry {
    value: B256,
    dirty: bool,
}

/// Write-through cache over the backing state.
///
/// Serves all reads and buffers all writes of one batch. Misses are cached,
/// including absent values, so the backing store sees at most one read per
/// key per batch. `sync` flushes buffered writes in a stable order and
/// leaves the cache coherent with the store; it never writes entries that
/// were only read.
///
/// A cache is exclusive to one executor. It holds a cloneable handle to the
/// backing state, never ownership of the store itself.
#[derive(Debug)]
pub struct BlockCache<S> {
    backing: S,
    accounts: BTreeMap<Address, CacheEntry<Account>>,
    storage: BTreeMap<(Address, B256), StorageEntry>,
    names: BTreeMap<String, CacheEntry<NameEntry>>,
}

impl<S: State> BlockCache<S> {
    /// Empty cache over the given backing state.
    pub fn new(backing: S) -> Self {
        Self {
            backing,
            accounts: BTreeMap::new(),
            storage: BTreeMap::new(),
            names: BTreeMap::new(),
        }
    }

    /// Look up an account, loading and caching on miss.
    pub fn get_account(&mut self, address: &Address) -> Result<Option<Account>, StateError> {
        if let Some(entry) = self.accounts.get(address) {
            return Ok(entry.read().cloned());
        }
        let loaded = self.backing.get_account(address)?;
        self.accounts.insert(*address, CacheEntry::loaded(loaded.clone()));
        Ok(loaded)
    }

    /// Buffer an account write. Supersedes any earlier removal.
    pub fn update_account(&mut self, account: Account) {
        self.accounts.insert(account.address, CacheEntry::updated(account));
    }

    /// Buffer an account removal; subsequent reads see it absent.
    pub fn remove_account(&mut self, address: &Address) {
        self.accounts.insert(*address, CacheEntry::removed());
    }

    /// Read a storage slot, loading and caching on miss. Absent reads as
    /// the zero word.
    pub fn get_storage(&mut self, address: &Address, key: &B256) -> Result<B256, StateError> {
        if let Some(entry) = self.storage.get(&(*address, *key)) {
            return Ok(entry.value);
        }
        let value = self.backing.get_storage(address, key)?;
        self.storage.insert((*address, *key), StorageEntry { value, dirty: false });
        Ok(value)
    }

    /// Buffer a storage write. A zero value is stored, not deleted; the
    /// backing store canonicalizes on sync.
    pub fn set_storage(&mut self, address: &Address, key: B256, value: B256) {
        self.storage.insert((*address, key), StorageEntry { value, dirty: true });
    }

    /// Look up a name-registry entry, loading and caching on miss.
    pub fn get_name(&mut self, name: &str) -> Result<Option<NameEntry>, StateError> {
        if let Some(entry) = self.names.get(name) {
            return Ok(entry.read().cloned());
        }
        let loaded = self.backing.get_name(name)?;
        self.names.insert(name.to_string(), CacheEntry::loaded(loaded.clone()));
        Ok(loaded)
    }

    /// Buffer a name-registry write.
    pub fn update_name(&mut self, entry: NameEntry) {
        self.names.insert(entry.name.clone(), CacheEntry::updated(entry));
    }

    /// Buffer a name-registry removal.
    pub fn remove_name(&mut self, name: &str) {
        self.names.insert(name.to_string(), CacheEntry::removed());
    }

    /// Flush every dirty or removed entry to the backing store: accounts by
    /// address, then storage by (address, key), then names by name.
    ///
    /// Idempotent when nothing is dirty. The cache stays populated and
    /// coherent with the store afterwards. An error leaves the store in an
    /// unspecified intermediate state; callers must treat it as fatal for
    /// the batch.
    pub fn sync(&mut self) -> Result<(), StateError> {
        for (address, entry) in &mut self.accounts {
            if !entry.dirty {
                continue;
            }
            if entry.removed {
                self.backing.remove_account(address)?;
                entry.removed = false;
                entry.value = None;
            } else if let Some(account) = &entry.value {
                self.backing.update_account(account.clone())?;
            }
            entry.dirty = false;
        }
        for ((address, key), entry) in &mut self.storage {
            if !entry.dirty {
                continue;
            }
            self.backing.set_storage(address, *key, entry.value)?;
            entry.dirty = false;
        }
        for (name, entry) in &mut self.names {
            if !entry.dirty {
                continue;
            }
            if entry.removed {
                self.backing.remove_name(name)?;
                entry.removed = false;
                entry.value = None;
            } else if let Some(value) = &entry.value {
                self.backing.update_name(value.clone())?;
            }
            entry.dirty = false;
        }
        Ok(())
    }

    /// Visit every account visible through the cache, in address order:
    /// the backing store's accounts overlaid with in-flight mutations.
    pub fn iterate_accounts(
        &mut self,
        consumer: &mut dyn FnMut(&Account) -> bool,
    ) -> Result<bool, StateError> {
        let mut merged: BTreeMap<Address, Account> = BTreeMap::new();
        self.backing.iterate_accounts(&mut |account| {
            merged.insert(account.address, account.clone());
            false
        })?;
        for (address, entry) in &self.accounts {
            match entry.read() {
                Some(account) => {
                    merged.insert(*address, account.clone());
                }
                None => {
                    merged.remove(address);
                }
            }
        }
        for account in merged.values() {
            if consumer(account) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Visit every storage slot of one account visible through the cache,
    /// in key order. Slots written to zero in this batch are not visited.
    pub fn iterate_storage(
        &mut self,
        address: &Address,
        consumer: &mut dyn FnMut(&B256, &B256) -> bool,
    ) -> Result<bool, StateError> {
        let mut merged: BTreeMap<B256, B256> = BTreeMap::new();
        self.backing.iterate_storage(address, &mut |key, value| {
            merged.insert(*key, *value);
            false
        })?;
        for ((slot_address, key), entry) in &self.storage {
            if slot_address != address {
                continue;
            }
            if entry.value.is_zero() {
                merged.remove(key);
            } else {
                merged.insert(*key, entry.value);
            }
        }
        for (key, value) in &merged {
            if consumer(key, value) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use keel_memory::MemoryState;
    use keel_traits::{StateIterate, StateRead, StateWrite};

    use super::*;

    /// Backing state that counts reads and writes going through it.
    #[derive(Clone, Default)]
    struct CountingState {
        inner: MemoryState,
        reads: Arc<AtomicUsize>,
        writes: Arc<AtomicUsize>,
    }

    impl StateRead for CountingState {
        fn get_account(&self, address: &Address) -> Result<Option<Account>, StateError> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.inner.get_account(address)
        }

        fn get_storage(&self, address: &Address, key: &B256) -> Result<B256, StateError> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.inner.get_storage(address, key)
        }

        fn get_name(&self, name: &str) -> Result<Option<NameEntry>, StateError> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.inner.get_name(name)
        }
    }

    impl StateWrite for CountingState {
        fn update_account(&self, account: Account) -> Result<(), StateError> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            self.inner.update_account(account)
        }

        fn remove_account(&self, address: &Address) -> Result<(), StateError> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            self.inner.remove_account(address)
        }

        fn set_storage(&self, address: &Address, key: B256, value: B256) -> Result<(), StateError> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            self.inner.set_storage(address, key, value)
        }

        fn update_name(&self, entry: NameEntry) -> Result<(), StateError> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            self.inner.update_name(entry)
        }

        fn remove_name(&self, name: &str) -> Result<(), StateError> {
            self.writes.fetch_add(1, Ordering::Relaxed);
            self.inner.remove_name(name)
        }

        fn save(&self) -> Result<(), StateError> {
            self.inner.save()
        }

        fn root_hash(&self) -> Result<B256, StateError> {
            self.inner.root_hash()
        }
    }

    impl StateIterate for CountingState {
        fn iterate_accounts(
            &self,
            consumer: &mut dyn FnMut(&Account) -> bool,
        ) -> Result<bool, StateError> {
            self.inner.iterate_accounts(consumer)
        }

        fn iterate_storage(
            &self,
            address: &Address,
            consumer: &mut dyn FnMut(&B256, &B256) -> bool,
        ) -> Result<bool, StateError> {
            self.inner.iterate_storage(address, consumer)
        }
    }

    fn account(byte: u8, balance: u64) -> Account {
        Account::new(Address::repeat_byte(byte)).with_balance(balance)
    }

    #[test]
    fn miss_is_loaded_once() {
        let backing = CountingState::default();
        backing.inner.update_account(account(0x01, 7)).unwrap();
        let mut cache = BlockCache::new(backing.clone());

        let address = Address::repeat_byte(0x01);
        assert_eq!(cache.get_account(&address).unwrap().unwrap().balance, 7);
        assert_eq!(cache.get_account(&address).unwrap().unwrap().balance, 7);
        assert_eq!(backing.reads.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn absent_account_is_cached() {
        let backing = CountingState::default();
        let mut cache = BlockCache::new(backing.clone());

        let address = Address::repeat_byte(0x01);
        assert_eq!(cache.get_account(&address).unwrap(), None);
        assert_eq!(cache.get_account(&address).unwrap(), None);
        assert_eq!(backing.reads.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn read_only_lookups_do_not_write_back() {
        let backing = CountingState::default();
        backing.inner.update_account(account(0x01, 7)).unwrap();
        let mut cache = BlockCache::new(backing.clone());

        cache.get_account(&Address::repeat_byte(0x01)).unwrap();
        cache.get_account(&Address::repeat_byte(0x02)).unwrap();
        cache.get_storage(&Address::repeat_byte(0x01), &B256::repeat_byte(0x0a)).unwrap();
        cache.get_name("foo").unwrap();
        cache.sync().unwrap();
        assert_eq!(backing.writes.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn update_supersedes_remove() {
        let backing = MemoryState::new().with_account(account(0x01, 7));
        let mut cache = BlockCache::new(backing.clone());
        let address = Address::repeat_byte(0x01);

        cache.remove_account(&address);
        assert_eq!(cache.get_account(&address).unwrap(), None);
        cache.update_account(account(0x01, 9));
        assert_eq!(cache.get_account(&address).unwrap().unwrap().balance, 9);
        cache.sync().unwrap();
        assert_eq!(backing.get_account(&address).unwrap().unwrap().balance, 9);
    }

    #[test]
    fn removal_hides_until_sync_and_then_removes() {
        let backing = MemoryState::new().with_account(account(0x01, 7));
        let mut cache = BlockCache::new(backing.clone());
        let address = Address::repeat_byte(0x01);

        cache.remove_account(&address);
        assert_eq!(cache.get_account(&address).unwrap(), None);
        assert!(backing.get_account(&address).unwrap().is_some());

        cache.sync().unwrap();
        assert_eq!(backing.get_account(&address).unwrap(), None);
        assert_eq!(cache.get_account(&address).unwrap(), None);
    }

    #[test]
    fn writes_are_buffered_until_sync() {
        let backing = MemoryState::new();
        let mut cache = BlockCache::new(backing.clone());

        cache.update_account(account(0x01, 5));
        assert_eq!(backing.get_account(&Address::repeat_byte(0x01)).unwrap(), None);

        cache.sync().unwrap();
        assert_eq!(
            backing.get_account(&Address::repeat_byte(0x01)).unwrap().unwrap().balance,
            5
        );
    }

    #[test]
    fn sync_is_idempotent_on_clean_cache() {
        let backing = CountingState::default();
        let mut cache = BlockCache::new(backing.clone());

        cache.update_account(account(0x01, 5));
        cache.sync().unwrap();
        let writes = backing.writes.load(Ordering::Relaxed);
        cache.sync().unwrap();
        assert_eq!(backing.writes.load(Ordering::Relaxed), writes);
    }

    #[test]
    fn cache_stays_coherent_after_sync() {
        let backing = MemoryState::new();
        let mut cache = BlockCache::new(backing.clone());

        cache.update_account(account(0x01, 5));
        cache.sync().unwrap();
        assert_eq!(
            cache.get_account(&Address::repeat_byte(0x01)).unwrap().unwrap().balance,
            5
        );
    }

    #[test]
    fn zero_storage_write_is_stored_in_cache() {
        let address = Address::repeat_byte(0x01);
        let key = B256::repeat_byte(0x0a);
        let backing = MemoryState::new();
        backing.set_storage(&address, key, B256::repeat_byte(0x0b)).unwrap();
        let mut cache = BlockCache::new(backing.clone());

        cache.set_storage(&address, key, B256::ZERO);
        assert_eq!(cache.get_storage(&address, &key).unwrap(), B256::ZERO);

        cache.sync().unwrap();
        assert_eq!(backing.get_storage(&address, &key).unwrap(), B256::ZERO);
    }

    #[test]
    fn name_entries_cache_and_sync() {
        let backing = MemoryState::new();
        let mut cache = BlockCache::new(backing.clone());
        let entry = NameEntry {
            name: "foo".to_string(),
            owner: Address::repeat_byte(0x01),
            data: "bar".to_string(),
            expires: 10,
        };

        cache.update_name(entry.clone());
        assert_eq!(cache.get_name("foo").unwrap(), Some(entry.clone()));
        assert_eq!(backing.get_name("foo").unwrap(), None);

        cache.sync().unwrap();
        assert_eq!(backing.get_name("foo").unwrap(), Some(entry));

        cache.remove_name("foo");
        assert_eq!(cache.get_name("foo").unwrap(), None);
        cache.sync().unwrap();
        assert_eq!(backing.get_name("foo").unwrap(), None);
    }

    #[test]
    fn iterate_accounts_sees_in_flight_mutations() {
        let backing = MemoryState::new()
            .with_account(account(0x01, 1))
            .with_account(account(0x03, 3));
        let mut cache = BlockCache::new(backing);

        cache.update_account(account(0x02, 2));
        cache.remove_account(&Address::repeat_byte(0x03));

        let mut seen = Vec::new();
        cache
            .iterate_accounts(&mut |account| {
                seen.push((account.address, account.balance));
                false
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                (Address::repeat_byte(0x01), 1),
                (Address::repeat_byte(0x02), 2),
            ]
        );
    }

    #[test]
    fn iterate_storage_overlays_writes() {
        let address = Address::repeat_byte(0x01);
        let backing = MemoryState::new();
        backing.set_storage(&address, B256::repeat_byte(0x01), B256::repeat_byte(0x11)).unwrap();
        backing.set_storage(&address, B256::repeat_byte(0x02), B256::repeat_byte(0x22)).unwrap();
        let mut cache = BlockCache::new(backing);

        cache.set_storage(&address, B256::repeat_byte(0x02), B256::ZERO);
        cache.set_storage(&address, B256::repeat_byte(0x03), B256::repeat_byte(0x33));

        let mut seen = Vec::new();
        cache
            .iterate_storage(&address, &mut |key, value| {
                seen.push((*key, *value));
                false
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                (B256::repeat_byte(0x01), B256::repeat_byte(0x11)),
                (B256::repeat_byte(0x03), B256::repeat_byte(0x33)),
            ]
        );
    }
}
