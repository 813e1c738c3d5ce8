//! Batch executor and commit controller.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256};
use commonware_codec::Decode;
use keel_cache::{BlockCache, TxCache, VmState};
use keel_domain::{
    acc_input_topic, acc_output_topic, contract_address, name_base_cost, name_reg_topic,
    permissions_topic, validate_name, validate_name_data, Account, AccountPermissions, CallTx,
    EventSink, NameEntry, NameTx, NoOpSink, PermArgs, PermFlag, PermissionsTx, SendTx, Tx,
    TxEventData, TxInput, TxOutput, GLOBAL_PERMISSIONS_ADDRESS,
};
use keel_traits::State;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    permissions, validation, EventCache, ExecutionConfig, ExecutionError, Tip, Vm, VmCall,
    VmParams,
};

/// Batch transaction executor.
///
/// One validation pipeline serves two roles. A *checker* (mempool) skips
/// contract calls, approximating their balance and sequence effects, and
/// never delivers events. A *committer* (block path) runs the VM and, on
/// [`BatchExecutor::commit`], syncs the block cache into the backing store,
/// saves it, flushes buffered events and returns the new state root.
///
/// All operations serialize on one internal mutex. The handle is cheap to
/// clone; the block cache behind it is exclusive to this executor.
#[derive(Clone)]
pub struct BatchExecutor<S> {
    inner: Arc<Mutex<Inner<S>>>,
}

impl<S> fmt::Debug for BatchExecutor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchExecutor").finish_non_exhaustive()
    }
}

struct Inner<S> {
    chain_id: String,
    run_call: bool,
    config: ExecutionConfig,
    tip: Arc<dyn Tip>,
    vm: Arc<dyn Vm>,
    sink: Arc<dyn EventSink>,
    state: S,
    block_cache: BlockCache<S>,
    event_cache: EventCache,
}

impl<S: State + Clone> BatchExecutor<S> {
    /// Mempool validator: contract calls are skipped and events dropped.
    pub fn checker(
        state: S,
        chain_id: impl Into<String>,
        tip: Arc<dyn Tip>,
        vm: Arc<dyn Vm>,
        config: ExecutionConfig,
    ) -> Self {
        Self::new(false, state, chain_id.into(), tip, vm, config, Arc::new(NoOpSink))
    }

    /// Block committer: contract calls run and events are delivered to the
    /// sink on commit.
    pub fn committer(
        state: S,
        chain_id: impl Into<String>,
        tip: Arc<dyn Tip>,
        vm: Arc<dyn Vm>,
        config: ExecutionConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::new(true, state, chain_id.into(), tip, vm, config, sink)
    }

    fn new(
        run_call: bool,
        state: S,
        chain_id: String,
        tip: Arc<dyn Tip>,
        vm: Arc<dyn Vm>,
        config: ExecutionConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let block_cache = BlockCache::new(state.clone());
        Self {
            inner: Arc::new(Mutex::new(Inner {
                chain_id,
                run_call,
                config,
                tip,
                vm,
                sink,
                state,
                block_cache,
                event_cache: EventCache::new(),
            })),
        }
    }

    /// Execute one transaction against the batch.
    ///
    /// On error the transaction's effects may be partially present in the
    /// block cache; callers that want to discard them call
    /// [`BatchExecutor::reset`].
    pub fn execute(&self, tx: &Tx) -> Result<(), ExecutionError> {
        self.inner.lock().execute_tx(tx)
    }

    /// Decode and execute one transaction from envelope bytes.
    pub fn execute_raw(&self, bytes: &[u8]) -> Result<(), ExecutionError> {
        let mut inner = self.inner.lock();
        let tx = Tx::decode_cfg(bytes, &inner.config.tx).map_err(|err| {
            debug!(%err, "transaction envelope does not decode");
            ExecutionError::UnknownTransactionType
        })?;
        inner.execute_tx(&tx)
    }

    /// Discard the batch: fresh block cache and event cache over the
    /// backing state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.block_cache = BlockCache::new(inner.state.clone());
        inner.event_cache = EventCache::new();
    }

    /// Commit the batch: sync the block cache, save the backing store,
    /// flush events, and return the new state root.
    ///
    /// Only a committer may commit. Any error is fatal for the batch: the
    /// backing store may be left in an intermediate state.
    pub fn commit(&self) -> Result<B256, ExecutionError> {
        let mut inner = self.inner.lock();
        if !inner.run_call {
            return Err(ExecutionError::CheckerCannotCommit);
        }
        inner.block_cache.sync()?;
        inner.state.save()?;
        let events = inner.event_cache.len();
        let Inner { event_cache, sink, .. } = &mut *inner;
        event_cache.flush(sink.as_ref());
        let root = inner.state.root_hash()?;
        debug!(%root, events, "batch committed");
        Ok(root)
    }

    /// Look up an account through the block cache, so in-flight mutations
    /// of this batch are visible.
    pub fn get_account(&self, address: &Address) -> Result<Option<Account>, ExecutionError> {
        Ok(self.inner.lock().block_cache.get_account(address)?)
    }

    /// Write an account into the batch.
    pub fn update_account(&self, account: Account) {
        self.inner.lock().block_cache.update_account(account);
    }

    /// Remove an account from the batch.
    pub fn remove_account(&self, address: &Address) {
        self.inner.lock().block_cache.remove_account(address);
    }

    /// Read a storage slot through the block cache.
    pub fn get_storage(&self, address: &Address, key: &B256) -> Result<B256, ExecutionError> {
        Ok(self.inner.lock().block_cache.get_storage(address, key)?)
    }

    /// Write a storage slot into the batch.
    pub fn set_storage(&self, address: &Address, key: B256, value: B256) {
        self.inner.lock().block_cache.set_storage(address, key, value);
    }

    /// Visit every account visible to the batch.
    pub fn iterate_accounts(
        &self,
        consumer: &mut dyn FnMut(&Account) -> bool,
    ) -> Result<bool, ExecutionError> {
        Ok(self.inner.lock().block_cache.iterate_accounts(consumer)?)
    }

    /// Visit every storage slot of one account visible to the batch.
    pub fn iterate_storage(
        &self,
        address: &Address,
        consumer: &mut dyn FnMut(&B256, &B256) -> bool,
    ) -> Result<bool, ExecutionError> {
        Ok(self.inner.lock().block_cache.iterate_storage(address, consumer)?)
    }
}

impl<S: State + Clone> Inner<S> {
    fn execute_tx(&mut self, tx: &Tx) -> Result<(), ExecutionError> {
        trace!(tx_type = tx.type_byte(), "executing transaction");
        match tx {
            Tx::Send(send) => self.execute_send(tx, send),
            Tx::Call(call) => self.execute_call(tx, call),
            Tx::Name(name) => self.execute_name(tx, name),
            Tx::Permissions(perms) => self.execute_permissions(tx, perms),
        }
    }

    /// Resolve the input accounts, rejecting duplicates and binding public
    /// keys.
    fn get_inputs(
        &mut self,
        inputs: &[TxInput],
    ) -> Result<BTreeMap<Address, Account>, ExecutionError> {
        let mut accounts = BTreeMap::new();
        for input in inputs {
            if accounts.contains_key(&input.address) {
                return Err(ExecutionError::DuplicateAddress);
            }
            let mut account = self.block_cache.get_account(&input.address)?.ok_or_else(|| {
                debug!(address = %input.address, "cannot find input account");
                ExecutionError::InvalidAddress
            })?;
            validation::bind_public_key(&mut account, input)?;
            accounts.insert(input.address, account);
        }
        Ok(accounts)
    }

    /// Resolve the output accounts into the map. An absent output is
    /// created only if every input may create accounts; the check runs
    /// lazily, at most once.
    fn get_or_make_outputs(
        &mut self,
        accounts: &mut BTreeMap<Address, Account>,
        inputs: &[TxInput],
        outputs: &[TxOutput],
    ) -> Result<(), ExecutionError> {
        let mut checked_create = false;
        for output in outputs {
            if accounts.contains_key(&output.address) {
                return Err(ExecutionError::DuplicateAddress);
            }
            match self.block_cache.get_account(&output.address)? {
                Some(account) => {
                    accounts.insert(output.address, account);
                }
                None => {
                    if !checked_create {
                        for input in inputs {
                            let account = accounts
                                .get(&input.address)
                                .expect("inputs are resolved before outputs");
                            if !permissions::has_permission(
                                &mut self.block_cache,
                                account,
                                PermFlag::CREATE_ACCOUNT,
                            )? {
                                return Err(ExecutionError::PermissionDenied {
                                    address: input.address,
                                    permission: PermFlag::CREATE_ACCOUNT.name(),
                                });
                            }
                        }
                        checked_create = true;
                    }
                    accounts.insert(output.address, Account::new(output.address));
                }
            }
        }
        Ok(())
    }

    fn execute_send(&mut self, env: &Tx, tx: &SendTx) -> Result<(), ExecutionError> {
        let mut accounts = self.get_inputs(&tx.inputs)?;
        permissions::all_have_permission(&mut self.block_cache, accounts.values(), PermFlag::SEND)?;
        self.get_or_make_outputs(&mut accounts, &tx.inputs, &tx.outputs)?;

        let sign_bytes = env.sign_bytes(&self.chain_id);
        let in_total = validation::validate_inputs(&accounts, &sign_bytes, &tx.inputs)?;
        let out_total = validation::validate_outputs(&tx.outputs)?;
        if out_total > in_total {
            return Err(ExecutionError::InsufficientFunds);
        }
        let fee = in_total - out_total;

        for input in &tx.inputs {
            let account = accounts.get_mut(&input.address).expect("resolved above");
            account.subtract_from_balance(input.amount);
            account.inc_sequence();
        }
        for output in &tx.outputs {
            let account = accounts.get_mut(&output.address).expect("resolved above");
            account.add_to_balance(output.amount);
        }
        for account in accounts.into_values() {
            self.block_cache.update_account(account);
        }
        debug!(in_total, out_total, fee, "send executed");

        for input in &tx.inputs {
            self.event_cache
                .fire(acc_input_topic(&input.address), TxEventData::plain(env.clone()));
        }
        for output in &tx.outputs {
            self.event_cache
                .fire(acc_output_topic(&output.address), TxEventData::plain(env.clone()));
        }
        Ok(())
    }

    fn execute_call(&mut self, env: &Tx, tx: &CallTx) -> Result<(), ExecutionError> {
        let create = tx.address.is_none();

        let mut caller = self.block_cache.get_account(&tx.input.address)?.ok_or_else(|| {
            debug!(address = %tx.input.address, "cannot find input account");
            ExecutionError::InvalidAddress
        })?;

        let required = if create { PermFlag::CREATE_CONTRACT } else { PermFlag::CALL };
        permissions::require_permission(&mut self.block_cache, &caller, required)?;

        validation::bind_public_key(&mut caller, &tx.input)?;
        let sign_bytes = env.sign_bytes(&self.chain_id);
        validation::validate_input(&caller, &sign_bytes, &tx.input)?;
        if tx.input.amount < tx.fee {
            debug!(address = %tx.input.address, "input does not cover the fee");
            return Err(ExecutionError::InsufficientFunds);
        }

        let mut callee = None;
        if let Some(address) = &tx.address {
            if self.vm.registered_native_contract(address) {
                return Err(ExecutionError::NativeContractCall(*address));
            }
            // May be absent in the mempool when the contract was created
            // earlier in the same block; the committer keeps the fee then.
            callee = self.block_cache.get_account(address)?;
        }

        let value = tx.input.amount - tx.fee;
        caller.inc_sequence();
        caller.subtract_from_balance(tx.fee);
        self.block_cache.update_account(caller.clone());

        if self.run_call {
            self.run_vm_call(env, tx, caller, callee, value)
        } else {
            // The mempool skips the call and mirrors its balance effect;
            // for creations it also mirrors the derivation sequence bump.
            caller.subtract_from_balance(value);
            if create {
                caller.inc_sequence();
            }
            self.block_cache.update_account(caller);
            Ok(())
        }
    }

    /// Run the VM for a call transaction and post-process both outcomes.
    ///
    /// The caller's fee debit and sequence bump are already in the block
    /// cache and survive a failed call; everything the VM touches lives in
    /// a tx cache that is promoted only on success.
    fn run_vm_call(
        &mut self,
        env: &Tx,
        tx: &CallTx,
        caller: Account,
        callee: Option<Account>,
        value: u64,
    ) -> Result<(), ExecutionError> {
        let create = tx.address.is_none();
        let mut gas = tx.gas_limit;
        let params = VmParams {
            block_height: self.tip.last_block_height(),
            block_hash: self.tip.last_block_hash(),
            block_time: self.tip.last_block_time(),
            gas_limit: self.config.call_gas_limit,
            origin: caller.address,
            tx_hash: env.hash(&self.chain_id),
        };

        let target_has_code = callee.as_ref().is_some_and(|account| account.is_contract());
        let outcome = if !create && !target_has_code {
            // Calling an absent account or one holding no code keeps the
            // fee and moves nothing.
            match &callee {
                None => debug!(callee = ?tx.address, "call to address that does not exist"),
                Some(_) => debug!(callee = ?tx.address, "call to address that holds no code"),
            }
            Err(ExecutionError::InvalidAddress.to_string())
        } else {
            let (callee_account, code) = if create {
                let address = contract_address(&caller.address, tx.input.sequence);
                let account = Account::new(address)
                    .with_permissions(self.global_permissions()?);
                trace!(contract = %address, "derived new contract account");
                (account, tx.data.clone())
            } else {
                let account = callee.expect("code presence checked above");
                let code = account.code.clone();
                trace!(contract = %account.address, "calling existing contract");
                (account, code)
            };
            let callee_address = callee_account.address;

            let mut tx_cache = TxCache::new(&mut self.block_cache);
            tx_cache.update_account(caller.clone());
            tx_cache.update_account(callee_account);
            let call = VmCall {
                caller: caller.address,
                callee: callee_address,
                code: code.as_ref(),
                input: tx.data.as_ref(),
                value,
            };

            match self.vm.call(&mut tx_cache, &params, call, &mut gas) {
                Ok(ret) => {
                    if create {
                        let mut deployed = tx_cache
                            .get_account(&callee_address)?
                            .expect("callee written to the tx cache before the call");
                        deployed.code = ret.clone();
                        tx_cache.update_account(deployed);
                    }
                    tx_cache.sync();
                    trace!(gas_left = gas, "successful execution");
                    Ok(ret)
                }
                Err(err) => {
                    // The tx cache is dropped: the fee stays charged and
                    // nothing else moves.
                    debug!(%err, "error on execution");
                    Err(err.to_string())
                }
            }
        };

        let (ret, exception) = match outcome {
            Ok(ret) => (ret, String::new()),
            Err(exception) => (Bytes::new(), exception),
        };
        self.event_cache.fire(
            acc_input_topic(&tx.input.address),
            TxEventData { tx: env.clone(), ret: ret.clone(), exception: exception.clone() },
        );
        if let Some(address) = &tx.address {
            self.event_cache
                .fire(acc_output_topic(address), TxEventData { tx: env.clone(), ret, exception });
        }
        Ok(())
    }

    fn global_permissions(&mut self) -> Result<AccountPermissions, ExecutionError> {
        let global = self
            .block_cache
            .get_account(&GLOBAL_PERMISSIONS_ADDRESS)?
            .unwrap_or_else(|| {
                panic!("global permissions account {GLOBAL_PERMISSIONS_ADDRESS} missing")
            });
        Ok(global.permissions)
    }

    fn execute_name(&mut self, env: &Tx, tx: &NameTx) -> Result<(), ExecutionError> {
        let mut account = self.block_cache.get_account(&tx.input.address)?.ok_or_else(|| {
            debug!(address = %tx.input.address, "cannot find input account");
            ExecutionError::InvalidAddress
        })?;
        permissions::require_permission(&mut self.block_cache, &account, PermFlag::NAME)?;
        validation::bind_public_key(&mut account, &tx.input)?;
        let sign_bytes = env.sign_bytes(&self.chain_id);
        validation::validate_input(&account, &sign_bytes, &tx.input)?;
        if tx.input.amount < tx.fee {
            debug!(address = %tx.input.address, "input does not cover the fee");
            return Err(ExecutionError::InsufficientFunds);
        }
        validate_name(&tx.name, self.config.max_name_length)
            .map_err(|err| ExecutionError::InvalidString(err.to_string()))?;
        validate_name_data(&tx.data, self.config.max_data_length)
            .map_err(|err| ExecutionError::InvalidString(err.to_string()))?;

        let value = tx.input.amount - tx.fee;
        let cost_per_block = self.config.name_cost_per_block(name_base_cost(&tx.name, &tx.data));
        let expires_in = value / cost_per_block;
        let last_height = self.tip.last_block_height();
        let min = self.config.min_name_registration_period;
        trace!(value, cost_per_block, expires_in, last_height, "name operation");

        match self.block_cache.get_name(&tx.name)? {
            None => {
                if expires_in < min {
                    return Err(ExecutionError::NameRegistrationTooShort { min });
                }
                let entry = NameEntry {
                    name: tx.name.clone(),
                    owner: tx.input.address,
                    data: tx.data.clone(),
                    expires: last_height + expires_in,
                };
                debug!(name = %entry.name, expires = entry.expires, "creating name entry");
                self.block_cache.update_name(entry);
            }
            Some(mut entry) if entry.expires > last_height => {
                if entry.owner != tx.input.address {
                    return Err(ExecutionError::NameNotOwned {
                        address: tx.input.address,
                        name: tx.name.clone(),
                    });
                }
                if value == 0 && tx.data.is_empty() {
                    debug!(name = %entry.name, "removing name entry");
                    self.block_cache.remove_name(&entry.name);
                } else {
                    // The data size may have changed, so unspent time is
                    // converted back into credit at the old size before
                    // buying time at the new one.
                    let credit = (entry.expires - last_height)
                        .checked_mul(name_base_cost(&entry.name, &entry.data))
                        .and_then(|unspent| unspent.checked_add(value))
                        .ok_or(ExecutionError::Overflow)?;
                    let extended = credit / cost_per_block;
                    if extended < min {
                        return Err(ExecutionError::NameRegistrationTooShort { min });
                    }
                    entry.expires = last_height + extended;
                    entry.data = tx.data.clone();
                    debug!(name = %entry.name, credit, expires = entry.expires, "updated name entry");
                    self.block_cache.update_name(entry);
                }
            }
            Some(mut entry) => {
                // Expired: anyone may reclaim.
                if expires_in < min {
                    return Err(ExecutionError::NameRegistrationTooShort { min });
                }
                entry.owner = tx.input.address;
                entry.data = tx.data.clone();
                entry.expires = last_height + expires_in;
                debug!(name = %entry.name, owner = %entry.owner, "reclaimed expired name entry");
                self.block_cache.update_name(entry);
            }
        }

        account.inc_sequence();
        account.subtract_from_balance(value);
        self.block_cache.update_account(account);

        self.event_cache
            .fire(acc_input_topic(&tx.input.address), TxEventData::plain(env.clone()));
        self.event_cache.fire(name_reg_topic(&tx.name), TxEventData::plain(env.clone()));
        Ok(())
    }

    fn execute_permissions(&mut self, env: &Tx, tx: &PermissionsTx) -> Result<(), ExecutionError> {
        let mut account = self.block_cache.get_account(&tx.input.address)?.ok_or_else(|| {
            debug!(address = %tx.input.address, "cannot find input account");
            ExecutionError::InvalidAddress
        })?;

        let flag = tx.args.flag;
        permissions::require_permission(&mut self.block_cache, &account, flag)?;
        validation::bind_public_key(&mut account, &tx.input)?;
        let sign_bytes = env.sign_bytes(&self.chain_id);
        validation::validate_input(&account, &sign_bytes, &tx.input)?;

        let value = tx.input.amount;
        debug!(flag = flag.name(), target = %tx.args.target, "permission mutation");

        let target = match flag {
            PermFlag::HAS_BASE | PermFlag::HAS_ROLE => {
                return Err(ExecutionError::PermissionMutationRejected(format!(
                    "{} is query-only; inspect chain state directly",
                    flag.name()
                )));
            }
            PermFlag::SET_GLOBAL => GLOBAL_PERMISSIONS_ADDRESS,
            PermFlag::SET_BASE
            | PermFlag::UNSET_BASE
            | PermFlag::ADD_ROLE
            | PermFlag::REMOVE_ROLE => tx.args.target,
            _ => panic!("invalid permission mutation flag {:#x}", flag.0),
        };

        if target == account.address {
            apply_permission_mutation(&tx.args, &mut account.permissions)?;
        } else {
            let mutated =
                permissions::mutate_permissions(&mut self.block_cache, &target, |perms| {
                    apply_permission_mutation(&tx.args, perms)
                })?;
            self.block_cache.update_account(mutated);
        }

        account.inc_sequence();
        account.subtract_from_balance(value);
        self.block_cache.update_account(account);

        self.event_cache
            .fire(acc_input_topic(&tx.input.address), TxEventData::plain(env.clone()));
        self.event_cache.fire(permissions_topic(flag), TxEventData::plain(env.clone()));
        Ok(())
    }
}

fn apply_permission_mutation(
    args: &PermArgs,
    perms: &mut AccountPermissions,
) -> Result<(), ExecutionError> {
    match args.flag {
        PermFlag::SET_BASE | PermFlag::SET_GLOBAL => {
            if !perms.base.set(args.permission, args.value) {
                return Err(ExecutionError::PermissionMutationRejected(format!(
                    "unknown permission bit {:#x}",
                    args.permission.0
                )));
            }
            Ok(())
        }
        PermFlag::UNSET_BASE => {
            if !perms.base.unset(args.permission) {
                return Err(ExecutionError::PermissionMutationRejected(format!(
                    "unknown permission bit {:#x}",
                    args.permission.0
                )));
            }
            Ok(())
        }
        PermFlag::ADD_ROLE => {
            if !perms.add_role(&args.role) {
                return Err(ExecutionError::PermissionMutationRejected(format!(
                    "role {} already exists for {}",
                    args.role, args.target
                )));
            }
            Ok(())
        }
        PermFlag::REMOVE_ROLE => {
            if !perms.remove_role(&args.role) {
                return Err(ExecutionError::PermissionMutationRejected(format!(
                    "role {} does not exist for {}",
                    args.role, args.target
                )));
            }
            Ok(())
        }
        _ => unreachable!("mutation flags are filtered by the dispatcher"),
    }
}
