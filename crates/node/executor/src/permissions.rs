//! Permission resolution against cached chain state.

use alloy_primitives::Address;
use keel_cache::BlockCache;
use keel_domain::{Account, AccountPermissions, PermFlag, GLOBAL_PERMISSIONS_ADDRESS};
use keel_traits::State;
use tracing::trace;

use crate::ExecutionError;

/// Resolve a permission for an account.
///
/// A flag set-in-mask on the account answers directly; otherwise the global
/// permissions account answers, with no further fallback. The global
/// account is required to exist and to set every known flag; a violation is
/// a corrupt-genesis programmer error and panics.
pub fn has_permission<S: State>(
    cache: &mut BlockCache<S>,
    account: &Account,
    flag: PermFlag,
) -> Result<bool, ExecutionError> {
    assert!(
        flag.is_known(),
        "unknown permission flag {:#x} checked against state",
        flag.0
    );

    if let Some(value) = account.permissions.base.get(flag) {
        trace!(address = %account.address, flag = flag.name(), value, "permission set on account");
        return Ok(value);
    }

    let global = cache
        .get_account(&GLOBAL_PERMISSIONS_ADDRESS)?
        .unwrap_or_else(|| panic!("global permissions account {GLOBAL_PERMISSIONS_ADDRESS} missing"));
    match global.permissions.base.get(flag) {
        Some(value) => {
            trace!(address = %account.address, flag = flag.name(), value, "permission from global default");
            Ok(value)
        }
        None => panic!(
            "global permissions account does not set known flag {}",
            flag.name()
        ),
    }
}

/// Require a permission on every account, reporting the first that lacks
/// it.
pub fn all_have_permission<'a, S: State>(
    cache: &mut BlockCache<S>,
    accounts: impl IntoIterator<Item = &'a Account>,
    flag: PermFlag,
) -> Result<(), ExecutionError> {
    for account in accounts {
        if !has_permission(cache, account, flag)? {
            return Err(ExecutionError::PermissionDenied {
                address: account.address,
                permission: flag.name(),
            });
        }
    }
    Ok(())
}

/// Require a permission on one account.
pub(crate) fn require_permission<S: State>(
    cache: &mut BlockCache<S>,
    account: &Account,
    flag: PermFlag,
) -> Result<(), ExecutionError> {
    if has_permission(cache, account, flag)? {
        Ok(())
    } else {
        Err(ExecutionError::PermissionDenied {
            address: account.address,
            permission: flag.name(),
        })
    }
}

/// Load an account and apply a permission mutation to it, returning the
/// mutated account for writeback.
pub(crate) fn mutate_permissions<S: State>(
    cache: &mut BlockCache<S>,
    address: &Address,
    mutator: impl FnOnce(&mut AccountPermissions) -> Result<(), ExecutionError>,
) -> Result<Account, ExecutionError> {
    let mut account = cache
        .get_account(address)?
        .ok_or(ExecutionError::InvalidAddress)?;
    mutator(&mut account.permissions)?;
    Ok(account)
}
