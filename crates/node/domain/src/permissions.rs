//! Account permission model.
//!
//! Each account carries a base-permission bitmap with a companion set mask
//! and a set of string roles. A bit that is not set-in-mask defers to the
//! global permissions account.

use std::collections::BTreeSet;

use alloy_primitives::Address;
use bytes::BufMut;
use commonware_codec::{EncodeSize, Write};

/// Well-known address whose base bitmap supplies the fallback value for any
/// flag an account leaves unset.
pub const GLOBAL_PERMISSIONS_ADDRESS: Address = Address::ZERO;

/// A single permission bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PermFlag(pub u64);

impl PermFlag {
    /// Reserved root flag.
    pub const ROOT: Self = Self(1);
    /// May appear as a send input.
    pub const SEND: Self = Self(1 << 1);
    /// May call contracts.
    pub const CALL: Self = Self(1 << 2);
    /// May create contracts.
    pub const CREATE_CONTRACT: Self = Self(1 << 3);
    /// May create accounts via send outputs.
    pub const CREATE_ACCOUNT: Self = Self(1 << 4);
    /// May register names.
    pub const NAME: Self = Self(1 << 5);
    /// Query a base permission (contract-only).
    pub const HAS_BASE: Self = Self(1 << 6);
    /// Set a base permission on another account.
    pub const SET_BASE: Self = Self(1 << 7);
    /// Clear a base permission mask bit on another account.
    pub const UNSET_BASE: Self = Self(1 << 8);
    /// Set a default on the global permissions account.
    pub const SET_GLOBAL: Self = Self(1 << 9);
    /// Query a role (contract-only).
    pub const HAS_ROLE: Self = Self(1 << 10);
    /// Grant a role.
    pub const ADD_ROLE: Self = Self(1 << 11);
    /// Revoke a role.
    pub const REMOVE_ROLE: Self = Self(1 << 12);

    /// Union of every known flag.
    pub const ALL: Self = Self((1 << 13) - 1);

    /// True for exactly one known bit.
    pub const fn is_known(self) -> bool {
        self.0 != 0 && self.0 & !Self::ALL.0 == 0 && self.0.is_power_of_two()
    }

    /// Canonical flag name, used in event topics and error text.
    pub fn name(self) -> &'static str {
        match self {
            Self::ROOT => "Root",
            Self::SEND => "Send",
            Self::CALL => "Call",
            Self::CREATE_CONTRACT => "CreateContract",
            Self::CREATE_ACCOUNT => "CreateAccount",
            Self::NAME => "Name",
            Self::HAS_BASE => "HasBase",
            Self::SET_BASE => "SetBase",
            Self::UNSET_BASE => "UnsetBase",
            Self::SET_GLOBAL => "SetGlobal",
            Self::HAS_ROLE => "HasRole",
            Self::ADD_ROLE => "AddRole",
            Self::REMOVE_ROLE => "RemoveRole",
            _ => "Unknown",
        }
    }
}

/// Value bitmap plus set mask.
///
/// `perms` carries the stored boolean for each flag whose bit is raised in
/// `set_bit`; all other bits are meaningless and resolve through the global
/// permissions account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BasePermissions {
    /// Stored values.
    pub perms: u64,
    /// Which bits of `perms` are meaningful.
    pub set_bit: u64,
}

impl BasePermissions {
    /// Construct from raw bitmaps.
    pub const fn new(perms: u64, set_bit: u64) -> Self {
        Self { perms, set_bit }
    }

    /// Bitmap with every known flag set-in-mask to the given values, as
    /// required of the global permissions account.
    pub const fn all_set(perms: u64) -> Self {
        Self { perms, set_bit: PermFlag::ALL.0 }
    }

    /// Stored value for the flag, or `None` when it is not set-in-mask.
    pub fn get(&self, flag: PermFlag) -> Option<bool> {
        if self.set_bit & flag.0 != 0 {
            Some(self.perms & flag.0 != 0)
        } else {
            None
        }
    }

    /// Store a value for the flag and raise its mask bit. Returns `false`
    /// for an unknown flag.
    pub fn set(&mut self, flag: PermFlag, value: bool) -> bool {
        if !flag.is_known() {
            return false;
        }
        self.set_bit |= flag.0;
        if value {
            self.perms |= flag.0;
        } else {
            self.perms &= !flag.0;
        }
        true
    }

    /// Clear the flag's mask bit so it falls back to the global default.
    /// Returns `false` for an unknown flag.
    pub fn unset(&mut self, flag: PermFlag) -> bool {
        if !flag.is_known() {
            return false;
        }
        self.set_bit &= !flag.0;
        self.perms &= !flag.0;
        true
    }
}

/// Base permissions plus string roles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountPermissions {
    /// Base bitmap with set mask.
    pub base: BasePermissions,
    /// Granted roles.
    pub roles: BTreeSet<String>,
}

impl AccountPermissions {
    /// Construct from a base bitmap with no roles.
    pub fn from_base(base: BasePermissions) -> Self {
        Self { base, roles: BTreeSet::new() }
    }

    /// Grant a role. Returns `false` when the role was already present.
    pub fn add_role(&mut self, role: &str) -> bool {
        self.roles.insert(role.to_string())
    }

    /// Revoke a role. Returns `false` when the role was not present.
    pub fn remove_role(&mut self, role: &str) -> bool {
        self.roles.remove(role)
    }

    /// True when the role has been granted.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

impl Write for AccountPermissions {
    fn write(&self, buf: &mut impl BufMut) {
        self.base.perms.write(buf);
        self.base.set_bit.write(buf);
        (self.roles.len() as u64).write(buf);
        for role in &self.roles {
            (role.len() as u64).write(buf);
            buf.put_slice(role.as_bytes());
        }
    }
}

impl EncodeSize for AccountPermissions {
    fn encode_size(&self) -> usize {
        self.base.perms.encode_size()
            + self.base.set_bit.encode_size()
            + (self.roles.len() as u64).encode_size()
            + self
                .roles
                .iter()
                .map(|role| (role.len() as u64).encode_size() + role.len())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_unset_flag_is_none() {
        let base = BasePermissions::default();
        assert_eq!(base.get(PermFlag::SEND), None);
    }

    #[test]
    fn set_then_get() {
        let mut base = BasePermissions::default();
        assert!(base.set(PermFlag::SEND, true));
        assert!(base.set(PermFlag::CALL, false));
        assert_eq!(base.get(PermFlag::SEND), Some(true));
        assert_eq!(base.get(PermFlag::CALL), Some(false));
    }

    #[test]
    fn unset_restores_fallback() {
        let mut base = BasePermissions::default();
        base.set(PermFlag::SEND, true);
        assert!(base.unset(PermFlag::SEND));
        assert_eq!(base.get(PermFlag::SEND), None);
        assert_eq!(base.perms & PermFlag::SEND.0, 0);
    }

    #[test]
    fn unknown_flag_rejected() {
        let mut base = BasePermissions::default();
        let unknown = PermFlag(1 << 40);
        assert!(!unknown.is_known());
        assert!(!base.set(unknown, true));
        assert!(!base.unset(unknown));
    }

    #[test]
    fn compound_flag_is_not_known() {
        assert!(!PermFlag(PermFlag::SEND.0 | PermFlag::CALL.0).is_known());
        assert!(!PermFlag(0).is_known());
    }

    #[test]
    fn all_set_covers_every_flag() {
        let base = BasePermissions::all_set(PermFlag::SEND.0 | PermFlag::CALL.0);
        assert_eq!(base.get(PermFlag::SEND), Some(true));
        assert_eq!(base.get(PermFlag::NAME), Some(false));
        assert_eq!(base.get(PermFlag::SET_BASE), Some(false));
    }

    #[test]
    fn flag_names() {
        assert_eq!(PermFlag::SEND.name(), "Send");
        assert_eq!(PermFlag::SET_BASE.name(), "SetBase");
        assert_eq!(PermFlag(1 << 40).name(), "Unknown");
    }

    #[test]
    fn roles_add_and_remove() {
        let mut perms = AccountPermissions::default();
        assert!(perms.add_role("oracle"));
        assert!(!perms.add_role("oracle"));
        assert!(perms.has_role("oracle"));
        assert!(perms.remove_role("oracle"));
        assert!(!perms.remove_role("oracle"));
        assert!(!perms.has_role("oracle"));
    }

    #[test]
    fn encode_size_matches_written() {
        let mut perms = AccountPermissions::from_base(BasePermissions::all_set(0b110));
        perms.add_role("validator");
        perms.add_role("oracle");
        let mut buf = Vec::new();
        perms.write(&mut buf);
        assert_eq!(perms.encode_size(), buf.len());
    }
}
