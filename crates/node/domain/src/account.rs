//! Accounts and key material.

use alloy_primitives::{hex, keccak256, Address, Bytes, B256};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, FixedSize, Read, Write};
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::AccountPermissions;

/// SEC1-compressed secp256k1 public key (33 bytes).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(pub [u8; 33]);

impl PublicKey {
    /// Public key of the given signing key.
    pub fn from_signing_key(key: &SigningKey) -> Self {
        let point = key.verifying_key().to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(point.as_bytes());
        Self(bytes)
    }

    /// Derive the account address: last 20 bytes of the keccak256 digest
    /// of the uncompressed key without its SEC1 tag byte.
    ///
    /// Returns `None` when the stored bytes are not a valid curve point.
    pub fn address(&self) -> Option<Address> {
        let key = VerifyingKey::from_sec1_bytes(&self.0).ok()?;
        let point = key.to_encoded_point(false);
        let digest = Keccak256::digest(&point.as_bytes()[1..]);
        Some(Address::from_slice(&digest[12..]))
    }

    /// Verify a signature over keccak256(message).
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_sec1_bytes(&self.0) else {
            return false;
        };
        let Ok(sig) = k256::ecdsa::Signature::from_slice(&signature.0) else {
            return false;
        };
        let digest = keccak256(message);
        key.verify_prehash(digest.as_slice(), &sig).is_ok()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey(0x{})", hex::encode(self.0))
    }
}

impl FixedSize for PublicKey {
    const SIZE: usize = 33;
}

impl Write for PublicKey {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }
}

impl Read for PublicKey {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        if buf.remaining() < Self::SIZE {
            return Err(CodecError::EndOfBuffer);
        }
        let mut out = [0u8; 33];
        buf.copy_to_slice(&mut out);
        Ok(Self(out))
    }
}

/// ECDSA signature as 64 raw bytes (r || s).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    /// The all-zero placeholder carried by unsigned inputs.
    pub const ZERO: Self = Self([0u8; 64]);

    /// Sign keccak256(message) with the given key.
    pub fn sign(key: &SigningKey, message: &[u8]) -> Self {
        let digest = keccak256(message);
        let (sig, _) = key
            .sign_prehash_recoverable(digest.as_slice())
            .expect("signing with a valid key cannot fail");
        let mut out = [0u8; 64];
        out.copy_from_slice(&sig.to_bytes());
        Self(out)
    }

    /// True for the unsigned placeholder.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::ZERO
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.0))
    }
}

impl FixedSize for Signature {
    const SIZE: usize = 64;
}

impl Write for Signature {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }
}

impl Read for Signature {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        if buf.remaining() < Self::SIZE {
            return Err(CodecError::EndOfBuffer);
        }
        let mut out = [0u8; 64];
        buf.copy_to_slice(&mut out);
        Ok(Self(out))
    }
}

/// Chain account state.
///
/// The persistent store owns accounts; caches hold working copies that are
/// materialized on first read and written back explicitly. Non-contract
/// accounts carry empty code. The public key may be unknown until the first
/// transaction from the account binds it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// Account address.
    pub address: Address,
    /// Bound public key, if known.
    pub public_key: Option<PublicKey>,
    /// Monotonic counter of debits from this account.
    pub sequence: u64,
    /// Spendable balance in the native unit.
    pub balance: u64,
    /// Contract code; empty for plain accounts.
    pub code: Bytes,
    /// Root digest of the account's storage, maintained by the store.
    pub storage_root: B256,
    /// Base permissions and roles.
    pub permissions: AccountPermissions,
}

impl Account {
    /// Create a zeroed account at the given address.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            public_key: None,
            sequence: 0,
            balance: 0,
            code: Bytes::new(),
            storage_root: B256::ZERO,
            permissions: AccountPermissions::default(),
        }
    }

    /// Set the balance.
    #[must_use]
    pub fn with_balance(mut self, balance: u64) -> Self {
        self.balance = balance;
        self
    }

    /// Set the permissions.
    #[must_use]
    pub fn with_permissions(mut self, permissions: AccountPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set the bound public key.
    #[must_use]
    pub fn with_public_key(mut self, public_key: PublicKey) -> Self {
        self.public_key = Some(public_key);
        self
    }

    /// True when the account holds contract code.
    pub fn is_contract(&self) -> bool {
        !self.code.is_empty()
    }

    /// Advance the sequence by one.
    pub fn inc_sequence(&mut self) {
        self.sequence += 1;
    }

    /// Credit the balance.
    ///
    /// Balances are validated upstream; overflow is a programmer error.
    pub fn add_to_balance(&mut self, amount: u64) {
        self.balance = self
            .balance
            .checked_add(amount)
            .unwrap_or_else(|| panic!("balance overflow for {}", self.address));
    }

    /// Debit the balance. The caller must have checked funds.
    pub fn subtract_from_balance(&mut self, amount: u64) {
        self.balance = self
            .balance
            .checked_sub(amount)
            .unwrap_or_else(|| panic!("balance underflow for {}", self.address));
    }
}

impl Write for Account {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.address.as_slice());
        match &self.public_key {
            Some(key) => {
                buf.put_u8(1);
                key.write(buf);
            }
            None => buf.put_u8(0),
        }
        self.sequence.write(buf);
        self.balance.write(buf);
        (self.code.len() as u64).write(buf);
        buf.put_slice(self.code.as_ref());
        buf.put_slice(self.storage_root.as_slice());
        self.permissions.write(buf);
    }
}

impl EncodeSize for Account {
    fn encode_size(&self) -> usize {
        Address::len_bytes()
            + 1
            + self.public_key.map_or(0, |_| PublicKey::SIZE)
            + self.sequence.encode_size()
            + self.balance.encode_size()
            + (self.code.len() as u64).encode_size()
            + self.code.len()
            + 32
            + self.permissions.encode_size()
    }
}

/// Derive a contract address from the creating account and the sequence of
/// the transaction that created it.
pub fn contract_address(caller: &Address, sequence: u64) -> Address {
    let mut buf = [0u8; 28];
    buf[..20].copy_from_slice(caller.as_slice());
    buf[20..].copy_from_slice(&sequence.to_be_bytes());
    let digest = keccak256(buf);
    Address::from_slice(&digest[12..])
}
