//! Transaction families and their wire codec.
//!
//! Four families share one envelope: value transfer, contract call/create,
//! name registration and permission mutation. The signed payload for every
//! input is the chain id followed by the canonical transaction with all
//! signatures and redundant public keys omitted, so signatures commit to the
//! chain and to every other input and output.

use alloy_primitives::{keccak256, Address, Bytes, B256};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write};
use k256::ecdsa::SigningKey;

use crate::{PermFlag, PublicKey, Signature};

const TYPE_SEND: u8 = 0x01;
const TYPE_CALL: u8 = 0x02;
const TYPE_NAME: u8 = 0x03;
const TYPE_PERMISSIONS: u8 = 0x20;

/// Configuration used when decoding transactions from bytes.
#[derive(Clone, Copy, Debug)]
pub struct TxCfg {
    /// Maximum call-data size accepted by the codec.
    pub max_data_bytes: usize,
    /// Maximum name / registry-data / role string size.
    pub max_string_bytes: usize,
    /// Maximum number of inputs or outputs in a send.
    pub max_entries: usize,
}

impl Default for TxCfg {
    fn default() -> Self {
        Self { max_data_bytes: 1 << 16, max_string_bytes: 1 << 16, max_entries: 64 }
    }
}

fn write_bytes(bytes: &[u8], buf: &mut impl BufMut) {
    (bytes.len() as u64).write(buf);
    buf.put_slice(bytes);
}

fn bytes_size(bytes: &[u8]) -> usize {
    (bytes.len() as u64).encode_size() + bytes.len()
}

fn read_bytes(buf: &mut impl Buf, max: usize) -> Result<Vec<u8>, CodecError> {
    let len = u64::read(buf)? as usize;
    if len > max {
        return Err(CodecError::InvalidLength(len));
    }
    if buf.remaining() < len {
        return Err(CodecError::EndOfBuffer);
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

fn read_string(buf: &mut impl Buf, max: usize) -> Result<String, CodecError> {
    String::from_utf8(read_bytes(buf, max)?).map_err(|_| CodecError::InvalidLength(0))
}

fn write_address(address: &Address, buf: &mut impl BufMut) {
    buf.put_slice(address.as_slice());
}

fn read_address(buf: &mut impl Buf) -> Result<Address, CodecError> {
    if buf.remaining() < Address::len_bytes() {
        return Err(CodecError::EndOfBuffer);
    }
    let mut out = [0u8; 20];
    buf.copy_to_slice(&mut out);
    Ok(Address::from(out))
}

/// A signed debit against one account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    /// Debited account.
    pub address: Address,
    /// Amount to debit.
    pub amount: u64,
    /// Expected account sequence after this debit.
    pub sequence: u64,
    /// Signature over the transaction sign-bytes.
    pub signature: Signature,
    /// Public key, required when the account has not yet bound one.
    pub public_key: Option<PublicKey>,
}

impl TxInput {
    /// Unsigned input.
    pub fn new(address: Address, amount: u64, sequence: u64) -> Self {
        Self { address, amount, sequence, signature: Signature::ZERO, public_key: None }
    }

    fn write_signing(&self, buf: &mut impl BufMut) {
        write_address(&self.address, buf);
        self.amount.write(buf);
        self.sequence.write(buf);
    }

    fn signing_size(&self) -> usize {
        Address::len_bytes() + self.amount.encode_size() + self.sequence.encode_size()
    }
}

impl Write for TxInput {
    fn write(&self, buf: &mut impl BufMut) {
        self.write_signing(buf);
        self.signature.write(buf);
        match &self.public_key {
            Some(key) => {
                buf.put_u8(1);
                key.write(buf);
            }
            None => buf.put_u8(0),
        }
    }
}

impl EncodeSize for TxInput {
    fn encode_size(&self) -> usize {
        self.signing_size()
            + Signature::SIZE
            + 1
            + self.public_key.map_or(0, |_| PublicKey::SIZE)
    }
}

impl Read for TxInput {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        let address = read_address(buf)?;
        let amount = u64::read(buf)?;
        let sequence = u64::read(buf)?;
        let signature = Signature::read(buf)?;
        let public_key = match u8::read(buf)? {
            0 => None,
            1 => Some(PublicKey::read(buf)?),
            tag => return Err(CodecError::InvalidEnum(tag)),
        };
        Ok(Self { address, amount, sequence, signature, public_key })
    }
}

/// A credit to one account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxOutput {
    /// Credited account; created lazily when absent.
    pub address: Address,
    /// Amount to credit.
    pub amount: u64,
}

impl Write for TxOutput {
    fn write(&self, buf: &mut impl BufMut) {
        write_address(&self.address, buf);
        self.amount.write(buf);
    }
}

impl EncodeSize for TxOutput {
    fn encode_size(&self) -> usize {
        Address::len_bytes() + self.amount.encode_size()
    }
}

impl Read for TxOutput {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &Self::Cfg) -> Result<Self, CodecError> {
        let address = read_address(buf)?;
        let amount = u64::read(buf)?;
        Ok(Self { address, amount })
    }
}

/// Multi-input, multi-output value transfer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendTx {
    /// Debited inputs.
    pub inputs: Vec<TxInput>,
    /// Credited outputs.
    pub outputs: Vec<TxOutput>,
}

impl SendTx {
    /// Empty send.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an unsigned input.
    pub fn add_input(&mut self, address: Address, amount: u64, sequence: u64) {
        self.inputs.push(TxInput::new(address, amount, sequence));
    }

    /// Append an output.
    pub fn add_output(&mut self, address: Address, amount: u64) {
        self.outputs.push(TxOutput { address, amount });
    }

    /// Sign input `index` with the given key, attaching its public key.
    pub fn sign_input(&mut self, chain_id: &str, index: usize, key: &SigningKey) {
        let bytes = self.sign_bytes(chain_id);
        let input = &mut self.inputs[index];
        input.public_key = Some(PublicKey::from_signing_key(key));
        input.signature = Signature::sign(key, &bytes);
    }

    /// Canonical signed payload for this transaction.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        write_bytes(chain_id.as_bytes(), &mut buf);
        buf.put_u8(TYPE_SEND);
        (self.inputs.len() as u64).write(&mut buf);
        for input in &self.inputs {
            input.write_signing(&mut buf);
        }
        (self.outputs.len() as u64).write(&mut buf);
        for output in &self.outputs {
            output.write(&mut buf);
        }
        buf
    }
}

/// Contract call, or contract creation when `address` is absent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallTx {
    /// Caller input; `amount` covers fee plus transferred value.
    pub input: TxInput,
    /// Callee address; `None` creates a new contract.
    pub address: Option<Address>,
    /// Per-transaction gas bound handed to the VM.
    pub gas_limit: u64,
    /// Fee kept regardless of call outcome.
    pub fee: u64,
    /// Call data, or initialization code when creating.
    pub data: Bytes,
}

impl CallTx {
    /// Unsigned call.
    pub fn new(
        input: TxInput,
        address: Option<Address>,
        gas_limit: u64,
        fee: u64,
        data: Bytes,
    ) -> Self {
        Self { input, address, gas_limit, fee, data }
    }

    /// Sign the input with the given key, attaching its public key.
    pub fn sign(&mut self, chain_id: &str, key: &SigningKey) {
        let bytes = self.sign_bytes(chain_id);
        self.input.public_key = Some(PublicKey::from_signing_key(key));
        self.input.signature = Signature::sign(key, &bytes);
    }

    /// Canonical signed payload for this transaction.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        write_bytes(chain_id.as_bytes(), &mut buf);
        buf.put_u8(TYPE_CALL);
        self.input.write_signing(&mut buf);
        match &self.address {
            Some(address) => {
                buf.put_u8(1);
                write_address(address, &mut buf);
            }
            None => buf.put_u8(0),
        }
        self.gas_limit.write(&mut buf);
        self.fee.write(&mut buf);
        write_bytes(self.data.as_ref(), &mut buf);
        buf
    }
}

/// Name registration, update, deletion or reclamation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameTx {
    /// Registrant input; `amount - fee` buys registration time.
    pub input: TxInput,
    /// Name to operate on.
    pub name: String,
    /// Payload to attach; empty with zero value requests deletion.
    pub data: String,
    /// Fee kept by the chain.
    pub fee: u64,
}

impl NameTx {
    /// Unsigned name registration.
    pub fn new(input: TxInput, name: impl Into<String>, data: impl Into<String>, fee: u64) -> Self {
        Self { input, name: name.into(), data: data.into(), fee }
    }

    /// Sign the input with the given key, attaching its public key.
    pub fn sign(&mut self, chain_id: &str, key: &SigningKey) {
        let bytes = self.sign_bytes(chain_id);
        self.input.public_key = Some(PublicKey::from_signing_key(key));
        self.input.signature = Signature::sign(key, &bytes);
    }

    /// Canonical signed payload for this transaction.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        write_bytes(chain_id.as_bytes(), &mut buf);
        buf.put_u8(TYPE_NAME);
        self.input.write_signing(&mut buf);
        write_bytes(self.name.as_bytes(), &mut buf);
        write_bytes(self.data.as_bytes(), &mut buf);
        self.fee.write(&mut buf);
        buf
    }
}

/// Arguments of a permission mutation.
///
/// `permission`, `value` and `role` are read per `flag`; unused fields are
/// left at their zero values and still covered by the signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermArgs {
    /// Which mutation to perform.
    pub flag: PermFlag,
    /// Account whose permissions change (ignored for `SetGlobal`).
    pub target: Address,
    /// Base permission bit being set or unset.
    pub permission: PermFlag,
    /// Value stored by `SetBase` / `SetGlobal`.
    pub value: bool,
    /// Role added or removed.
    pub role: String,
}

impl PermArgs {
    /// Arguments for `SetBase`.
    pub fn set_base(target: Address, permission: PermFlag, value: bool) -> Self {
        Self { flag: PermFlag::SET_BASE, target, permission, value, role: String::new() }
    }

    /// Arguments for `UnsetBase`.
    pub fn unset_base(target: Address, permission: PermFlag) -> Self {
        Self { flag: PermFlag::UNSET_BASE, target, permission, value: false, role: String::new() }
    }

    /// Arguments for `SetGlobal`.
    pub fn set_global(permission: PermFlag, value: bool) -> Self {
        Self {
            flag: PermFlag::SET_GLOBAL,
            target: Address::ZERO,
            permission,
            value,
            role: String::new(),
        }
    }

    /// Arguments for `AddRole`.
    pub fn add_role(target: Address, role: impl Into<String>) -> Self {
        Self {
            flag: PermFlag::ADD_ROLE,
            target,
            permission: PermFlag(0),
            value: false,
            role: role.into(),
        }
    }

    /// Arguments for `RemoveRole`.
    pub fn remove_role(target: Address, role: impl Into<String>) -> Self {
        Self {
            flag: PermFlag::REMOVE_ROLE,
            target,
            permission: PermFlag(0),
            value: false,
            role: role.into(),
        }
    }
}

impl Write for PermArgs {
    fn write(&self, buf: &mut impl BufMut) {
        self.flag.0.write(buf);
        write_address(&self.target, buf);
        self.permission.0.write(buf);
        buf.put_u8(self.value as u8);
        write_bytes(self.role.as_bytes(), buf);
    }
}

impl EncodeSize for PermArgs {
    fn encode_size(&self) -> usize {
        self.flag.0.encode_size()
            + Address::len_bytes()
            + self.permission.0.encode_size()
            + 1
            + bytes_size(self.role.as_bytes())
    }
}

/// Permission mutation issued by a moderator account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionsTx {
    /// Moderator input; the full amount is consumed as a fee.
    pub input: TxInput,
    /// Mutation to apply.
    pub args: PermArgs,
}

impl PermissionsTx {
    /// Unsigned permission mutation.
    pub fn new(input: TxInput, args: PermArgs) -> Self {
        Self { input, args }
    }

    /// Sign the input with the given key, attaching its public key.
    pub fn sign(&mut self, chain_id: &str, key: &SigningKey) {
        let bytes = self.sign_bytes(chain_id);
        self.input.public_key = Some(PublicKey::from_signing_key(key));
        self.input.signature = Signature::sign(key, &bytes);
    }

    /// Canonical signed payload for this transaction.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        write_bytes(chain_id.as_bytes(), &mut buf);
        buf.put_u8(TYPE_PERMISSIONS);
        self.input.write_signing(&mut buf);
        self.args.write(&mut buf);
        buf
    }
}

/// The transaction envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tx {
    /// Value transfer.
    Send(SendTx),
    /// Contract call or creation.
    Call(CallTx),
    /// Name-registry operation.
    Name(NameTx),
    /// Permission mutation.
    Permissions(PermissionsTx),
}

impl Tx {
    /// Wire tag of this variant.
    pub fn type_byte(&self) -> u8 {
        match self {
            Self::Send(_) => TYPE_SEND,
            Self::Call(_) => TYPE_CALL,
            Self::Name(_) => TYPE_NAME,
            Self::Permissions(_) => TYPE_PERMISSIONS,
        }
    }

    /// Canonical signed payload: chain id plus the canonical transaction
    /// with signatures and pubkeys omitted.
    pub fn sign_bytes(&self, chain_id: &str) -> Vec<u8> {
        match self {
            Self::Send(tx) => tx.sign_bytes(chain_id),
            Self::Call(tx) => tx.sign_bytes(chain_id),
            Self::Name(tx) => tx.sign_bytes(chain_id),
            Self::Permissions(tx) => tx.sign_bytes(chain_id),
        }
    }

    /// Transaction hash: keccak256 of the sign-bytes.
    pub fn hash(&self, chain_id: &str) -> B256 {
        keccak256(self.sign_bytes(chain_id))
    }
}

impl Write for Tx {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.type_byte());
        match self {
            Self::Send(tx) => {
                (tx.inputs.len() as u64).write(buf);
                for input in &tx.inputs {
                    input.write(buf);
                }
                (tx.outputs.len() as u64).write(buf);
                for output in &tx.outputs {
                    output.write(buf);
                }
            }
            Self::Call(tx) => {
                tx.input.write(buf);
                match &tx.address {
                    Some(address) => {
                        buf.put_u8(1);
                        write_address(address, buf);
                    }
                    None => buf.put_u8(0),
                }
                tx.gas_limit.write(buf);
                tx.fee.write(buf);
                write_bytes(tx.data.as_ref(), buf);
            }
            Self::Name(tx) => {
                tx.input.write(buf);
                write_bytes(tx.name.as_bytes(), buf);
                write_bytes(tx.data.as_bytes(), buf);
                tx.fee.write(buf);
            }
            Self::Permissions(tx) => {
                tx.input.write(buf);
                tx.args.write(buf);
            }
        }
    }
}

impl EncodeSize for Tx {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Send(tx) => {
                (tx.inputs.len() as u64).encode_size()
                    + tx.inputs.iter().map(EncodeSize::encode_size).sum::<usize>()
                    + (tx.outputs.len() as u64).encode_size()
                    + tx.outputs.iter().map(EncodeSize::encode_size).sum::<usize>()
            }
            Self::Call(tx) => {
                tx.input.encode_size()
                    + 1
                    + tx.address.map_or(0, |_| Address::len_bytes())
                    + tx.gas_limit.encode_size()
                    + tx.fee.encode_size()
                    + bytes_size(tx.data.as_ref())
            }
            Self::Name(tx) => {
                tx.input.encode_size()
                    + bytes_size(tx.name.as_bytes())
                    + bytes_size(tx.data.as_bytes())
                    + tx.fee.encode_size()
            }
            Self::Permissions(tx) => tx.input.encode_size() + tx.args.encode_size(),
        }
    }
}

impl Read for Tx {
    type Cfg = TxCfg;

    fn read_cfg(buf: &mut impl Buf, cfg: &Self::Cfg) -> Result<Self, CodecError> {
        match u8::read(buf)? {
            TYPE_SEND => {
                let n_inputs = u64::read(buf)? as usize;
                if n_inputs > cfg.max_entries {
                    return Err(CodecError::InvalidLength(n_inputs));
                }
                let mut inputs = Vec::with_capacity(n_inputs);
                for _ in 0..n_inputs {
                    inputs.push(TxInput::read(buf)?);
                }
                let n_outputs = u64::read(buf)? as usize;
                if n_outputs > cfg.max_entries {
                    return Err(CodecError::InvalidLength(n_outputs));
                }
                let mut outputs = Vec::with_capacity(n_outputs);
                for _ in 0..n_outputs {
                    outputs.push(TxOutput::read(buf)?);
                }
                Ok(Self::Send(SendTx { inputs, outputs }))
            }
            TYPE_CALL => {
                let input = TxInput::read(buf)?;
                let address = match u8::read(buf)? {
                    0 => None,
                    1 => Some(read_address(buf)?),
                    tag => return Err(CodecError::InvalidEnum(tag)),
                };
                let gas_limit = u64::read(buf)?;
                let fee = u64::read(buf)?;
                let data = Bytes::from(read_bytes(buf, cfg.max_data_bytes)?);
                Ok(Self::Call(CallTx { input, address, gas_limit, fee, data }))
            }
            TYPE_NAME => {
                let input = TxInput::read(buf)?;
                let name = read_string(buf, cfg.max_string_bytes)?;
                let data = read_string(buf, cfg.max_string_bytes)?;
                let fee = u64::read(buf)?;
                Ok(Self::Name(NameTx { input, name, data, fee }))
            }
            TYPE_PERMISSIONS => {
                let input = TxInput::read(buf)?;
                let flag = PermFlag(u64::read(buf)?);
                let target = read_address(buf)?;
                let permission = PermFlag(u64::read(buf)?);
                let value = match u8::read(buf)? {
                    0 => false,
                    1 => true,
                    tag => return Err(CodecError::InvalidEnum(tag)),
                };
                let role = read_string(buf, cfg.max_string_bytes)?;
                Ok(Self::Permissions(PermissionsTx {
                    input,
                    args: PermArgs { flag, target, permission, value, role },
                }))
            }
            tag => Err(CodecError::InvalidEnum(tag)),
        }
    }
}
