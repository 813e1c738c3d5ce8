//! Name-registry entries and economics.

use alloy_primitives::Address;
use bytes::BufMut;
use commonware_codec::{EncodeSize, Write};
use thiserror::Error;

/// Flat per-entry storage overhead charged on top of the name and data
/// bytes.
pub const NAME_ENTRY_OVERHEAD: u64 = 32;

/// A registered name.
///
/// An entry lives until it is explicitly deleted by its owner or until
/// `expires` has passed, after which anyone may reclaim it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameEntry {
    /// Registered name.
    pub name: String,
    /// Current owner.
    pub owner: Address,
    /// Arbitrary payload attached to the name.
    pub data: String,
    /// Absolute block height at which the registration lapses.
    pub expires: u64,
}

impl Write for NameEntry {
    fn write(&self, buf: &mut impl BufMut) {
        (self.name.len() as u64).write(buf);
        buf.put_slice(self.name.as_bytes());
        buf.put_slice(self.owner.as_slice());
        (self.data.len() as u64).write(buf);
        buf.put_slice(self.data.as_bytes());
        self.expires.write(buf);
    }
}

impl EncodeSize for NameEntry {
    fn encode_size(&self) -> usize {
        (self.name.len() as u64).encode_size()
            + self.name.len()
            + Address::len_bytes()
            + (self.data.len() as u64).encode_size()
            + self.data.len()
            + self.expires.encode_size()
    }
}

/// Cost of holding a name for one block before multipliers are applied.
pub fn name_base_cost(name: &str, data: &str) -> u64 {
    name.len() as u64 + data.len() as u64 + NAME_ENTRY_OVERHEAD
}

/// Rejected name or data string.
#[derive(Debug, Error)]
pub enum NameError {
    /// Empty name.
    #[error("name must not be empty")]
    Empty,

    /// String longer than the configured bound.
    #[error("string length {len} exceeds maximum {max}")]
    TooLong {
        /// Actual length in bytes.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Character outside the permitted set.
    #[error("illegal character {0:?}")]
    IllegalCharacter(char),
}

/// Validate a registrable name: non-empty, bounded, and limited to
/// alphanumerics plus `. _ / - @`.
pub fn validate_name(name: &str, max: usize) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > max {
        return Err(NameError::TooLong { len: name.len(), max });
    }
    for c in name.chars() {
        if !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-' | '@')) {
            return Err(NameError::IllegalCharacter(c));
        }
    }
    Ok(())
}

/// Validate name payload data: bounded printable ASCII. Empty data is
/// allowed and, combined with a zero value, requests deletion.
pub fn validate_name_data(data: &str, max: usize) -> Result<(), NameError> {
    if data.len() > max {
        return Err(NameError::TooLong { len: data.len(), max });
    }
    for c in data.chars() {
        if !matches!(c, ' '..='~') {
            return Err(NameError::IllegalCharacter(c));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_cost_counts_name_data_and_overhead() {
        assert_eq!(name_base_cost("foo", ""), 3 + NAME_ENTRY_OVERHEAD);
        assert_eq!(name_base_cost("foo", "data"), 3 + 4 + NAME_ENTRY_OVERHEAD);
    }

    #[test]
    fn valid_names_pass() {
        for name in ["foo", "foo.bar", "a_b/c-d@e", "UPPER9"] {
            assert!(validate_name(name, 64).is_ok(), "{name}");
        }
    }

    #[test]
    fn empty_name_rejected() {
        assert!(matches!(validate_name("", 64), Err(NameError::Empty)));
    }

    #[test]
    fn long_name_rejected() {
        let name = "a".repeat(65);
        assert!(matches!(
            validate_name(&name, 64),
            Err(NameError::TooLong { len: 65, max: 64 })
        ));
    }

    #[test]
    fn illegal_name_character_rejected() {
        assert!(matches!(
            validate_name("foo bar", 64),
            Err(NameError::IllegalCharacter(' '))
        ));
        assert!(matches!(
            validate_name("foo\u{e9}", 64),
            Err(NameError::IllegalCharacter(_))
        ));
    }

    #[test]
    fn data_allows_printable_ascii() {
        assert!(validate_name_data("some data: [1, 2, 3]!", 1024).is_ok());
        assert!(validate_name_data("", 1024).is_ok());
    }

    #[test]
    fn data_rejects_control_characters() {
        assert!(matches!(
            validate_name_data("line\nbreak", 1024),
            Err(NameError::IllegalCharacter('\n'))
        ));
    }

    #[test]
    fn entry_encode_size_matches_written() {
        let entry = NameEntry {
            name: "foo".to_string(),
            owner: Address::repeat_byte(0x11),
            data: "payload".to_string(),
            expires: 99,
        };
        let mut buf = Vec::new();
        entry.write(&mut buf);
        assert_eq!(entry.encode_size(), buf.len());
    }
}
