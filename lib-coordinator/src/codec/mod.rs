//! Ledger account codec
//!
//! The ledger hands back raw account bytes, not structured records, so this
//! module is the only place that knows the binary layout. Two families of
//! shapes are covered:
//!
//! - **Account records** ([`AccountRecord`]): `CoordinatorConfig` and
//!   `LedgerBatch`, read from the ledger.
//! - **Instructions** ([`CoordinatorInstruction`]): payloads sent to the
//!   coordinator program.
//!
//! # Wire Conventions
//!
//! ```text
//! [8-byte discriminator][fields...]
//! ```
//!
//! - Integers are fixed-width little-endian
//! - `Vec<[u8; 32]>` is a 4-byte LE length followed by the elements
//! - `Option<T>` is a 1-byte presence flag (0 or 1) followed by `T` if present
//!
//! Decoding walks the buffer with a running offset ([`ByteReader`]). A short
//! buffer, an unknown tag or a wrong discriminator is always an error; nothing
//! is defaulted.

mod accounts;
mod instructions;

pub use accounts::AccountRecord;
pub use instructions::CoordinatorInstruction;

use thiserror::Error;

/// 8-byte type tags
///
/// Each is the first 8 bytes of `SHA-256("<namespace>:<name>")`, with
/// `account` as the namespace for records and `global` for instructions.
pub mod discriminators {
    pub const COORDINATOR_CONFIG: [u8; 8] = [46, 57, 27, 24, 141, 239, 105, 245];
    pub const LEDGER_BATCH: [u8; 8] = [156, 194, 70, 44, 22, 88, 137, 44];

    pub const INITIALIZE: [u8; 8] = [175, 175, 109, 31, 13, 152, 155, 237];
    pub const CREATE_BATCH: [u8; 8] = [159, 198, 248, 43, 248, 31, 235, 86];
    pub const SUBMIT_QUERY: [u8; 8] = [171, 5, 144, 53, 144, 160, 163, 225];
    pub const FINALIZE_BATCH: [u8; 8] = [255, 211, 130, 81, 161, 239, 27, 11];
    pub const COMPLETE_BATCH: [u8; 8] = [87, 141, 249, 230, 112, 147, 8, 139];
}

/// Width of every discriminator
pub const DISCRIMINATOR_SIZE: usize = 8;

/// Codec errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Buffer ended before `field` could be read
    #[error("Incomplete {field}: expected {expected} bytes, got {actual}")]
    Incomplete {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Buffer is tagged as a different type
    #[error("Invalid discriminator for {record}: expected {expected:?}, got {actual:?}")]
    InvalidDiscriminator {
        record: &'static str,
        expected: [u8; 8],
        actual: [u8; 8],
    },

    /// Enum or presence byte outside its range
    #[error("Invalid {field} tag: {tag}")]
    InvalidTag { field: &'static str, tag: u8 },

    /// Declared length exceeds what the record can hold
    #[error("Size violation: {field} declares {declared} entries, max {max}")]
    SizeViolation {
        field: &'static str,
        declared: usize,
        max: usize,
    },

    /// Instruction discriminator not recognised
    #[error("Unknown instruction discriminator: {0:?}")]
    UnknownInstruction([u8; 8]),

    /// Fields decoded but violate record invariants
    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// Cursor over an account buffer
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Next `len` bytes, advancing the offset
    pub fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::Incomplete {
                field,
                expected: len,
                actual: self.remaining(),
            });
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(field, N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(field, 1)?[0])
    }

    pub fn read_u32_le(&mut self, field: &'static str) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array(field)?))
    }

    pub fn read_u64_le(&mut self, field: &'static str) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.read_array(field)?))
    }

    pub fn read_i64_le(&mut self, field: &'static str) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.read_array(field)?))
    }

    /// Presence flag of an optional field
    pub fn read_flag(&mut self, field: &'static str) -> Result<bool, CodecError> {
        match self.read_u8(field)? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(CodecError::InvalidTag { field, tag }),
        }
    }

    /// Length-prefixed vector of 32-byte elements
    ///
    /// The declared length is checked against `max_len` and the bytes left
    /// before anything is allocated.
    pub fn read_vec32(
        &mut self,
        field: &'static str,
        max_len: usize,
    ) -> Result<Vec<[u8; 32]>, CodecError> {
        let declared = self.read_u32_le(field)? as usize;
        if declared > max_len {
            return Err(CodecError::SizeViolation {
                field,
                declared,
                max: max_len,
            });
        }
        let needed = declared.checked_mul(32).unwrap_or(usize::MAX);
        if needed > self.remaining() {
            return Err(CodecError::Incomplete {
                field,
                expected: needed,
                actual: self.remaining(),
            });
        }
        let mut items = Vec::with_capacity(declared);
        for _ in 0..declared {
            items.push(self.read_array::<32>(field)?);
        }
        Ok(items)
    }

    /// Consume and check an 8-byte discriminator
    pub fn expect_discriminator(
        &mut self,
        record: &'static str,
        expected: [u8; 8],
    ) -> Result<(), CodecError> {
        let actual = self.read_array::<DISCRIMINATOR_SIZE>("discriminator")?;
        if actual != expected {
            return Err(CodecError::InvalidDiscriminator {
                record,
                expected,
                actual,
            });
        }
        Ok(())
    }
}

pub(crate) fn put_vec32<'a>(out: &mut Vec<u8>, items: impl ExactSizeIterator<Item = &'a [u8; 32]>) {
    out.extend_from_slice(&(items.len() as u32).to_le_bytes());
    for item in items {
        out.extend_from_slice(item);
    }
}
