//! Core data types for DriftDB

use std::fmt;

/// Location of a value on disk.
///
/// The upper 32 bits hold the segment index, the lower 32 bits hold the
/// offset of the value's length prefix inside its shard value file. The
/// shard itself is not stored: it is recomputed from the key and the
/// segment's salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u64);

impl Address {
    /// Pack a segment index and a value file offset
    pub fn new(index: u32, offset: u32) -> Self {
        Self((u64::from(index) << 32) | u64::from(offset))
    }

    /// Wrap a raw packed address
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw packed representation
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Segment index
    pub fn index(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Offset of the value record within its shard file
    pub fn offset(&self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index(), self.offset())
    }
}

/// A key with the address of its value, as recorded in a segment key file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub key: Vec<u8>,
    pub address: Address,
    /// Length of the value in bytes (zero for legacy key files that do not record it)
    pub value_size: u32,
}

impl KeyRecord {
    pub fn new(key: Vec<u8>, address: Address, value_size: u32) -> Self {
        Self {
            key,
            address,
            value_size,
        }
    }
}

/// A key/value pair submitted for writing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KvPair {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Bytes this pair occupies in memory
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}
