//! Segment storage
//!
//! A segment is the unit of append-only storage. It owns a file trio:
//!
//! - **Metadata** (`{index}.metadata`): version, sharding factor, salt, seal time, sealed flag
//! - **Key file** (`{index}.keys`): key records in write order
//! - **Value files** (`{index}-{shard}.values`): one length-prefixed value log per shard
//!
//! Only the highest-indexed segment accepts writes. Sealing is one-way.
//! Segments are deleted strictly in ascending index order, enforced by each
//! segment holding a reservation on its successor.

mod key_file;
mod metadata;
mod path;
mod scanner;
#[allow(clippy::module_inception)]
mod segment;
mod shard;
mod value_file;

pub use key_file::{KeyFile, KEY_FILE_EXTENSION};
pub use metadata::{SegmentMetadata, METADATA_FILE_EXTENSION, METADATA_SIZE};
pub use path::{SegmentPath, SEGMENTS_DIR, SNAPSHOT_DIR};
pub use scanner::{scan_segments, ScanResult};
pub use segment::{Segment, SegmentReservation, WriteStats};
pub use shard::{root_for_shard, shard_for};
pub use value_file::{ValueFile, VALUE_FILE_EXTENSION};

use crate::{DriftError, Result};

/// On-disk format version of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SegmentVersion {
    /// Key records carry no value length
    V0,
    /// Key records end with the 4-byte value length
    V1,
}

impl SegmentVersion {
    /// Version written for new segments
    pub const LATEST: SegmentVersion = SegmentVersion::V1;

    pub fn as_u32(self) -> u32 {
        match self {
            SegmentVersion::V0 => 0,
            SegmentVersion::V1 => 1,
        }
    }

    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(SegmentVersion::V0),
            1 => Ok(SegmentVersion::V1),
            other => Err(DriftError::InvalidFormat(format!(
                "unsupported segment version {}",
                other
            ))),
        }
    }

    /// Whether key records written in this version store the value length
    pub fn has_value_size(self) -> bool {
        self >= SegmentVersion::V1
    }
}
