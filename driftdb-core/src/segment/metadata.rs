//! Segment metadata file
//!
//! Fixed 21-byte big-endian layout:
//!
//! ```text
//! | version (4) | sharding factor (4) | salt (4) | seal timestamp ns (8) | sealed (1) |
//! ```

use super::{SegmentPath, SegmentVersion};
use crate::util::{atomic_write, remove_if_exists, sync_parent_dir};
use crate::{DriftError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fs;
use std::path::PathBuf;

pub const METADATA_FILE_EXTENSION: &str = "metadata";

/// Serialized size of a metadata file
pub const METADATA_SIZE: usize = 21;

#[derive(Debug, Clone)]
pub struct SegmentMetadata {
    index: u32,
    version: SegmentVersion,
    sharding_factor: u32,
    salt: u32,
    seal_time: u64,
    sealed: bool,
    path: SegmentPath,
    fsync: bool,
}

impl SegmentMetadata {
    pub fn file_name(index: u32) -> String {
        format!("{}.{}", index, METADATA_FILE_EXTENSION)
    }

    /// Create and persist metadata for a brand new, unsealed segment
    pub fn create(
        index: u32,
        version: SegmentVersion,
        sharding_factor: u32,
        salt: u32,
        path: SegmentPath,
        fsync: bool,
    ) -> Result<Self> {
        if sharding_factor == 0 {
            return Err(DriftError::InvalidArgument(
                "sharding factor must be at least 1".into(),
            ));
        }

        let metadata = Self {
            index,
            version,
            sharding_factor,
            salt,
            seal_time: 0,
            sealed: false,
            path,
            fsync,
        };

        if metadata.file_path().exists() {
            return Err(DriftError::Corruption(format!(
                "metadata file {:?} already exists",
                metadata.file_path()
            )));
        }
        metadata.write()?;
        Ok(metadata)
    }

    /// Load the metadata of segment `index` from `path`
    pub fn load(index: u32, path: SegmentPath, fsync: bool) -> Result<Self> {
        let file = path.file(&Self::file_name(index));
        let data = fs::read(&file)?;
        Self::deserialize(index, &data, path, fsync)
    }

    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(METADATA_SIZE);
        buf.put_u32(self.version.as_u32());
        buf.put_u32(self.sharding_factor);
        buf.put_u32(self.salt);
        buf.put_u64(self.seal_time);
        buf.put_u8(u8::from(self.sealed));
        buf
    }

    pub fn deserialize(index: u32, data: &[u8], path: SegmentPath, fsync: bool) -> Result<Self> {
        if data.len() != METADATA_SIZE {
            return Err(DriftError::InvalidFormat(format!(
                "metadata for segment {} is {} bytes, expected {}",
                index,
                data.len(),
                METADATA_SIZE
            )));
        }

        let mut buf = data;
        let version = SegmentVersion::from_u32(buf.get_u32())?;
        let sharding_factor = buf.get_u32();
        let salt = buf.get_u32();
        let seal_time = buf.get_u64();
        let sealed = match buf.get_u8() {
            0 => false,
            1 => true,
            other => {
                return Err(DriftError::InvalidFormat(format!(
                    "invalid sealed flag {} in metadata for segment {}",
                    other, index
                )))
            }
        };

        if sharding_factor == 0 {
            return Err(DriftError::InvalidFormat(format!(
                "segment {} has a sharding factor of 0",
                index
            )));
        }

        Ok(Self {
            index,
            version,
            sharding_factor,
            salt,
            seal_time,
            sealed,
            path,
            fsync,
        })
    }

    /// Mark the segment sealed at `now` (nanoseconds since the epoch)
    pub fn seal(&mut self, now: u64) -> Result<()> {
        self.sealed = true;
        self.seal_time = now;
        self.write()
    }

    fn write(&self) -> Result<()> {
        atomic_write(&self.file_path(), &self.serialize(), self.fsync)
    }

    pub fn file_path(&self) -> PathBuf {
        self.path.file(&Self::file_name(self.index))
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn version(&self) -> SegmentVersion {
        self.version
    }

    pub fn sharding_factor(&self) -> u32 {
        self.sharding_factor
    }

    pub fn salt(&self) -> u32 {
        self.salt
    }

    pub fn seal_time(&self) -> u64 {
        self.seal_time
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn path(&self) -> &SegmentPath {
        &self.path
    }

    pub fn size(&self) -> u64 {
        METADATA_SIZE as u64
    }

    pub fn snapshot(&self) -> Result<()> {
        self.path.snapshot_file(&Self::file_name(self.index))
    }

    pub fn delete(&self) -> Result<()> {
        let file = self.file_path();
        if remove_if_exists(&file)? && self.fsync {
            sync_parent_dir(&file)?;
        }
        Ok(())
    }
}
