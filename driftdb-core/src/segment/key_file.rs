//! Segment key file
//!
//! Records are appended in write order:
//!
//! ```text
//! | key length (4) | key | address (8) | value length (4, V1 and later) |
//! ```
//!
//! A crash can leave a partial record at the tail of the mutable segment's
//! key file. Readers stop at the first incomplete record.

use super::{SegmentPath, SegmentVersion};
use crate::util::{atomic_write, check_file, remove_if_exists, sync_parent_dir};
use crate::{Address, DriftError, KeyRecord, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const KEY_FILE_EXTENSION: &str = "keys";

pub struct KeyFile {
    index: u32,
    version: SegmentVersion,
    path: SegmentPath,
    file: Option<File>,
    fsync: bool,
}

impl KeyFile {
    pub fn file_name(index: u32) -> String {
        format!("{}.{}", index, KEY_FILE_EXTENSION)
    }

    /// Create an empty key file open for appending
    pub fn create(index: u32, version: SegmentVersion, path: SegmentPath, fsync: bool) -> Result<Self> {
        let file_path = path.file(&Self::file_name(index));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&file_path)?;

        Ok(Self {
            index,
            version,
            path,
            file: Some(file),
            fsync,
        })
    }

    /// Open an existing key file read-only. Returns the file and its size.
    pub fn load(index: u32, version: SegmentVersion, path: SegmentPath, fsync: bool) -> Result<(Self, u64)> {
        let file_path = path.file(&Self::file_name(index));
        let size = check_file(&file_path)?.ok_or_else(|| DriftError::MissingFile {
            index,
            kind: KEY_FILE_EXTENSION.to_string(),
        })?;

        let key_file = Self {
            index,
            version,
            path,
            file: None,
            fsync,
        };
        Ok((key_file, size))
    }

    /// Append a record to `buf`, returning the number of bytes added
    pub fn encode_record(record: &KeyRecord, version: SegmentVersion, buf: &mut BytesMut) -> usize {
        let before = buf.len();
        buf.put_u32(record.key.len() as u32);
        buf.put_slice(&record.key);
        buf.put_u64(record.address.raw());
        if version.has_value_size() {
            buf.put_u32(record.value_size);
        }
        buf.len() - before
    }

    /// Decode one record from the front of `data`.
    ///
    /// Returns `None` if `data` holds only part of a record.
    pub fn decode_record(data: &[u8], version: SegmentVersion) -> Option<(KeyRecord, usize)> {
        let mut buf = data;
        if buf.remaining() < 4 {
            return None;
        }
        let key_len = buf.get_u32() as usize;
        let trailer = if version.has_value_size() { 12 } else { 8 };
        if buf.remaining() < key_len + trailer {
            return None;
        }

        let key = buf[..key_len].to_vec();
        buf.advance(key_len);
        let address = Address::from_raw(buf.get_u64());
        let value_size = if version.has_value_size() {
            buf.get_u32()
        } else {
            0
        };

        Some((KeyRecord::new(key, address, value_size), 4 + key_len + trailer))
    }

    /// Read every complete record in the file at `path`
    pub fn read_records(path: &Path, version: SegmentVersion) -> Result<Vec<KeyRecord>> {
        let data = fs::read(path)?;
        let mut records = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            match Self::decode_record(&data[offset..], version) {
                Some((record, used)) => {
                    records.push(record);
                    offset += used;
                }
                None => {
                    warn!(
                        "Key file {:?} has {} partial bytes at its end, ignoring them",
                        path,
                        data.len() - offset
                    );
                    break;
                }
            }
        }

        Ok(records)
    }

    /// Read every complete record in this key file
    pub fn read_keys(&self) -> Result<Vec<KeyRecord>> {
        Self::read_records(&self.file_path(), self.version)
    }

    /// Append already-encoded records to disk
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or_else(|| {
            DriftError::Internal(format!("key file for segment {} is not writable", self.index))
        })?;
        file.write_all(data)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
            if self.fsync {
                file.sync_data()?;
            }
        }
        Ok(())
    }

    /// Sync and close the write handle
    pub fn seal(&mut self) -> Result<()> {
        self.sync()?;
        self.file = None;
        Ok(())
    }

    /// Atomically replace the file contents with `records`, returning the new size.
    ///
    /// The new content goes to `{index}.keys.swap` and is renamed into place.
    pub fn rewrite(&mut self, records: &[KeyRecord]) -> Result<u64> {
        let mut buf = BytesMut::new();
        for record in records {
            Self::encode_record(record, self.version, &mut buf);
        }
        atomic_write(&self.file_path(), &buf, self.fsync)?;
        Ok(buf.len() as u64)
    }

    pub fn file_path(&self) -> PathBuf {
        self.path.file(&Self::file_name(self.index))
    }

    pub fn snapshot(&self) -> Result<()> {
        self.path.snapshot_file(&Self::file_name(self.index))
    }

    pub fn delete(&mut self) -> Result<()> {
        self.file = None;
        let file = self.file_path();
        if remove_if_exists(&file)? && self.fsync {
            sync_parent_dir(&file)?;
        }
        Ok(())
    }
}
