//! Per-shard value file: a log of `| length (4) | value |` records

use super::SegmentPath;
use crate::util::{check_file, remove_if_exists, sync_parent_dir};
use crate::{DriftError, Result};
use bytes::{BufMut, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const VALUE_FILE_EXTENSION: &str = "values";

pub struct ValueFile {
    index: u32,
    shard: u32,
    path: SegmentPath,
    file: Option<File>,
    fsync: bool,
}

impl ValueFile {
    pub fn file_name(index: u32, shard: u32) -> String {
        format!("{}-{}.{}", index, shard, VALUE_FILE_EXTENSION)
    }

    pub fn create(index: u32, shard: u32, path: SegmentPath, fsync: bool) -> Result<Self> {
        let file_path = path.file(&Self::file_name(index, shard));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&file_path)?;

        Ok(Self {
            index,
            shard,
            path,
            file: Some(file),
            fsync,
        })
    }

    /// Open an existing value file read-only. Returns the file and its size.
    pub fn load(index: u32, shard: u32, path: SegmentPath, fsync: bool) -> Result<(Self, u64)> {
        let file_path = path.file(&Self::file_name(index, shard));
        let size = check_file(&file_path)?.ok_or_else(|| DriftError::MissingFile {
            index,
            kind: format!("shard {} {}", shard, VALUE_FILE_EXTENSION),
        })?;

        let value_file = Self {
            index,
            shard,
            path,
            file: None,
            fsync,
        };
        Ok((value_file, size))
    }

    /// Append a record to `buf`, returning the number of bytes added
    pub fn encode_record(value: &[u8], buf: &mut BytesMut) -> usize {
        buf.put_u32(value.len() as u32);
        buf.put_slice(value);
        4 + value.len()
    }

    /// Read the value whose length prefix starts at `offset`
    pub fn read(path: &Path, offset: u32) -> Result<Vec<u8>> {
        let mut file = File::open(path)?;
        let len = Self::read_length(&mut file, u64::from(offset))?;

        let mut value = vec![0u8; len as usize];
        file.read_exact(&mut value).map_err(|e| truncated(e, path, offset))?;
        Ok(value)
    }

    /// Read the 4-byte length prefix at `offset`
    pub fn read_length(file: &mut File, offset: u64) -> Result<u32> {
        file.seek(SeekFrom::Start(offset))?;
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                DriftError::Corruption(format!("no value record at offset {}", offset))
            } else {
                e.into()
            }
        })?;
        Ok(u32::from_be_bytes(len_buf))
    }

    /// Append already-encoded records to disk
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or_else(|| {
            DriftError::Internal(format!(
                "value file {} of segment {} is not writable",
                self.shard, self.index
            ))
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

    pub fn file_path(&self) -> PathBuf {
        self.path.file(&Self::file_name(self.index, self.shard))
    }

    pub fn shard(&self) -> u32 {
        self.shard
    }

    pub fn snapshot(&self) -> Result<()> {
        self.path.snapshot_file(&Self::file_name(self.index, self.shard))
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

fn truncated(e: std::io::Error, path: &Path, offset: u32) -> DriftError {
    if e.kind() == ErrorKind::UnexpectedEof {
        DriftError::Corruption(format!(
            "value record at offset {} in {:?} is truncated",
            offset, path
        ))
    } else {
        e.into()
    }
}
