//! Snapshot boundary files
//!
//! Each holds a single big-endian `u32` segment index. The upper bound is the
//! newest segment linked into the snapshot tree. The lower bound is written by
//! whatever consumes the snapshot and marks the newest segment it has already
//! pruned; segments at or below it are never linked again.

use crate::util::{atomic_write, ensure_dir, remove_if_exists};
use crate::{DriftError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const LOWER_BOUND_FILE: &str = "lower-bound.bin";
pub const UPPER_BOUND_FILE: &str = "upper-bound.bin";

#[derive(Debug)]
pub struct BoundaryFile {
    lower: bool,
    path: PathBuf,
    index: Option<u32>,
    fsync: bool,
}

impl BoundaryFile {
    /// Load the lower or upper bound file in `dir`. A missing file means no
    /// boundary has been recorded.
    pub fn load(lower: bool, dir: &Path, fsync: bool) -> Result<Self> {
        let name = if lower { LOWER_BOUND_FILE } else { UPPER_BOUND_FILE };
        let path = dir.join(name);

        let index = match fs::read(&path) {
            Ok(data) => {
                let bytes: [u8; 4] = data.as_slice().try_into().map_err(|_| {
                    DriftError::InvalidFormat(format!(
                        "boundary file {:?} is {} bytes, expected 4",
                        path,
                        data.len()
                    ))
                })?;
                Some(u32::from_be_bytes(bytes))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            lower,
            path,
            index,
            fsync,
        })
    }

    pub fn is_lower(&self) -> bool {
        self.lower
    }

    pub fn is_defined(&self) -> bool {
        self.index.is_some()
    }

    /// Recorded index, zero when undefined
    pub fn index(&self) -> u32 {
        self.index.unwrap_or(0)
    }

    pub fn update(&mut self, index: u32) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            ensure_dir(dir)?;
        }
        atomic_write(&self.path, &index.to_be_bytes(), self.fsync)?;
        self.index = Some(index);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delete(&mut self) -> Result<()> {
        remove_if_exists(&self.path)?;
        self.index = None;
        Ok(())
    }
}
