//! Filesystem helpers

use crate::{DriftError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Extension appended to a file while its replacement is being written
pub const SWAP_EXTENSION: &str = "swap";

/// Path of the swap file used when atomically replacing `path`
pub fn swap_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(SWAP_EXTENSION);
    PathBuf::from(name)
}

/// Replace the contents of `path` so readers see either the old or the new
/// bytes, never a mix.
///
/// The data goes to `<path>.swap` first and is then renamed over `path`.
/// A crash can leave a stray swap file behind; the scanner deletes those.
pub fn atomic_write(path: &Path, data: &[u8], fsync: bool) -> Result<()> {
    let swap = swap_path(path);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&swap)?;
        file.write_all(data)?;
        if fsync {
            file.sync_all()?;
        }
    }
    atomic_rename(&swap, path, fsync)
}

/// Rename `from` to `to`, making the rename durable when `fsync` is set
pub fn atomic_rename(from: &Path, to: &Path, fsync: bool) -> Result<()> {
    fs::rename(from, to)?;
    if fsync {
        sync_parent_dir(to)?;
    }
    Ok(())
}

/// Fsync the directory holding `path` so a create/rename/unlink in it survives a crash
pub fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}

/// Inspect a file the engine expects to own.
///
/// Returns `None` if it does not exist and its length if it is a regular,
/// writable file. Anything else is reported as corruption.
pub fn check_file(path: &Path) -> Result<Option<u64>> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if meta.is_dir() {
        return Err(DriftError::Corruption(format!(
            "{:?} is a directory, expected a file",
            path
        )));
    }
    if meta.permissions().readonly() {
        return Err(DriftError::Corruption(format!("{:?} is not writable", path)));
    }

    Ok(Some(meta.len()))
}

/// Create a directory and its parents if missing
pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.exists() && !path.is_dir() {
        return Err(DriftError::Config(format!(
            "{:?} exists and is not a directory",
            path
        )));
    }
    fs::create_dir_all(path)?;
    Ok(())
}

/// Remove a file, returning whether it existed
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Recursively remove a directory, returning whether it existed
pub fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
