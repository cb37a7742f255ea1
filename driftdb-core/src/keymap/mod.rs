//! Key to address index
//!
//! The table only depends on the [`Keymap`] trait. Which implementation built
//! the index last time is recorded in a small JSON marker file so that a table
//! reopened with a different (or non-persistent) keymap rebuilds the index
//! from its segments.

mod mem;

pub use mem::MemKeymap;

use crate::util::{atomic_write, ensure_dir, remove_if_exists};
use crate::{Address, DriftError, KeyRecord, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory under `<root>/<table>/` reserved for keymap state
pub const KEYMAP_DIR: &str = "keymap";

/// Marker file naming the keymap implementation
pub const KEYMAP_TYPE_FILE: &str = "keymap-type.json";

/// Index from key to the address of its value
pub trait Keymap: Send + Sync {
    /// Insert a batch of keys
    fn put(&self, records: &[KeyRecord]) -> Result<()>;

    /// Look up the address of `key`
    fn get(&self, key: &[u8]) -> Result<Option<Address>>;

    /// Remove a batch of keys
    fn delete(&self, records: &[KeyRecord]) -> Result<()>;

    /// Flush and release resources. No calls follow except `destroy`.
    fn stop(&self) -> Result<()>;

    /// Remove all state the keymap keeps on disk
    fn destroy(&self) -> Result<()>;
}

/// Which keymap implementation a table uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum KeymapKind {
    /// In-memory index, rebuilt from the segments on every open
    #[default]
    Mem,
    /// Caller-supplied index that survives restarts on its own
    External(String),
}

impl KeymapKind {
    pub fn is_persistent(&self) -> bool {
        matches!(self, KeymapKind::External(_))
    }
}

/// The marker file recording which keymap kind built the current index
pub struct KeymapTypeFile {
    path: PathBuf,
}

impl KeymapTypeFile {
    pub fn new(keymap_dir: &Path) -> Self {
        Self {
            path: keymap_dir.join(KEYMAP_TYPE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded kind, or `None` if no marker exists
    pub fn load(&self) -> Result<Option<KeymapKind>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let kind = serde_json::from_slice(&data).map_err(|e| {
            DriftError::InvalidFormat(format!("keymap type file {:?}: {}", self.path, e))
        })?;
        Ok(Some(kind))
    }

    pub fn store(&self, kind: &KeymapKind, fsync: bool) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            ensure_dir(dir)?;
        }
        let data = serde_json::to_vec_pretty(kind)
            .map_err(|e| DriftError::Internal(format!("encoding keymap type: {}", e)))?;
        atomic_write(&self.path, &data, fsync)
    }

    pub fn delete(&self) -> Result<()> {
        remove_if_exists(&self.path)?;
        Ok(())
    }
}
