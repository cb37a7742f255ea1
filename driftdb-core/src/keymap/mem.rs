//! In-memory keymap

use super::Keymap;
use crate::{Address, DriftError, KeyRecord, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// A keymap held entirely in memory. It is rebuilt from the segment key
/// files every time a table opens.
#[derive(Default)]
pub struct MemKeymap {
    entries: RwLock<HashMap<Vec<u8>, Address>>,
    stopped: AtomicBool,
}

impl MemKeymap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(DriftError::Keymap("keymap is stopped".into()));
        }
        Ok(())
    }
}

impl Keymap for MemKeymap {
    fn put(&self, records: &[KeyRecord]) -> Result<()> {
        self.check_running()?;
        let mut entries = self.entries.write();
        for record in records {
            entries.insert(record.key.clone(), record.address);
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Address>> {
        self.check_running()?;
        Ok(self.entries.read().get(key).copied())
    }

    fn delete(&self, records: &[KeyRecord]) -> Result<()> {
        self.check_running()?;
        let mut entries = self.entries.write();
        for record in records {
            entries.remove(&record.key);
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.entries.write().clear();
        Ok(())
    }
}
