//! State shared between the table facade and its two loops

use crate::keymap::Keymap;
use crate::segment::{Segment, SegmentReservation};
use crate::table::TableMetadata;
use crate::util::FatalErrorHandler;
use crate::{KeyRecord, Result};
use crossbeam_skiplist::SkipMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) struct TableState {
    pub name: String,
    pub fatal: Arc<FatalErrorHandler>,
    pub keymap: Arc<dyn Keymap>,
    pub metadata: Arc<TableMetadata>,
    /// Values written but not yet visible through the keymap
    pub unflushed: SkipMap<Vec<u8>, Vec<u8>>,
    /// Live segments by index. Only the control loop inserts or removes.
    pub segments: RwLock<BTreeMap<u32, Arc<Segment>>>,
    pub size: AtomicU64,
    pub key_count: AtomicI64,
    pub lowest: AtomicU32,
    pub highest: AtomicU32,
}

impl TableState {
    /// Publish durable keys to the keymap, then drop them from the unflushed cache.
    ///
    /// The order matters: a reader that misses the cache must find the key in the keymap.
    pub fn write_keys_to_keymap(&self, records: &[KeyRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.keymap.put(records)?;
        for record in records {
            self.unflushed.remove(&record.key);
        }
        Ok(())
    }

    /// Reserve the segment with `index`, if it still exists
    pub fn reserve_segment(&self, index: u32) -> Option<SegmentReservation> {
        let segments = self.segments.read();
        segments.get(&index).and_then(|segment| segment.reserve_guard())
    }

    pub fn set_range(&self, lowest: u32, highest: u32) {
        self.lowest.store(lowest, Ordering::SeqCst);
        self.highest.store(highest, Ordering::SeqCst);
    }
}
