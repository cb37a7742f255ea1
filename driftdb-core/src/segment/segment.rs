//! Segment lifecycle: append, flush, seal, reserve/release, ordered deletion

use super::{
    root_for_shard, shard_for, KeyFile, SegmentMetadata, SegmentPath, SegmentVersion, ValueFile,
    METADATA_SIZE,
};
use crate::util::FatalErrorHandler;
use crate::{Address, DriftError, KeyRecord, KvPair, Result};
use bytes::BytesMut;
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// What the control loop needs to know after a write to decide whether the
/// segment is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    pub address: Address,
    pub key_count: u32,
    pub key_file_size: u64,
    pub max_shard_size: u64,
}

/// Buffered writes and size counters. Held only briefly.
struct WriteState {
    shard_sizes: Vec<u64>,
    key_file_size: u64,
    key_count: u32,
    pending_values: Vec<BytesMut>,
    pending_keys: BytesMut,
    unflushed: Vec<KeyRecord>,
}

/// File handles. Held for the duration of flush I/O.
struct SegmentFiles {
    metadata: SegmentMetadata,
    keys: KeyFile,
    values: Vec<ValueFile>,
}

pub struct Segment {
    index: u32,
    version: SegmentVersion,
    sharding_factor: u32,
    salt: u32,
    key_path: PathBuf,
    shard_paths: Vec<PathBuf>,

    state: RwLock<WriteState>,
    files: Mutex<SegmentFiles>,
    sealed: AtomicBool,
    seal_time: AtomicU64,

    reservations: AtomicI32,
    next: Mutex<Option<Arc<Segment>>>,
    deleted_tx: Mutex<Option<Sender<()>>>,
    deleted_rx: Receiver<()>,
    fatal: Arc<FatalErrorHandler>,
}

impl Segment {
    /// Create a new, empty, mutable segment.
    ///
    /// Metadata and keys go to `paths[0]`; shard `s` goes to
    /// `paths[(s + 1) % paths.len()]`.
    pub fn create(
        index: u32,
        paths: &[SegmentPath],
        sharding_factor: u32,
        salt: u32,
        fatal: Arc<FatalErrorHandler>,
        fsync: bool,
    ) -> Result<Arc<Self>> {
        if paths.is_empty() {
            return Err(DriftError::Config("no storage roots configured".into()));
        }

        let version = SegmentVersion::LATEST;
        let metadata =
            SegmentMetadata::create(index, version, sharding_factor, salt, paths[0].clone(), fsync)?;
        let keys = KeyFile::create(index, version, paths[0].clone(), fsync)?;
        let mut values = Vec::with_capacity(sharding_factor as usize);
        for shard in 0..sharding_factor {
            let root = root_for_shard(shard, paths.len());
            values.push(ValueFile::create(index, shard, paths[root].clone(), fsync)?);
        }

        let shard_sizes = vec![0; sharding_factor as usize];
        debug!("Created segment {} with {} shards", index, sharding_factor);
        Ok(Arc::new(Self::assemble(
            metadata,
            keys,
            values,
            shard_sizes,
            0,
            0,
            fatal,
        )))
    }

    /// Load an existing segment.
    ///
    /// A segment that was never sealed belongs to a process that stopped
    /// uncleanly. Its keys are checked against the value files, keys whose
    /// value did not fully reach disk are dropped, and the segment is sealed
    /// with `now` as its seal time.
    pub fn load(
        index: u32,
        paths: &[SegmentPath],
        now: u64,
        fatal: Arc<FatalErrorHandler>,
        fsync: bool,
    ) -> Result<Arc<Self>> {
        if paths.is_empty() {
            return Err(DriftError::Config("no storage roots configured".into()));
        }

        let mut metadata = SegmentMetadata::load(index, paths[0].clone(), fsync)?;
        let version = metadata.version();
        let (mut keys, mut key_file_size) = KeyFile::load(index, version, paths[0].clone(), fsync)?;

        let sharding_factor = metadata.sharding_factor();
        let mut values = Vec::with_capacity(sharding_factor as usize);
        let mut shard_sizes = Vec::with_capacity(sharding_factor as usize);
        for shard in 0..sharding_factor {
            let root = root_for_shard(shard, paths.len());
            let (value_file, size) = ValueFile::load(index, shard, paths[root].clone(), fsync)?;
            values.push(value_file);
            shard_sizes.push(size);
        }

        let records = keys.read_keys()?;
        let key_count = if metadata.is_sealed() {
            records.len()
        } else {
            let total = records.len();
            let valid = Self::recover_keys(&metadata, records, &values, &shard_sizes)?;
            let expected_size: u64 = valid
                .iter()
                .map(|r| KeyFile::encode_record(r, version, &mut BytesMut::new()) as u64)
                .sum();
            if expected_size != key_file_size {
                warn!(
                    "Segment {} was not sealed cleanly, keeping {} of {} keys",
                    index,
                    valid.len(),
                    total
                );
                key_file_size = keys.rewrite(&valid)?;
            }
            metadata.seal(now)?;
            info!("Sealed segment {} during recovery", index);
            valid.len()
        };

        Ok(Arc::new(Self::assemble(
            metadata,
            keys,
            values,
            shard_sizes,
            key_file_size,
            key_count as u32,
            fatal,
        )))
    }

    /// Keep only the keys whose value record is fully present and agrees with
    /// the key's recorded length.
    fn recover_keys(
        metadata: &SegmentMetadata,
        records: Vec<KeyRecord>,
        values: &[ValueFile],
        shard_sizes: &[u64],
    ) -> Result<Vec<KeyRecord>> {
        let index = metadata.index();
        let check_length = metadata.version().has_value_size();
        let mut files = values
            .iter()
            .map(|v| File::open(v.file_path()))
            .collect::<std::io::Result<Vec<_>>>()?;

        let mut valid = Vec::with_capacity(records.len());
        for record in records {
            if record.address.index() != index {
                warn!(
                    "Key in segment {} points at segment {}, dropping it",
                    index,
                    record.address.index()
                );
                continue;
            }

            let shard = shard_for(&record.key, metadata.salt(), metadata.sharding_factor()) as usize;
            let offset = u64::from(record.address.offset());
            let size = shard_sizes[shard];
            if offset + 4 > size {
                continue;
            }

            let len = ValueFile::read_length(&mut files[shard], offset)?;
            if offset + 4 + u64::from(len) > size {
                continue;
            }
            if check_length && len != record.value_size {
                warn!(
                    "Value at {} in segment {} has length {} but its key records {}",
                    record.address, index, len, record.value_size
                );
                continue;
            }
            valid.push(record);
        }
        Ok(valid)
    }

    fn assemble(
        metadata: SegmentMetadata,
        keys: KeyFile,
        values: Vec<ValueFile>,
        shard_sizes: Vec<u64>,
        key_file_size: u64,
        key_count: u32,
        fatal: Arc<FatalErrorHandler>,
    ) -> Self {
        let (deleted_tx, deleted_rx) = bounded(0);
        let state = WriteState {
            pending_values: (0..values.len()).map(|_| BytesMut::new()).collect(),
            pending_keys: BytesMut::new(),
            shard_sizes,
            key_file_size,
            key_count,
            unflushed: Vec::new(),
        };

        Self {
            index: metadata.index(),
            version: metadata.version(),
            sharding_factor: metadata.sharding_factor(),
            salt: metadata.salt(),
            key_path: keys.file_path(),
            shard_paths: values.iter().map(|v| v.file_path()).collect(),
            state: RwLock::new(state),
            sealed: AtomicBool::new(metadata.is_sealed()),
            seal_time: AtomicU64::new(metadata.seal_time()),
            files: Mutex::new(SegmentFiles {
                metadata,
                keys,
                values,
            }),
            reservations: AtomicI32::new(1),
            next: Mutex::new(None),
            deleted_tx: Mutex::new(Some(deleted_tx)),
            deleted_rx,
            fatal,
        }
    }

    /// Buffer a key/value pair. Nothing reaches disk until `flush`.
    pub fn write(&self, pair: &KvPair) -> Result<WriteStats> {
        if self.is_sealed() {
            return Err(DriftError::Internal(format!(
                "segment {} is sealed",
                self.index
            )));
        }

        let shard = shard_for(&pair.key, self.salt, self.sharding_factor);
        let mut state = self.state.write();

        let offset = state.shard_sizes[shard as usize];
        if offset > u64::from(u32::MAX) {
            return Err(DriftError::AddressOverflow {
                index: self.index,
                shard,
                offset,
            });
        }
        let address = Address::new(self.index, offset as u32);

        let written = ValueFile::encode_record(&pair.value, &mut state.pending_values[shard as usize]);
        state.shard_sizes[shard as usize] += written as u64;

        let record = KeyRecord::new(pair.key.clone(), address, pair.value.len() as u32);
        let written = KeyFile::encode_record(&record, self.version, &mut state.pending_keys);
        state.key_file_size += written as u64;
        state.key_count += 1;
        state.unflushed.push(record);

        Ok(WriteStats {
            address,
            key_count: state.key_count,
            key_file_size: state.key_file_size,
            max_shard_size: state.shard_sizes.iter().copied().max().unwrap_or(0),
        })
    }

    /// Read the value stored for `key` at `address`.
    ///
    /// Only addresses that have been flushed are readable; callers keep
    /// unflushed values in memory.
    pub fn read(&self, key: &[u8], address: Address) -> Result<Vec<u8>> {
        if address.index() != self.index {
            return Err(DriftError::Internal(format!(
                "address {} does not belong to segment {}",
                address, self.index
            )));
        }
        let shard = shard_for(key, self.salt, self.sharding_factor) as usize;
        ValueFile::read(&self.shard_paths[shard], address.offset())
    }

    /// Write buffered records to disk and return the keys that became durable.
    ///
    /// Value records are written before key records so a key on disk never
    /// points past the end of its value file after a clean flush.
    pub fn flush(&self) -> Result<Vec<KeyRecord>> {
        if self.is_sealed() {
            return Ok(Vec::new());
        }

        let mut files = self.files.lock();
        let (values, keys, records) = {
            let mut state = self.state.write();
            let values: Vec<BytesMut> = state.pending_values.iter_mut().map(|b| b.split()).collect();
            let keys = state.pending_keys.split();
            let records = std::mem::take(&mut state.unflushed);
            (values, keys, records)
        };

        if records.is_empty() {
            return Ok(records);
        }

        for (value_file, data) in files.values.iter_mut().zip(values.iter()) {
            if !data.is_empty() {
                value_file.write_all(data)?;
                value_file.sync()?;
            }
        }
        files.keys.write_all(&keys)?;
        files.keys.sync()?;

        Ok(records)
    }

    /// Flush, close the write handles, and persist the sealed flag with
    /// `now` as the seal time. Returns the keys made durable by the final flush.
    pub fn seal(&self, now: u64) -> Result<Vec<KeyRecord>> {
        if self.is_sealed() {
            return Err(DriftError::Internal(format!(
                "segment {} is already sealed",
                self.index
            )));
        }

        let records = self.flush()?;

        let mut files = self.files.lock();
        files.keys.seal()?;
        for value_file in files.values.iter_mut() {
            value_file.seal()?;
        }
        files.metadata.seal(now)?;

        self.seal_time.store(now, Ordering::SeqCst);
        self.sealed.store(true, Ordering::SeqCst);
        debug!("Sealed segment {}", self.index);

        Ok(records)
    }

    /// Every key in a sealed segment
    pub fn get_keys(&self) -> Result<Vec<KeyRecord>> {
        if !self.is_sealed() {
            return Err(DriftError::Internal(format!(
                "cannot list keys of unsealed segment {}",
                self.index
            )));
        }
        KeyFile::read_records(&self.key_path, self.version)
    }

    /// Hard-link and symlink the sealed files into the snapshot directories
    pub fn snapshot(&self) -> Result<()> {
        if !self.is_sealed() {
            return Err(DriftError::Internal(format!(
                "cannot snapshot unsealed segment {}",
                self.index
            )));
        }
        let files = self.files.lock();
        files.metadata.snapshot()?;
        files.keys.snapshot()?;
        for value_file in &files.values {
            value_file.snapshot()?;
        }
        Ok(())
    }

    /// Take a reservation. Fails once the segment has been released for deletion.
    pub fn reserve(&self) -> bool {
        let mut current = self.reservations.load(Ordering::SeqCst);
        loop {
            if current <= 0 {
                return false;
            }
            match self.reservations.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Take a reservation that is released when the guard drops
    pub fn reserve_guard(self: &Arc<Self>) -> Option<SegmentReservation> {
        if self.reserve() {
            Some(SegmentReservation {
                segment: self.clone(),
            })
        } else {
            None
        }
    }

    /// Drop a reservation. The last release deletes the segment's files on a
    /// background thread and then releases the successor.
    pub fn release(self: &Arc<Self>) {
        let remaining = self.reservations.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining > 0 {
            return;
        }
        if remaining < 0 {
            self.fatal.panic(DriftError::Internal(format!(
                "segment {} has negative reservation count {}",
                self.index, remaining
            )));
            return;
        }

        let segment = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("segment-delete-{}", self.index))
            .spawn(move || segment.delete_and_release_next());
        if let Err(e) = spawned {
            self.fatal.panic(e.into());
        }
    }

    fn delete_and_release_next(&self) {
        if let Err(e) = self.delete_files() {
            self.fatal.panic(e);
            return;
        }
        self.deleted_tx.lock().take();

        let next = self.next.lock().take();
        if let Some(next) = next {
            next.release();
        }
    }

    fn delete_files(&self) -> Result<()> {
        let mut files = self.files.lock();
        files.keys.delete()?;
        for value_file in files.values.iter_mut() {
            value_file.delete()?;
        }
        files.metadata.delete()?;
        info!("Deleted segment {}", self.index);
        Ok(())
    }

    /// Link `next` behind this segment. This segment holds a reservation on
    /// `next` until it has been deleted itself.
    pub fn set_next(&self, next: Arc<Segment>) -> Result<()> {
        if !next.reserve() {
            return Err(DriftError::Internal(format!(
                "segment {} was released before it could be linked behind segment {}",
                next.index, self.index
            )));
        }
        let previous = self.next.lock().replace(next);
        if let Some(previous) = previous {
            self.fatal.panic(DriftError::Internal(format!(
                "segment {} was already linked to segment {}",
                self.index, previous.index
            )));
        }
        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.deleted_rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block until this segment's files are gone
    pub fn block_until_deleted(&self) -> Result<()> {
        select! {
            recv(self.deleted_rx) -> _ => Ok(()),
            recv(self.fatal.signal()) -> _ => {
                if self.is_deleted() {
                    Ok(())
                } else {
                    Err(self.fatal.error())
                }
            }
        }
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

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Seal time in nanoseconds since the epoch, zero while mutable
    pub fn seal_time(&self) -> u64 {
        self.seal_time.load(Ordering::SeqCst)
    }

    /// Bytes on disk once everything buffered has been flushed
    pub fn size(&self) -> u64 {
        let state = self.state.read();
        METADATA_SIZE as u64 + state.key_file_size + state.shard_sizes.iter().sum::<u64>()
    }

    pub fn key_count(&self) -> u32 {
        self.state.read().key_count
    }

    pub fn reservation_count(&self) -> i32 {
        self.reservations.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("index", &self.index)
            .field("sharding_factor", &self.sharding_factor)
            .field("sealed", &self.is_sealed())
            .field("reservations", &self.reservation_count())
            .finish()
    }
}

/// A held reservation on a segment
pub struct SegmentReservation {
    segment: Arc<Segment>,
}

impl Deref for SegmentReservation {
    type Target = Segment;

    fn deref(&self) -> &Segment {
        &self.segment
    }
}

impl Drop for SegmentReservation {
    fn drop(&mut self) {
        self.segment.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::time::Duration;
    use tempfile::TempDir;

    fn paths(temp_dir: &TempDir, roots: usize) -> Vec<SegmentPath> {
        let roots: Vec<PathBuf> = (0..roots)
            .map(|i| temp_dir.path().join(format!("root-{}", i)))
            .collect();
        let paths = SegmentPath::build(&roots, None, "table");
        for path in &paths {
            path.ensure_dirs().unwrap();
        }
        paths
    }

    fn pair(i: usize) -> KvPair {
        KvPair::new(format!("key-{}", i), format!("value-{}-{}", i, "x".repeat(i % 7)))
    }

    #[test]
    fn test_write_flush_read() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir, 2);
        let fatal = Arc::new(FatalErrorHandler::new());
        let segment = Segment::create(0, &paths, 4, 99, fatal, true).unwrap();

        let mut addresses = Vec::new();
        for i in 0..100 {
            let stats = segment.write(&pair(i)).unwrap();
            assert_eq!(stats.key_count, i as u32 + 1);
            assert_eq!(stats.address.index(), 0);
            addresses.push(stats.address);
        }

        let durable = segment.flush().unwrap();
        assert_eq!(durable.len(), 100);
        assert_eq!(durable[7].address, addresses[7]);
        assert!(segment.flush().unwrap().is_empty());

        for (i, address) in addresses.iter().enumerate() {
            assert_eq!(segment.read(&pair(i).key, *address).unwrap(), pair(i).value);
        }
        assert_eq!(segment.key_count(), 100);
    }

    #[test]
    fn test_value_files_spread_over_roots() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir, 3);
        let fatal = Arc::new(FatalErrorHandler::new());
        Segment::create(4, &paths, 3, 1, fatal, false).unwrap();

        assert!(paths[0].file("4.metadata").exists());
        assert!(paths[0].file("4.keys").exists());
        assert!(paths[1].file("4-0.values").exists());
        assert!(paths[2].file("4-1.values").exists());
        assert!(paths[0].file("4-2.values").exists());
    }

    #[test]
    fn test_seal_and_get_keys() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir, 1);
        let fatal = Arc::new(FatalErrorHandler::new());
        let segment = Segment::create(0, &paths, 2, 7, fatal.clone(), true).unwrap();

        for i in 0..10 {
            segment.write(&pair(i)).unwrap();
        }
        assert!(segment.get_keys().is_err());

        let durable = segment.seal(1_000).unwrap();
        assert_eq!(durable.len(), 10);
        assert!(segment.is_sealed());
        assert_eq!(segment.seal_time(), 1_000);
        assert!(segment.write(&pair(11)).is_err());
        assert!(segment.seal(2_000).is_err());

        let keys = segment.get_keys().unwrap();
        assert_eq!(keys.len(), 10);
        assert_eq!(keys[0].key, pair(0).key);
        assert_eq!(keys[0].value_size, pair(0).value.len() as u32);

        let size_before = segment.size();
        drop(segment);

        let loaded = Segment::load(0, &paths, 5_000, fatal, true).unwrap();
        assert!(loaded.is_sealed());
        assert_eq!(loaded.seal_time(), 1_000);
        assert_eq!(loaded.key_count(), 10);
        assert_eq!(loaded.size(), size_before);
        for key in loaded.get_keys().unwrap() {
            let i: usize = std::str::from_utf8(&key.key).unwrap()[4..].parse().unwrap();
            assert_eq!(loaded.read(&key.key, key.address).unwrap(), pair(i).value);
        }
    }

    #[test]
    fn test_load_unsealed_drops_incomplete_values() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir, 1);
        let fatal = Arc::new(FatalErrorHandler::new());
        let segment = Segment::create(3, &paths, 1, 0, fatal.clone(), false).unwrap();

        for i in 0..20 {
            segment.write(&pair(i)).unwrap();
        }
        segment.flush().unwrap();
        drop(segment);

        // lose the tail of the last value
        let value_path = paths[0].file("3-0.values");
        let len = std::fs::metadata(&value_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&value_path).unwrap();
        file.set_len(len - 2).unwrap();

        let loaded = Segment::load(3, &paths, 42, fatal, false).unwrap();
        assert!(loaded.is_sealed());
        assert_eq!(loaded.seal_time(), 42);
        assert_eq!(loaded.key_count(), 19);

        let keys = loaded.get_keys().unwrap();
        assert_eq!(keys.len(), 19);
        assert_eq!(keys.last().unwrap().key, pair(18).key);
        assert!(!crate::util::swap_path(&paths[0].file("3.keys")).exists());
    }

    #[test]
    fn test_load_unsealed_trims_partial_key_record() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir, 1);
        let fatal = Arc::new(FatalErrorHandler::new());
        let segment = Segment::create(0, &paths, 2, 5, fatal.clone(), false).unwrap();
        for i in 0..5 {
            segment.write(&pair(i)).unwrap();
        }
        segment.flush().unwrap();
        drop(segment);

        let key_path = paths[0].file("0.keys");
        let len = std::fs::metadata(&key_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&key_path).unwrap();
        file.set_len(len - 3).unwrap();

        let loaded = Segment::load(0, &paths, 1, fatal, false).unwrap();
        assert_eq!(loaded.key_count(), 4);
        let trimmed = std::fs::metadata(&key_path).unwrap().len();
        let record_len = (4 + pair(4).key.len() + 12) as u64;
        assert_eq!(trimmed, len - record_len);
    }

    #[test]
    fn test_reserve_release_deletes() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir, 1);
        let fatal = Arc::new(FatalErrorHandler::new());
        let segment = Segment::create(0, &paths, 1, 0, fatal, false).unwrap();
        segment.seal(1).unwrap();

        {
            let guard = segment.reserve_guard().unwrap();
            assert_eq!(guard.index(), 0);
            assert_eq!(segment.reservation_count(), 2);
        }
        assert_eq!(segment.reservation_count(), 1);

        segment.release();
        segment.block_until_deleted().unwrap();
        assert!(segment.is_deleted());
        assert!(!segment.reserve());
        assert!(!paths[0].file("0.metadata").exists());
        assert!(!paths[0].file("0.keys").exists());
        assert!(!paths[0].file("0-0.values").exists());
    }

    #[test]
    fn test_deletion_follows_index_order() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir, 1);
        let fatal = Arc::new(FatalErrorHandler::new());

        let mut segments: Vec<Arc<Segment>> = Vec::new();
        for index in 0..5u32 {
            let segment = Segment::create(index, &paths, 1, index, fatal.clone(), false).unwrap();
            if let Some(previous) = segments.last() {
                previous.seal(1).unwrap();
                previous.set_next(segment.clone()).unwrap();
            }
            segments.push(segment);
        }

        // releasing newer segments first must not delete anything
        for segment in segments.iter().skip(1).rev() {
            segment.release();
        }
        thread::sleep(Duration::from_millis(50));
        for index in 0..5 {
            assert!(paths[0].file(&format!("{}.metadata", index)).exists());
        }

        segments[0].release();
        for segment in &segments {
            segment.block_until_deleted().unwrap();
        }
        for index in 0..5 {
            assert!(!paths[0].file(&format!("{}.metadata", index)).exists());
        }
        assert!(!fatal.is_tripped());
    }

    #[test]
    fn test_negative_reservations_are_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let paths = paths(&temp_dir, 1);
        let fatal = Arc::new(FatalErrorHandler::new());
        let segment = Segment::create(0, &paths, 1, 0, fatal.clone(), false).unwrap();

        segment.release();
        segment.block_until_deleted().unwrap();
        segment.release();
        assert!(fatal.is_tripped());
    }
}
