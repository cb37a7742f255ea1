//! The table facade

use super::control_loop::{ControlLoop, SegmentLimits};
use super::flush_loop::{snapshot_existing, FlushLoop};
use super::messages::ControlMessage;
use super::state::TableState;
use super::{BoundaryFile, FlushCoordinator, TableConfig, TableMetadata};
use crate::keymap::{Keymap, KeymapTypeFile, MemKeymap, KEYMAP_DIR};
use crate::segment::{scan_segments, Segment, SegmentPath};
use crate::util::{ensure_dir, remove_dir_if_exists, FatalErrorHandler, LockFile};
use crate::{DriftError, KvPair, Result};
use crossbeam_channel::{bounded, Sender};
use crossbeam_skiplist::SkipMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A value returned by [`DiskTable::cache_aware_get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub value: Vec<u8>,
    /// True if the value has not been flushed yet
    pub from_cache: bool,
}

/// An open table.
///
/// All structural changes happen on the table's control loop thread; the
/// methods here enqueue requests and block on the reply where one is needed.
/// Reads never go through the loops.
pub struct DiskTable {
    config: TableConfig,
    state: Arc<TableState>,
    control_tx: Sender<ControlMessage>,
    flush_coordinator: Option<FlushCoordinator>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    locks: Mutex<Vec<LockFile>>,
}

impl DiskTable {
    /// Open or create a table with an in-memory keymap
    pub fn open(config: TableConfig) -> Result<Self> {
        Self::open_with_keymap(config, Arc::new(MemKeymap::new()))
    }

    /// Open or create a table backed by `keymap`.
    ///
    /// Recovers segments left by an earlier process, rebuilds the keymap if
    /// needed, starts a fresh mutable segment and both worker threads.
    pub fn open_with_keymap(config: TableConfig, keymap: Arc<dyn Keymap>) -> Result<Self> {
        config.validate()?;
        let name = config.name.clone();
        let table_dir = config.roots[0].join(&name);

        let mut locks = Vec::with_capacity(config.roots.len());
        for root in &config.roots {
            let dir = root.join(&name);
            ensure_dir(&dir)?;
            locks.push(LockFile::acquire(dir.join(LockFile::FILE_NAME))?);
        }

        let paths = SegmentPath::build(&config.roots, config.snapshot_dir.as_deref(), &name);
        for path in &paths {
            path.ensure_dirs()?;
        }

        let (metadata, created) = TableMetadata::load_or_create(
            &table_dir,
            config.ttl,
            config.sharding_factor,
            config.fsync,
        )?;
        if !created
            && (metadata.ttl() != config.ttl
                || metadata.sharding_factor() != config.sharding_factor)
        {
            info!(
                "Table {} keeps its stored ttl {:?} and sharding factor {}",
                name,
                metadata.ttl(),
                metadata.sharding_factor()
            );
        }
        let metadata = Arc::new(metadata);

        let fatal = Arc::new(FatalErrorHandler::with_callback(
            config.fatal_error_callback.clone(),
        ));
        let scan = scan_segments(&paths, config.clock.now(), fatal.clone(), config.fsync)?;

        let upper_bound = match &config.snapshot_dir {
            Some(snapshot_dir) => {
                let dir = snapshot_dir.join(&name);
                let lower = BoundaryFile::load(true, &dir, config.fsync)?;
                let mut upper = BoundaryFile::load(false, &dir, config.fsync)?;
                let loaded: Vec<Arc<Segment>> = scan.segments.values().cloned().collect();
                snapshot_existing(&loaded, &lower, &mut upper)?;
                Some(upper)
            }
            None => None,
        };

        reload_keymap(&config, keymap.as_ref(), &scan.segments, &table_dir)?;

        let key_count: i64 = scan
            .segments
            .values()
            .map(|segment| i64::from(segment.key_count()))
            .sum();
        let immutable_size: u64 = scan.segments.values().map(|segment| segment.size()).sum();

        let mut rng = match config.salt_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let next_index = scan.next_index;
        let lowest = if scan.is_empty() { next_index } else { scan.lowest };
        let mutable = Segment::create(
            next_index,
            &paths,
            metadata.sharding_factor(),
            rng.gen(),
            fatal.clone(),
            config.fsync,
        )?;
        if let Some(last) = scan.segments.values().next_back() {
            last.set_next(mutable.clone())?;
        }

        let mut segments = scan.segments;
        segments.insert(next_index, mutable.clone());

        let state = Arc::new(TableState {
            name: name.clone(),
            fatal,
            keymap,
            metadata,
            unflushed: SkipMap::new(),
            segments: RwLock::new(segments),
            size: AtomicU64::new(0),
            key_count: AtomicI64::new(key_count),
            lowest: AtomicU32::new(lowest),
            highest: AtomicU32::new(next_index),
        });

        let (control_tx, control_rx) = bounded(config.control_channel_size);
        let (flush_tx, flush_rx) = bounded(config.flush_channel_size);

        let flush_loop = FlushLoop::new(state.clone(), flush_rx, upper_bound);
        let control_loop = ControlLoop::new(
            state.clone(),
            control_rx,
            flush_tx,
            paths,
            SegmentLimits {
                target_segment_file_size: config.target_segment_file_size,
                max_segment_key_count: config.max_segment_key_count,
                target_key_file_size: config.target_key_file_size,
            },
            config.gc_period,
            config.gc_batch_size,
            config.fsync,
            config.clock.clone(),
            rng,
            lowest,
            mutable,
            immutable_size,
        );

        let flush_thread = thread::Builder::new()
            .name(format!("{}-flush", name))
            .spawn(move || flush_loop.run())?;
        let control_thread = thread::Builder::new()
            .name(format!("{}-control", name))
            .spawn(move || control_loop.run())?;

        let flush_coordinator = if config.min_flush_interval.is_zero() {
            None
        } else {
            Some(FlushCoordinator::new(config.min_flush_interval))
        };

        info!(
            "Opened table {} with segments {} through {} and {} keys",
            name, lowest, next_index, key_count
        );

        Ok(Self {
            config,
            state,
            control_tx,
            flush_coordinator,
            threads: Mutex::new(vec![control_thread, flush_thread]),
            locks: Mutex::new(locks),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.put_batch(vec![KvPair::new(key, value)])
    }

    /// Queue `pairs` for writing. They are readable immediately and durable
    /// after the next [`flush`](Self::flush).
    pub fn put_batch(&self, pairs: Vec<KvPair>) -> Result<()> {
        self.state.fatal.check()?;
        if pairs.is_empty() {
            return Ok(());
        }
        for pair in &pairs {
            validate_pair(pair)?;
        }
        if self.config.double_write_protection {
            self.check_double_writes(&pairs)?;
        }

        for pair in &pairs {
            self.state
                .unflushed
                .insert(pair.key.clone(), pair.value.clone());
        }
        self.state
            .key_count
            .fetch_add(pairs.len() as i64, Ordering::SeqCst);

        self.state
            .fatal
            .send(&self.control_tx, ControlMessage::Write { pairs })
    }

    fn check_double_writes(&self, pairs: &[KvPair]) -> Result<()> {
        let mut batch = HashSet::with_capacity(pairs.len());
        for pair in pairs {
            let present = !batch.insert(pair.key.as_slice())
                || self.state.unflushed.contains_key(&pair.key)
                || self.state.keymap.get(&pair.key)?.is_some();
            if present {
                return Err(DriftError::InvalidArgument(format!(
                    "key {} was already written",
                    String::from_utf8_lossy(&pair.key)
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.cache_aware_get(key, false)?.map(|cached| cached.value))
    }

    /// Look `key` up in the unflushed cache, then on disk unless `only_cache`
    pub fn cache_aware_get(&self, key: &[u8], only_cache: bool) -> Result<Option<CachedValue>> {
        self.state.fatal.check()?;

        if let Some(entry) = self.state.unflushed.get(key) {
            return Ok(Some(CachedValue {
                value: entry.value().clone(),
                from_cache: true,
            }));
        }
        if only_cache {
            return Ok(None);
        }

        let address = match self.state.keymap.get(key)? {
            Some(address) => address,
            None => return Ok(None),
        };
        // The segment may have been collected since the keymap lookup.
        let segment = match self.state.reserve_segment(address.index()) {
            Some(segment) => segment,
            None => return Ok(None),
        };
        let value = segment.read(key, address)?;
        Ok(Some(CachedValue {
            value,
            from_cache: false,
        }))
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        self.state.fatal.check()?;
        if self.state.unflushed.contains_key(key) {
            return Ok(true);
        }
        Ok(self.state.keymap.get(key)?.is_some())
    }

    /// Make every write queued so far durable and visible through the keymap
    pub fn flush(&self) -> Result<()> {
        match &self.flush_coordinator {
            Some(coordinator) => coordinator.flush_with(|| self.flush_now()),
            None => self.flush_now(),
        }
    }

    fn flush_now(&self) -> Result<()> {
        self.state.fatal.check()?;
        let (reply_tx, reply_rx) = bounded(1);
        self.state
            .fatal
            .send(&self.control_tx, ControlMessage::Flush { reply: reply_tx })?;
        self.state.fatal.await_reply(&reply_rx)
    }

    /// Change the age at which sealed segments expire. Zero disables expiry.
    pub fn set_ttl(&self, ttl: Duration) -> Result<()> {
        self.state.fatal.check()?;
        self.state.metadata.set_ttl(ttl)?;
        debug!("Table {} ttl is now {:?}", self.config.name, ttl);
        Ok(())
    }

    /// Change the shard count used by segments created from now on
    pub fn set_sharding_factor(&self, sharding_factor: u32) -> Result<()> {
        if sharding_factor == 0 {
            return Err(DriftError::InvalidArgument(
                "sharding factor must be at least 1".into(),
            ));
        }
        self.state.fatal.check()?;
        let (reply_tx, reply_rx) = bounded(1);
        self.state.fatal.send(
            &self.control_tx,
            ControlMessage::SetShardingFactor {
                sharding_factor,
                reply: reply_tx,
            },
        )?;
        self.state.fatal.await_reply(&reply_rx)
    }

    /// Collect expired segments now instead of waiting for the next tick
    pub fn run_gc(&self) -> Result<()> {
        self.state.fatal.check()?;
        let (reply_tx, reply_rx) = bounded(1);
        self.state
            .fatal
            .send(&self.control_tx, ControlMessage::RunGc { reply: reply_tx })?;
        self.state.fatal.await_reply(&reply_rx)
    }

    /// Bytes on disk across all live segments and the table metadata,
    /// counting buffered writes as if they were flushed
    pub fn size(&self) -> u64 {
        self.state.size.load(Ordering::SeqCst)
    }

    /// Keys held by live segments plus keys queued for writing
    pub fn key_count(&self) -> u64 {
        self.state.key_count.load(Ordering::SeqCst).max(0) as u64
    }

    /// Lowest and highest live segment index
    pub fn segment_range(&self) -> (u32, u32) {
        (
            self.state.lowest.load(Ordering::SeqCst),
            self.state.highest.load(Ordering::SeqCst),
        )
    }

    /// Seal the mutable segment, stop both loops, and release the table
    /// locks. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if !self.state.fatal.begin_shutdown() {
            return self.state.fatal.check_fatal();
        }

        let (reply_tx, reply_rx) = bounded(1);
        let result = self
            .state
            .fatal
            .send(&self.control_tx, ControlMessage::Shutdown { reply: reply_tx })
            .and_then(|_| self.state.fatal.await_reply(&reply_rx));

        let threads = std::mem::take(&mut *self.threads.lock());
        for handle in threads {
            if handle.join().is_err() {
                warn!("A worker thread of table {} panicked", self.config.name);
            }
        }

        let locks = std::mem::take(&mut *self.locks.lock());
        for lock in locks {
            lock.release()?;
        }

        result?;
        self.state.fatal.check_fatal()?;
        info!("Closed table {}", self.config.name);
        Ok(())
    }

    /// Close the table and delete everything it stored
    pub fn destroy(self) -> Result<()> {
        if let Err(e) = self.close() {
            if !e.is_fatal() {
                return Err(e);
            }
            warn!("Destroying table {} after fatal error: {}", self.config.name, e);
        }

        let segments = std::mem::take(&mut *self.state.segments.write());
        if !self.state.fatal.is_tripped() {
            for segment in segments.values() {
                segment.release();
            }
            // Deletion runs in index order, so the last one finishing means all are gone.
            if let Some(last) = segments.values().next_back() {
                last.block_until_deleted()?;
            }
        }

        self.state.keymap.destroy()?;
        KeymapTypeFile::new(&self.table_dir().join(KEYMAP_DIR)).delete()?;
        self.state.metadata.delete()?;

        for root in &self.config.roots {
            remove_dir_if_exists(&root.join(&self.config.name))?;
        }
        if let Some(snapshot_dir) = &self.config.snapshot_dir {
            remove_dir_if_exists(&snapshot_dir.join(&self.config.name))?;
        }

        info!(
            "Destroyed table {} ({} segments)",
            self.config.name,
            segments.len()
        );
        Ok(())
    }

    fn table_dir(&self) -> PathBuf {
        self.config.roots[0].join(&self.config.name)
    }
}

impl Drop for DiskTable {
    fn drop(&mut self) {
        if self.state.fatal.is_closing() {
            return;
        }
        if let Err(e) = self.close() {
            warn!("Failed to close table {}: {}", self.config.name, e);
        }
    }
}

fn validate_pair(pair: &KvPair) -> Result<()> {
    if pair.key.is_empty() {
        return Err(DriftError::InvalidArgument("key must not be empty".into()));
    }
    if u32::try_from(pair.key.len()).is_err() {
        return Err(DriftError::InvalidArgument(format!(
            "key of {} bytes is too long",
            pair.key.len()
        )));
    }
    if u32::try_from(pair.value.len()).is_err() {
        return Err(DriftError::InvalidArgument(format!(
            "value of {} bytes is too long",
            pair.value.len()
        )));
    }
    Ok(())
}

/// Rebuild the keymap from the segment key files unless a persistent keymap
/// of the same kind already holds them
fn reload_keymap(
    config: &TableConfig,
    keymap: &dyn Keymap,
    segments: &BTreeMap<u32, Arc<Segment>>,
    table_dir: &std::path::Path,
) -> Result<()> {
    let type_file = KeymapTypeFile::new(&table_dir.join(KEYMAP_DIR));
    let recorded = type_file.load()?;
    if config.keymap.is_persistent() && recorded.as_ref() == Some(&config.keymap) {
        return Ok(());
    }

    let mut loaded = 0;
    for segment in segments.values().rev() {
        let keys = segment.get_keys()?;
        for batch in keys.chunks(crate::config::KEYMAP_RELOAD_BATCH_SIZE) {
            keymap.put(batch)?;
        }
        loaded += keys.len();
    }
    type_file.store(&config.keymap, config.fsync)?;

    if loaded > 0 {
        info!(
            "Rebuilt {:?} keymap of table {} with {} keys from {} segments",
            config.keymap,
            config.name,
            loaded,
            segments.len()
        );
    }
    Ok(())
}
