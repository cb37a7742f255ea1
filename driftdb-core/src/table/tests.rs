use super::*;
use crate::keymap::{Keymap, MemKeymap};
use crate::segment::SEGMENTS_DIR;
use crate::util::FatalCallback;
use crate::{Address, DriftError, KeyRecord, KvPair};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const SECOND: u64 = 1_000_000_000;

fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config(temp_dir: &TempDir) -> TableConfig {
    init_test_logging();
    let mut config = TableConfig::new("test", temp_dir.path().join("data"));
    config.fsync = false;
    config.salt_seed = Some(7);
    config.gc_period = Duration::ZERO;
    config
}

fn manual_clock(start: u64) -> (Clock, Arc<AtomicU64>) {
    let now = Arc::new(AtomicU64::new(start));
    let source = now.clone();
    (Clock::from_fn(move || source.load(Ordering::SeqCst)), now)
}

fn segments_dir(config: &TableConfig) -> PathBuf {
    config.roots[0].join(&config.name).join(SEGMENTS_DIR)
}

fn value_file_count(dir: &Path, index: u32) -> usize {
    let prefix = format!("{}-", index);
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(&prefix) && name.ends_with(".values"))
        .count()
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        thread::sleep(Duration::from_millis(10));
    }
}

fn random_string(rng: &mut StdRng, len: usize) -> String {
    (0..len)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

#[test]
fn test_put_get_flush() {
    let temp_dir = TempDir::new().unwrap();
    let table = DiskTable::open(test_config(&temp_dir)).unwrap();

    table.put("alpha", "one").unwrap();
    table.put("beta", "two").unwrap();
    assert_eq!(table.get(b"alpha").unwrap(), Some(b"one".to_vec()));
    assert_eq!(table.key_count(), 2);

    table.flush().unwrap();
    assert_eq!(table.get(b"alpha").unwrap(), Some(b"one".to_vec()));
    assert_eq!(table.get(b"beta").unwrap(), Some(b"two".to_vec()));
    assert_eq!(table.get(b"gamma").unwrap(), None);
    assert!(table.exists(b"beta").unwrap());
    assert!(!table.exists(b"gamma").unwrap());
    assert!(table.size() > 0);

    table.close().unwrap();
    table.close().unwrap();
    assert!(matches!(table.put("late", "write"), Err(DriftError::Closed)));
}

#[test]
fn test_invalid_writes_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let table = DiskTable::open(test_config(&temp_dir)).unwrap();

    assert!(matches!(
        table.put("", "value"),
        Err(DriftError::InvalidArgument(_))
    ));
    assert!(matches!(
        table.set_sharding_factor(0),
        Err(DriftError::InvalidArgument(_))
    ));
    assert_eq!(table.key_count(), 0);
}

#[test]
fn test_cache_aware_get() {
    let temp_dir = TempDir::new().unwrap();
    let table = DiskTable::open(test_config(&temp_dir)).unwrap();

    table.put("key", "value").unwrap();
    let cached = table.cache_aware_get(b"key", true).unwrap().unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.value, b"value");

    table.flush().unwrap();
    assert_eq!(table.cache_aware_get(b"key", true).unwrap(), None);
    let stored = table.cache_aware_get(b"key", false).unwrap().unwrap();
    assert!(!stored.from_cache);
    assert_eq!(stored.value, b"value");
}

#[test]
fn test_small_segments_keep_every_value() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(&temp_dir);
    config.target_segment_file_size = 100;
    config.sharding_factor = 2;

    let mut rng = StdRng::seed_from_u64(42);
    let pairs: Vec<(String, String)> = (0..1000)
        .map(|i| {
            let key = format!("{}-{}", i, random_string(&mut rng, 12));
            let value = random_string(&mut rng, 1 + i % 40);
            (key, value)
        })
        .collect();

    let table = DiskTable::open(config.clone()).unwrap();
    for (key, value) in &pairs {
        table.put(key.as_str(), value.as_str()).unwrap();
    }
    table.flush().unwrap();

    let (_, highest) = table.segment_range();
    assert!(highest > 0, "expected more than one segment");
    for (key, value) in &pairs {
        assert_eq!(
            table.get(key.as_bytes()).unwrap(),
            Some(value.as_bytes().to_vec())
        );
    }
    table.close().unwrap();

    let table = DiskTable::open(config).unwrap();
    assert_eq!(table.key_count(), 1000);
    for (key, value) in pairs.iter().step_by(37) {
        assert_eq!(
            table.get(key.as_bytes()).unwrap(),
            Some(value.as_bytes().to_vec())
        );
    }
}

#[test]
fn test_reopen_keeps_flushed_data() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);

    {
        let table = DiskTable::open(config.clone()).unwrap();
        let batch: Vec<KvPair> = (0..50)
            .map(|i| KvPair::new(format!("key-{}", i), format!("value-{}", i)))
            .collect();
        table.put_batch(batch).unwrap();
        table.flush().unwrap();
        table.close().unwrap();
    }

    let table = DiskTable::open(config.clone()).unwrap();
    assert_eq!(table.key_count(), 50);
    assert_eq!(table.segment_range(), (0, 1));
    for i in 0..50 {
        assert_eq!(
            table.get(format!("key-{}", i).as_bytes()).unwrap(),
            Some(format!("value-{}", i).into_bytes())
        );
    }

    table.put("after", "reopen").unwrap();
    table.flush().unwrap();
    drop(table);

    let table = DiskTable::open(config).unwrap();
    assert_eq!(table.get(b"after").unwrap(), Some(b"reopen".to_vec()));
    assert_eq!(table.get(b"key-49").unwrap(), Some(b"value-49".to_vec()));
}

/// Bytes in the key record of a "key-NN" key: length, key, address, value size
const KEY_RECORD_SIZE: u64 = 4 + 6 + 8 + 4;

/// Write 20 keys, cut `cut` bytes off the key file, clear the sealed flag as
/// if the process died while the segment was still mutable, and reopen.
fn reopen_after_key_file_cut(cut: u64) {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);

    let table = DiskTable::open(config.clone()).unwrap();
    for i in 0..20 {
        table
            .put(format!("key-{:02}", i), format!("value-{}", i))
            .unwrap();
    }
    table.flush().unwrap();
    let (_, last) = table.segment_range();
    table.close().unwrap();

    let dir = segments_dir(&config);
    let key_path = dir.join(format!("{}.keys", last));
    let len = fs::metadata(&key_path).unwrap().len();
    assert_eq!(len, 20 * KEY_RECORD_SIZE);
    fs::OpenOptions::new()
        .write(true)
        .open(&key_path)
        .unwrap()
        .set_len(len - cut)
        .unwrap();
    let metadata_path = dir.join(format!("{}.metadata", last));
    let mut metadata = fs::read(&metadata_path).unwrap();
    metadata[20] = 0;
    fs::write(&metadata_path, metadata).unwrap();

    let survivors = 20 - cut.div_ceil(KEY_RECORD_SIZE) as usize;
    let table = DiskTable::open(config).unwrap();
    for i in 0..20 {
        let value = table.get(format!("key-{:02}", i).as_bytes()).unwrap();
        if i < survivors {
            assert_eq!(
                value,
                Some(format!("value-{}", i).into_bytes()),
                "cut {}",
                cut
            );
        } else {
            assert_eq!(value, None, "cut {} key {}", cut, i);
        }
    }
    assert_eq!(table.key_count(), survivors as u64, "cut {}", cut);

    // The recovered segment accepts writes again after reopening.
    table.put("fresh", "write").unwrap();
    table.flush().unwrap();
    assert_eq!(table.get(b"fresh").unwrap(), Some(b"write".to_vec()));
}

#[test]
fn test_truncated_key_file_after_crash() {
    // Inside the last record, exactly one record, one byte past a record
    // boundary, and exactly two records.
    let cuts = [
        1,
        3,
        KEY_RECORD_SIZE - 1,
        KEY_RECORD_SIZE,
        KEY_RECORD_SIZE + 1,
        2 * KEY_RECORD_SIZE,
    ];
    for cut in cuts {
        reopen_after_key_file_cut(cut);
    }
}

#[test]
fn test_sharding_factor_applies_to_new_segments() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(&temp_dir);
    config.sharding_factor = 2;
    let dir = segments_dir(&config);

    let table = DiskTable::open(config.clone()).unwrap();
    table.put("first", "segment").unwrap();

    table.set_sharding_factor(2).unwrap();
    assert_eq!(table.segment_range(), (0, 0));

    table.set_sharding_factor(4).unwrap();
    assert_eq!(table.segment_range(), (0, 1));
    table.put("second", "segment").unwrap();
    table.flush().unwrap();

    assert_eq!(value_file_count(&dir, 0), 2);
    assert_eq!(value_file_count(&dir, 1), 4);
    assert_eq!(table.get(b"first").unwrap(), Some(b"segment".to_vec()));
    assert_eq!(table.get(b"second").unwrap(), Some(b"segment".to_vec()));
    table.close().unwrap();

    // The stored factor outlives the configured one.
    let table = DiskTable::open(config).unwrap();
    assert_eq!(value_file_count(&dir, 2), 4);
    assert_eq!(value_file_count(&dir, 0), 2);
    assert_eq!(table.get(b"first").unwrap(), Some(b"segment".to_vec()));
}

#[test]
fn test_gc_respects_ttl_and_deletes_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let (clock, now) = manual_clock(1_000 * SECOND);
    let mut config = test_config(&temp_dir);
    config.clock = clock;
    config.ttl = Duration::from_secs(10);
    config.max_segment_key_count = 5;
    config.sharding_factor = 1;
    let dir = segments_dir(&config);

    let table = DiskTable::open(config).unwrap();
    for i in 0..12 {
        table.put(format!("key-{:02}", i), "value").unwrap();
    }
    table.flush().unwrap();
    assert_eq!(table.segment_range(), (0, 2));
    let size_before = table.size();

    now.fetch_add(5 * SECOND, Ordering::SeqCst);
    table.run_gc().unwrap();
    assert_eq!(table.segment_range(), (0, 2));
    assert_eq!(table.key_count(), 12);

    now.fetch_add(6 * SECOND, Ordering::SeqCst);
    table.run_gc().unwrap();
    assert_eq!(table.segment_range(), (2, 2));
    assert_eq!(table.key_count(), 2);
    assert!(table.size() < size_before);

    for i in 0..10 {
        assert_eq!(table.get(format!("key-{:02}", i).as_bytes()).unwrap(), None);
    }
    assert_eq!(table.get(b"key-10").unwrap(), Some(b"value".to_vec()));
    assert_eq!(table.get(b"key-11").unwrap(), Some(b"value".to_vec()));

    // Segment 1 only goes once segment 0 is gone, so waiting on it covers both.
    wait_until(|| !dir.join("1.metadata").exists());
    assert!(!dir.join("0.metadata").exists());
    assert!(!dir.join("0.keys").exists());
    assert!(dir.join("2.metadata").exists());

    // The mutable segment is never collected, however old.
    now.fetch_add(1_000 * SECOND, Ordering::SeqCst);
    table.run_gc().unwrap();
    assert_eq!(table.segment_range(), (2, 2));
}

#[test]
fn test_set_ttl_persists() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);

    let table = DiskTable::open(config.clone()).unwrap();
    table.set_ttl(Duration::from_secs(90)).unwrap();
    table.close().unwrap();

    let table_dir = config.roots[0].join(&config.name);
    let metadata = TableMetadata::load(&table_dir, false).unwrap();
    assert_eq!(metadata.ttl(), Duration::from_secs(90));
    assert_eq!(metadata.sharding_factor(), config.sharding_factor);
}

#[test]
fn test_second_open_is_locked() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir);

    let table = DiskTable::open(config.clone()).unwrap();
    assert!(matches!(
        DiskTable::open(config.clone()),
        Err(DriftError::Locked(_))
    ));

    table.close().unwrap();
    DiskTable::open(config).unwrap();
}

#[test]
fn test_destroy_removes_everything() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(&temp_dir);
    config.max_segment_key_count = 4;
    config.snapshot_dir = Some(temp_dir.path().join("snapshots"));

    let table = DiskTable::open(config.clone()).unwrap();
    for i in 0..10 {
        table.put(format!("key-{}", i), "value").unwrap();
    }
    table.flush().unwrap();
    table.destroy().unwrap();

    assert!(!config.roots[0].join(&config.name).exists());
    assert!(!temp_dir.path().join("snapshots").join(&config.name).exists());

    let table = DiskTable::open(config).unwrap();
    assert_eq!(table.key_count(), 0);
    assert_eq!(table.segment_range(), (0, 0));
    assert_eq!(table.get(b"key-1").unwrap(), None);
}

#[test]
fn test_sealed_segments_are_snapshotted() {
    let temp_dir = TempDir::new().unwrap();
    let snapshot_root = temp_dir.path().join("snapshots");
    let mut config = test_config(&temp_dir);
    config.max_segment_key_count = 3;
    config.sharding_factor = 1;
    config.snapshot_dir = Some(snapshot_root.clone());

    let table = DiskTable::open(config.clone()).unwrap();
    for i in 0..7 {
        table.put(format!("key-{}", i), "value").unwrap();
    }
    table.flush().unwrap();
    assert_eq!(table.segment_range(), (0, 2));

    let hard_links = config.roots[0].join(&config.name).join(crate::segment::SNAPSHOT_DIR);
    let soft_links = snapshot_root.join(&config.name).join(SEGMENTS_DIR);
    for index in 0..2 {
        assert!(hard_links.join(format!("{}.keys", index)).exists());
        assert!(soft_links.join(format!("{}.metadata", index)).exists());
        assert!(soft_links
            .join(format!("{}-0.values", index))
            .symlink_metadata()
            .unwrap()
            .file_type()
            .is_symlink());
    }
    assert!(!soft_links.join("2.metadata").exists());

    let upper = BoundaryFile::load(false, &snapshot_root.join(&config.name), false).unwrap();
    assert_eq!(upper.index(), 1);

    // Close seals segment 2; reopening links it without touching anything
    // at or below the lower bound.
    table.close().unwrap();
    let mut lower = BoundaryFile::load(true, &snapshot_root.join(&config.name), false).unwrap();
    lower.update(1).unwrap();
    drop(table);

    let table = DiskTable::open(config).unwrap();
    assert!(soft_links.join("2.metadata").exists());
    let upper = BoundaryFile::load(false, &snapshot_root.join("test"), false).unwrap();
    assert_eq!(upper.index(), 2);
    assert_eq!(table.get(b"key-0").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn test_concurrent_flushes_with_coordinator() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(&temp_dir);
    config.min_flush_interval = Duration::from_millis(20);

    let table = DiskTable::open(config).unwrap();
    thread::scope(|scope| {
        for t in 0..4 {
            let table = &table;
            scope.spawn(move || {
                for i in 0..25 {
                    table.put(format!("t{}-{}", t, i), format!("v{}", i)).unwrap();
                    if i % 5 == 0 {
                        table.flush().unwrap();
                    }
                }
            });
        }
    });
    table.flush().unwrap();

    assert_eq!(table.key_count(), 100);
    for t in 0..4 {
        for i in 0..25 {
            let cached = table
                .cache_aware_get(format!("t{}-{}", t, i).as_bytes(), false)
                .unwrap()
                .unwrap();
            assert!(!cached.from_cache);
            assert_eq!(cached.value, format!("v{}", i).into_bytes());
        }
    }
}

/// A keymap that can be told to start failing
#[derive(Default)]
struct FailingKeymap {
    inner: MemKeymap,
    failing: AtomicBool,
}

impl Keymap for FailingKeymap {
    fn put(&self, records: &[KeyRecord]) -> crate::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DriftError::Keymap("index unavailable".into()));
        }
        self.inner.put(records)
    }

    fn get(&self, key: &[u8]) -> crate::Result<Option<Address>> {
        self.inner.get(key)
    }

    fn delete(&self, records: &[KeyRecord]) -> crate::Result<()> {
        self.inner.delete(records)
    }

    fn stop(&self) -> crate::Result<()> {
        self.inner.stop()
    }

    fn destroy(&self) -> crate::Result<()> {
        self.inner.destroy()
    }
}

#[test]
fn test_keymap_failure_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let keymap = Arc::new(FailingKeymap::default());
    let table = DiskTable::open_with_keymap(test_config(&temp_dir), keymap.clone()).unwrap();

    table.put("ok", "value").unwrap();
    table.flush().unwrap();

    keymap.failing.store(true, Ordering::SeqCst);
    table.put("doomed", "value").unwrap();
    let err = table.flush().unwrap_err();
    assert!(err.is_fatal());
    assert!(err.to_string().contains("index unavailable"));

    assert!(table.put("after", "fatal").unwrap_err().is_fatal());
    assert!(table.get(b"ok").unwrap_err().is_fatal());
    assert!(table.close().unwrap_err().is_fatal());
}

#[test]
fn test_fatal_error_callback_runs_once() {
    let temp_dir = TempDir::new().unwrap();
    let keymap = Arc::new(FailingKeymap::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let causes = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let mut config = test_config(&temp_dir);
    let (seen_calls, seen_causes) = (calls.clone(), causes.clone());
    config.fatal_error_callback = Some(FatalCallback::from_fn(move |err| {
        seen_calls.fetch_add(1, Ordering::SeqCst);
        seen_causes.lock().push(err.to_string());
    }));
    let table = DiskTable::open_with_keymap(config, keymap.clone()).unwrap();

    table.put("ok", "value").unwrap();
    table.flush().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    keymap.failing.store(true, Ordering::SeqCst);
    table.put("doomed", "value").unwrap();
    assert!(table.flush().unwrap_err().is_fatal());
    wait_until(|| calls.load(Ordering::SeqCst) == 1);

    assert!(table.put("after", "fatal").unwrap_err().is_fatal());
    assert!(table.flush().unwrap_err().is_fatal());
    assert!(table.close().unwrap_err().is_fatal());
    drop(table);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let causes = causes.lock();
    assert_eq!(causes.len(), 1);
    assert!(causes[0].contains("index unavailable"));
}

#[test]
fn test_double_write_protection() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(&temp_dir);
    config.double_write_protection = true;
    let table = DiskTable::open(config).unwrap();

    table.put("key", "first").unwrap();
    assert!(matches!(
        table.put("key", "unflushed"),
        Err(DriftError::InvalidArgument(_))
    ));

    table.flush().unwrap();
    assert!(matches!(
        table.put("key", "flushed"),
        Err(DriftError::InvalidArgument(_))
    ));

    // A rejected batch writes none of its pairs.
    let batch = vec![
        KvPair::new("a", "1"),
        KvPair::new("b", "2"),
        KvPair::new("a", "3"),
    ];
    assert!(matches!(
        table.put_batch(batch),
        Err(DriftError::InvalidArgument(_))
    ));
    assert_eq!(table.get(b"a").unwrap(), None);
    assert_eq!(table.get(b"b").unwrap(), None);

    assert_eq!(table.get(b"key").unwrap(), Some(b"first".to_vec()));
    assert_eq!(table.key_count(), 1);
}

#[test]
fn test_double_writes_allowed_by_default() {
    let temp_dir = TempDir::new().unwrap();
    let table = DiskTable::open(test_config(&temp_dir)).unwrap();

    table.put("key", "first").unwrap();
    table.flush().unwrap();
    table.put("key", "second").unwrap();
    table.flush().unwrap();
    assert_eq!(table.key_count(), 2);
    assert!(table.exists(b"key").unwrap());
}

#[test]
fn test_snapshot_survives_immediate_gc() {
    let temp_dir = TempDir::new().unwrap();
    let (clock, now) = manual_clock(1_000 * SECOND);
    let mut config = test_config(&temp_dir);
    config.clock = clock;
    config.ttl = Duration::from_nanos(1);
    config.max_segment_key_count = 1;
    config.sharding_factor = 1;
    config.snapshot_dir = Some(temp_dir.path().join("snapshots"));

    // Every put seals the previous segment, and the GC that follows may
    // collect it while the flush loop is still linking it into the snapshot.
    let table = DiskTable::open(config).unwrap();
    for i in 0..50 {
        table.put(format!("key-{}", i), "value").unwrap();
        now.fetch_add(SECOND, Ordering::SeqCst);
        table.run_gc().unwrap();
    }
    table.flush().unwrap();

    let (lowest, highest) = table.segment_range();
    assert!(lowest > 0, "expected sealed segments to be collected");
    assert!(lowest <= highest);
    table.put("last", "value").unwrap();
    table.flush().unwrap();
    assert_eq!(table.get(b"last").unwrap(), Some(b"value".to_vec()));
    table.close().unwrap();
}

/// Record segments whose metadata file has disappeared since the last call.
///
/// Walks down from `highest` to `floor`. Deletion runs oldest first, so once
/// a missing file is seen every lower index must be missing too.
fn record_deletions(dir: &Path, highest: u32, floor: &mut u32, order: &mut Vec<u32>) {
    let mut missing = Vec::new();
    for index in (*floor..=highest).rev() {
        let present = dir.join(format!("{}.metadata", index)).exists();
        if present {
            assert!(
                missing.is_empty(),
                "segment {} still on disk after segment(s) {:?} were deleted",
                index,
                missing
            );
        } else {
            missing.push(index);
        }
    }
    missing.reverse();
    if let Some(&last) = missing.last() {
        *floor = last + 1;
    }
    order.extend(missing);
}

#[test]
fn test_gc_deletes_in_order_under_writes() {
    let temp_dir = TempDir::new().unwrap();
    let (clock, now) = manual_clock(1_000 * SECOND);
    let mut config = test_config(&temp_dir);
    config.clock = clock;
    config.ttl = Duration::from_secs(1);
    config.max_segment_key_count = 10;
    config.sharding_factor = 1;
    let dir = segments_dir(&config);

    let table = DiskTable::open(config).unwrap();
    let done = AtomicBool::new(false);
    let mut order = Vec::new();
    let mut floor = 0;

    thread::scope(|scope| {
        let (table, done, now) = (&table, &done, &now);
        scope.spawn(move || {
            for i in 0..2000 {
                table.put(format!("key-{}", i), "value").unwrap();
                if i % 100 == 99 {
                    table.flush().unwrap();
                }
            }
            done.store(true, Ordering::SeqCst);
        });
        scope.spawn(move || {
            while !done.load(Ordering::SeqCst) {
                now.fetch_add(2 * SECOND, Ordering::SeqCst);
                table.run_gc().unwrap();
                thread::sleep(Duration::from_millis(1));
            }
        });

        while !done.load(Ordering::SeqCst) {
            let (_, highest) = table.segment_range();
            record_deletions(&dir, highest, &mut floor, &mut order);
            thread::sleep(Duration::from_micros(200));
        }
    });

    // Collect everything left that is sealed, then wait for the deleters.
    table.flush().unwrap();
    now.fetch_add(10 * SECOND, Ordering::SeqCst);
    table.run_gc().unwrap();
    let (lowest, highest) = table.segment_range();
    assert!(lowest > 0);
    wait_until(|| {
        record_deletions(&dir, highest, &mut floor, &mut order);
        floor >= lowest
    });

    assert_eq!(order, (0..lowest).collect::<Vec<_>>());
    table.put("after", "gc").unwrap();
    table.flush().unwrap();
    assert_eq!(table.get(b"after").unwrap(), Some(b"gc".to_vec()));
}
