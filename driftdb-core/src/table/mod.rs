//! Table engine
//!
//! A table stores write-once key/value pairs in a chain of segments spread
//! over one or more storage roots. Two long-lived threads do the work:
//!
//! - **Control loop**: owns segment structure. Applies writes, decides when
//!   to seal and start a new segment, and garbage collects expired segments.
//! - **Flush loop**: performs the blocking part of flushing and sealing, then
//!   publishes the newly durable keys to the keymap.
//!
//! Callers talk to both through [`DiskTable`].

mod boundary;
mod control_loop;
mod disk_table;
mod flush_coordinator;
mod flush_loop;
mod messages;
mod metadata;
mod state;

#[cfg(test)]
mod tests;

pub use boundary::{BoundaryFile, LOWER_BOUND_FILE, UPPER_BOUND_FILE};
pub use disk_table::{CachedValue, DiskTable};
pub use flush_coordinator::FlushCoordinator;
pub use metadata::{TableMetadata, TABLE_METADATA_FILE, TABLE_METADATA_SIZE};

use crate::keymap::KeymapKind;
use crate::util::FatalCallback;
use crate::{DriftError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time in nanoseconds since the Unix epoch
#[derive(Clone)]
pub struct Clock(Arc<dyn Fn() -> u64 + Send + Sync>);

impl Clock {
    /// Wall clock time
    pub fn system() -> Self {
        Self(Arc::new(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
                .unwrap_or(0)
        }))
    }

    /// A clock driven by `f`, for tests that need to control time
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn now(&self) -> u64 {
        (self.0)()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Clock")
    }
}

/// Table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Table name, also the directory name under every root
    pub name: String,
    /// Storage roots. Metadata and key files live in the first one.
    pub roots: Vec<PathBuf>,
    /// Shards per new segment
    pub sharding_factor: u32,
    /// Age after sealing at which a segment is garbage collected (zero keeps data forever)
    pub ttl: Duration,
    /// A segment is sealed once any shard value file grows past this many bytes
    pub target_segment_file_size: u32,
    /// A segment is sealed once it holds this many keys
    pub max_segment_key_count: u32,
    /// A segment is sealed once its key file reaches this many bytes
    pub target_key_file_size: u64,
    /// Interval between automatic garbage collection runs (zero disables them)
    pub gc_period: Duration,
    /// Keys removed from the keymap per delete call during garbage collection
    pub gc_batch_size: usize,
    /// Capacity of the control loop request queue
    pub control_channel_size: usize,
    /// Capacity of the flush loop request queue
    pub flush_channel_size: usize,
    /// Flushes arriving closer together than this share one underlying flush
    pub min_flush_interval: Duration,
    /// Fsync files and directories on flush, seal, and metadata updates
    pub fsync: bool,
    /// Root of the symlink snapshot tree. `None` disables snapshots.
    pub snapshot_dir: Option<PathBuf>,
    /// Seed for segment salts. `None` draws from the OS.
    pub salt_seed: Option<u64>,
    /// Keymap implementation recorded in the keymap type file
    pub keymap: KeymapKind,
    /// Reject writes of a key the table already holds. Costs a keymap
    /// lookup per written key.
    pub double_write_protection: bool,
    #[serde(skip)]
    pub clock: Clock,
    /// Called once with the first fatal error the table hits
    #[serde(skip)]
    pub fatal_error_callback: Option<FatalCallback>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: String::from("table"),
            roots: vec![PathBuf::from("data")],
            sharding_factor: crate::config::DEFAULT_SHARDING_FACTOR,
            ttl: Duration::ZERO,
            target_segment_file_size: crate::config::TARGET_SEGMENT_FILE_SIZE,
            max_segment_key_count: crate::config::MAX_SEGMENT_KEY_COUNT,
            target_key_file_size: crate::config::TARGET_KEY_FILE_SIZE,
            gc_period: Duration::from_secs(crate::config::GC_PERIOD_SECS),
            gc_batch_size: crate::config::GC_BATCH_SIZE,
            control_channel_size: crate::config::CONTROL_CHANNEL_SIZE,
            flush_channel_size: crate::config::FLUSH_CHANNEL_SIZE,
            min_flush_interval: Duration::ZERO,
            fsync: true,
            snapshot_dir: None,
            salt_seed: None,
            keymap: KeymapKind::default(),
            double_write_protection: false,
            clock: Clock::default(),
            fatal_error_callback: None,
        }
    }
}

impl TableConfig {
    /// Defaults for a table named `name` stored under `root`
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            roots: vec![root.into()],
            ..Default::default()
        }
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TableConfig =
            serde_json::from_str(json).map_err(|e| DriftError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DriftError::Config("table name must not be empty".into()));
        }
        if self.name.contains(std::path::MAIN_SEPARATOR) || self.name.contains('/') {
            return Err(DriftError::Config(format!(
                "table name {:?} must not contain a path separator",
                self.name
            )));
        }
        if self.roots.is_empty() {
            return Err(DriftError::Config("at least one storage root is required".into()));
        }
        if self.sharding_factor == 0 {
            return Err(DriftError::Config("sharding factor must be at least 1".into()));
        }
        if self.target_segment_file_size == 0 || self.target_key_file_size == 0 {
            return Err(DriftError::Config("segment size targets must be positive".into()));
        }
        if self.max_segment_key_count == 0 {
            return Err(DriftError::Config("max segment key count must be positive".into()));
        }
        if self.gc_batch_size == 0 {
            return Err(DriftError::Config("gc batch size must be positive".into()));
        }
        if self.control_channel_size == 0 || self.flush_channel_size == 0 {
            return Err(DriftError::Config("channel sizes must be positive".into()));
        }
        Ok(())
    }
}
