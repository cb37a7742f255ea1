//! DriftDB Core - Segmented Append-Only Key-Value Table Engine
//!
//! A disk-resident table of write-once key/value pairs built for:
//! - High write throughput (writes buffer in memory and never wait on disk)
//! - Time-based expiry (whole segments are dropped once their TTL passes)
//! - Clean recovery after an unclean shutdown
//!
//! # Architecture
//!
//! A table is a chain of segments spread over one or more storage roots:
//!
//! - **Segment**: a file trio of metadata, a key log, and one value log per shard
//! - **Keymap**: index from key to the address of its value
//! - **Control loop**: the single owner of segment structure (writes, sealing, GC)
//! - **Flush loop**: performs flush and seal I/O, then publishes durable keys
//! - **Scanner**: rebuilds the segment chain from disk when a table opens

pub mod keymap;
pub mod segment;
pub mod table;
pub mod util;

mod error;
mod types;

pub use error::{DriftError, Result};
pub use keymap::{Keymap, KeymapKind, MemKeymap};
pub use table::{CachedValue, Clock, DiskTable, TableConfig};
pub use types::*;
pub use util::FatalCallback;

/// DriftDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Shards per segment for new tables
    pub const DEFAULT_SHARDING_FACTOR: u32 = 8;

    /// Shard value file size that triggers a new segment (the address limit)
    pub const TARGET_SEGMENT_FILE_SIZE: u32 = u32::MAX;

    /// Keys per segment that trigger a new segment
    pub const MAX_SEGMENT_KEY_COUNT: u32 = 50_000;

    /// Key file size that triggers a new segment (2MB)
    pub const TARGET_KEY_FILE_SIZE: u64 = 2 * 1024 * 1024;

    /// Interval between garbage collection runs (5 minutes)
    pub const GC_PERIOD_SECS: u64 = 300;

    /// Keys removed from the keymap per call during garbage collection
    pub const GC_BATCH_SIZE: usize = 10_000;

    /// Control loop queue capacity
    pub const CONTROL_CHANNEL_SIZE: usize = 64;

    /// Flush loop queue capacity
    pub const FLUSH_CHANNEL_SIZE: usize = 8;

    /// Keys inserted per keymap call while rebuilding it on open
    pub const KEYMAP_RELOAD_BATCH_SIZE: usize = 1024;
}
