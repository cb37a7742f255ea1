//! Persisted table settings
//!
//! 16 bytes, big-endian:
//!
//! ```text
//! | version (4) | TTL ns (8) | sharding factor (4) |
//! ```

use crate::util::{atomic_write, remove_if_exists};
use crate::{DriftError, Result};
use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

pub const TABLE_METADATA_FILE: &str = "table.metadata";
pub const TABLE_METADATA_SIZE: usize = 16;

const TABLE_METADATA_VERSION: u32 = 0;

/// TTL and sharding factor of a table. Readable from any thread; updates
/// are serialized and written atomically.
pub struct TableMetadata {
    path: PathBuf,
    ttl_ns: AtomicU64,
    sharding_factor: AtomicU32,
    write_lock: Mutex<()>,
    fsync: bool,
}

impl TableMetadata {
    /// Load the metadata in `table_dir`, creating it from the given values
    /// if the table is new. Returns whether it was created.
    pub fn load_or_create(
        table_dir: &Path,
        ttl: Duration,
        sharding_factor: u32,
        fsync: bool,
    ) -> Result<(Self, bool)> {
        let path = table_dir.join(TABLE_METADATA_FILE);
        if path.exists() {
            return Ok((Self::load(table_dir, fsync)?, false));
        }

        let metadata = Self {
            path,
            ttl_ns: AtomicU64::new(duration_to_ns(ttl)),
            sharding_factor: AtomicU32::new(sharding_factor),
            write_lock: Mutex::new(()),
            fsync,
        };
        metadata.write()?;
        Ok((metadata, true))
    }

    pub fn load(table_dir: &Path, fsync: bool) -> Result<Self> {
        let path = table_dir.join(TABLE_METADATA_FILE);
        let data = fs::read(&path)?;
        let (ttl_ns, sharding_factor) = Self::deserialize(&data)?;
        Ok(Self {
            path,
            ttl_ns: AtomicU64::new(ttl_ns),
            sharding_factor: AtomicU32::new(sharding_factor),
            write_lock: Mutex::new(()),
            fsync,
        })
    }

    pub fn serialize(ttl_ns: u64, sharding_factor: u32) -> BytesMut {
        let mut buf = BytesMut::with_capacity(TABLE_METADATA_SIZE);
        buf.put_u32(TABLE_METADATA_VERSION);
        buf.put_u64(ttl_ns);
        buf.put_u32(sharding_factor);
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<(u64, u32)> {
        if data.len() != TABLE_METADATA_SIZE {
            return Err(DriftError::InvalidFormat(format!(
                "table metadata is {} bytes, expected {}",
                data.len(),
                TABLE_METADATA_SIZE
            )));
        }
        let mut buf = data;
        let version = buf.get_u32();
        if version != TABLE_METADATA_VERSION {
            return Err(DriftError::InvalidFormat(format!(
                "unsupported table metadata version {}",
                version
            )));
        }
        let ttl_ns = buf.get_u64();
        let sharding_factor = buf.get_u32();
        if sharding_factor == 0 {
            return Err(DriftError::InvalidFormat(
                "table metadata has a sharding factor of 0".into(),
            ));
        }
        Ok((ttl_ns, sharding_factor))
    }

    fn write(&self) -> Result<()> {
        let data = Self::serialize(
            self.ttl_ns.load(Ordering::SeqCst),
            self.sharding_factor.load(Ordering::SeqCst),
        );
        atomic_write(&self.path, &data, self.fsync)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_nanos(self.ttl_ns.load(Ordering::SeqCst))
    }

    pub fn sharding_factor(&self) -> u32 {
        self.sharding_factor.load(Ordering::SeqCst)
    }

    pub fn set_ttl(&self, ttl: Duration) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.ttl_ns.store(duration_to_ns(ttl), Ordering::SeqCst);
        self.write()
    }

    pub fn set_sharding_factor(&self, sharding_factor: u32) -> Result<()> {
        if sharding_factor == 0 {
            return Err(DriftError::InvalidArgument(
                "sharding factor must be at least 1".into(),
            ));
        }
        let _guard = self.write_lock.lock();
        self.sharding_factor.store(sharding_factor, Ordering::SeqCst);
        self.write()
    }

    pub fn size(&self) -> u64 {
        TABLE_METADATA_SIZE as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delete(&self) -> Result<()> {
        remove_if_exists(&self.path)?;
        Ok(())
    }
}

fn duration_to_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
