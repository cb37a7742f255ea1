//! Key to shard assignment

use xxhash_rust::xxh64::xxh64;

/// Shard holding `key` in a segment with the given salt and sharding factor.
///
/// Each segment draws its own random salt, so an outside party cannot steer
/// keys into one shard without knowing it.
pub fn shard_for(key: &[u8], salt: u32, sharding_factor: u32) -> u32 {
    if sharding_factor <= 1 {
        return 0;
    }
    (xxh64(key, u64::from(salt)) % u64::from(sharding_factor)) as u32
}

/// Storage root index for a shard's value file.
///
/// Metadata and keys live in root 0; shards are spread starting at root 1.
pub fn root_for_shard(shard: u32, root_count: usize) -> usize {
    (shard as usize + 1) % root_count
}
