//! Crash-recovery scanner
//!
//! Inventories every segment file across all storage roots and rebuilds the
//! segment chain. Segments are created and deleted in index order, so an
//! unclean shutdown can only leave an incomplete file set at the lowest index
//! (interrupted deletion) or the highest index (interrupted creation). Those
//! segments are discarded. An incomplete segment anywhere else means data was
//! lost and the table refuses to open.

use super::{
    Segment, SegmentMetadata, SegmentPath, KEY_FILE_EXTENSION, METADATA_FILE_EXTENSION,
    VALUE_FILE_EXTENSION,
};
use crate::util::{remove_if_exists, FatalErrorHandler, SWAP_EXTENSION};
use crate::{DriftError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Segments recovered from disk
pub struct ScanResult {
    /// Lowest surviving index (meaningless when `segments` is empty)
    pub lowest: u32,
    /// Highest surviving index (meaningless when `segments` is empty)
    pub highest: u32,
    /// Loaded, sealed segments, each linked to its successor
    pub segments: BTreeMap<u32, Arc<Segment>>,
    /// Index to give the next segment created
    pub next_index: u32,
}

impl ScanResult {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Every segment file found on disk, grouped by segment index
#[derive(Default)]
struct Inventory {
    metadata: BTreeMap<u32, PathBuf>,
    keys: BTreeMap<u32, PathBuf>,
    values: BTreeMap<u32, BTreeMap<u32, PathBuf>>,
    garbage: Vec<PathBuf>,
}

impl Inventory {
    fn gather(paths: &[SegmentPath]) -> Result<Self> {
        let value_name = Regex::new(&format!(r"^(\d+)-(\d+)\.{}$", VALUE_FILE_EXTENSION))
            .map_err(|e| DriftError::Internal(e.to_string()))?;
        let metadata_suffix = format!(".{}", METADATA_FILE_EXTENSION);
        let keys_suffix = format!(".{}", KEY_FILE_EXTENSION);
        let swap_suffix = format!(".{}", SWAP_EXTENSION);

        let mut inventory = Inventory::default();
        for path in paths {
            let dir = path.segment_dir();
            if !dir.exists() {
                continue;
            }

            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let file_path = entry.path();
                let name = match file_path.file_name().and_then(|n| n.to_str()) {
                    Some(name) => name.to_string(),
                    None => {
                        warn!("Ignoring file with non UTF-8 name {:?}", file_path);
                        continue;
                    }
                };

                if name.ends_with(&swap_suffix) {
                    inventory.garbage.push(file_path);
                } else if let Some(captures) = value_name.captures(&name) {
                    match (captures[1].parse::<u32>(), captures[2].parse::<u32>()) {
                        (Ok(index), Ok(shard)) => {
                            inventory.values.entry(index).or_default().insert(shard, file_path);
                        }
                        _ => warn!("Ignoring value file with unparseable name {:?}", file_path),
                    }
                } else if let Some(index) = parse_index(&name, &metadata_suffix) {
                    inventory.metadata.insert(index, file_path);
                } else if let Some(index) = parse_index(&name, &keys_suffix) {
                    inventory.keys.insert(index, file_path);
                } else {
                    warn!("Ignoring unrecognized file {:?}", file_path);
                }
            }
        }
        Ok(inventory)
    }

    fn indices(&self) -> BTreeSet<u32> {
        self.metadata
            .keys()
            .chain(self.keys.keys())
            .chain(self.values.keys())
            .copied()
            .collect()
    }

    /// Names of the files segment `index` is missing
    fn missing_files(&self, index: u32, paths: &[SegmentPath], fsync: bool) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        if !self.keys.contains_key(&index) {
            missing.push(KEY_FILE_EXTENSION.to_string());
        }

        let shards = self.values.get(&index);
        if !self.metadata.contains_key(&index) {
            missing.push(METADATA_FILE_EXTENSION.to_string());
            if shards.map_or(true, |s| s.is_empty()) {
                missing.push(VALUE_FILE_EXTENSION.to_string());
            }
            return Ok(missing);
        }

        let metadata = SegmentMetadata::load(index, paths[0].clone(), fsync)?;
        let sharding_factor = metadata.sharding_factor();
        if let Some(shards) = shards {
            if let Some(extra) = shards.keys().find(|shard| **shard >= sharding_factor) {
                return Err(DriftError::Corruption(format!(
                    "segment {} has a value file for shard {} but only {} shards",
                    index, extra, sharding_factor
                )));
            }
        }
        for shard in 0..sharding_factor {
            if !shards.map_or(false, |s| s.contains_key(&shard)) {
                missing.push(format!("shard {} {}", shard, VALUE_FILE_EXTENSION));
            }
        }
        Ok(missing)
    }

    /// Delete whatever files segment `index` still has
    fn remove_segment(&self, index: u32) -> Result<usize> {
        let mut removed = 0;
        let mut files: Vec<&PathBuf> = Vec::new();
        files.extend(self.keys.get(&index));
        if let Some(shards) = self.values.get(&index) {
            files.extend(shards.values());
        }
        files.extend(self.metadata.get(&index));

        for file in files {
            if remove_if_exists(file)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn parse_index(name: &str, suffix: &str) -> Option<u32> {
    name.strip_suffix(suffix).and_then(|s| s.parse().ok())
}

/// Scan all storage roots, discard damaged boundary segments, and load the
/// rest as a linked chain. `now` is used as the seal time of any segment
/// that was still mutable when the previous process stopped.
pub fn scan_segments(
    paths: &[SegmentPath],
    now: u64,
    fatal: Arc<FatalErrorHandler>,
    fsync: bool,
) -> Result<ScanResult> {
    if paths.is_empty() {
        return Err(DriftError::Config("no storage roots configured".into()));
    }

    let inventory = Inventory::gather(paths)?;

    for garbage in &inventory.garbage {
        info!("Deleting leftover swap file {:?}", garbage);
        remove_if_exists(garbage)?;
    }

    let indices = inventory.indices();
    let (first, last) = match (indices.iter().next(), indices.iter().next_back()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => {
            return Ok(ScanResult {
                lowest: 0,
                highest: 0,
                segments: BTreeMap::new(),
                next_index: 0,
            })
        }
    };

    // Surviving range as signed bounds so an emptied range is representable.
    let mut lowest = i64::from(first);
    let mut highest = i64::from(last);

    for index in first..=last {
        let missing = inventory.missing_files(index, paths, fsync)?;
        if missing.is_empty() {
            continue;
        }

        if index != first && index != last {
            return Err(DriftError::MissingFile {
                index,
                kind: missing.join(", "),
            });
        }

        let removed = inventory.remove_segment(index)?;
        warn!(
            "Segment {} is missing its {} file(s), deleted {} orphaned file(s)",
            index,
            missing.join(", "),
            removed
        );
        if index == first {
            lowest += 1;
        }
        if index == last {
            highest -= 1;
        }
    }

    let mut segments = BTreeMap::new();
    if lowest <= highest {
        let mut previous: Option<Arc<Segment>> = None;
        for index in lowest as u32..=highest as u32 {
            let segment = Segment::load(index, paths, now, fatal.clone(), fsync)?;
            if let Some(previous) = &previous {
                previous.set_next(segment.clone())?;
            }
            previous = Some(segment.clone());
            segments.insert(index, segment);
        }
        info!("Recovered segments {} through {}", lowest, highest);
    }

    let next_index = if segments.is_empty() {
        u64::from(last) + 1
    } else {
        highest as u64 + 1
    };
    let next_index = u32::try_from(next_index)
        .map_err(|_| DriftError::Corruption("segment index space exhausted".into()))?;

    Ok(ScanResult {
        lowest: lowest.max(0) as u32,
        highest: highest.max(0) as u32,
        segments,
        next_index,
    })
}
