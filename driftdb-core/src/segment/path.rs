//! Directory layout for one storage root of a table

use crate::util::ensure_dir;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the directory holding segment files under `<root>/<table>/`
pub const SEGMENTS_DIR: &str = "segments";

/// Name of the hard-link snapshot directory under `<root>/<table>/`
pub const SNAPSHOT_DIR: &str = "snapshot";

/// Where a segment's files live within one storage root, and where they are
/// linked to when snapshots are enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPath {
    segment_dir: PathBuf,
    hard_link_dir: Option<PathBuf>,
    soft_link_dir: Option<PathBuf>,
}

impl SegmentPath {
    /// A path without snapshot support
    pub fn new(segment_dir: impl Into<PathBuf>) -> Self {
        Self {
            segment_dir: segment_dir.into(),
            hard_link_dir: None,
            soft_link_dir: None,
        }
    }

    /// Build one path per storage root for `table`.
    ///
    /// With a snapshot root, sealed files are hard-linked into
    /// `<root>/<table>/snapshot/` and symlinked from
    /// `<snapshot_root>/<table>/segments/`.
    pub fn build(roots: &[PathBuf], snapshot_root: Option<&Path>, table: &str) -> Vec<SegmentPath> {
        roots
            .iter()
            .map(|root| {
                let table_dir = root.join(table);
                let (hard_link_dir, soft_link_dir) = match snapshot_root {
                    Some(snapshot_root) => (
                        Some(table_dir.join(SNAPSHOT_DIR)),
                        Some(snapshot_root.join(table).join(SEGMENTS_DIR)),
                    ),
                    None => (None, None),
                };
                SegmentPath {
                    segment_dir: table_dir.join(SEGMENTS_DIR),
                    hard_link_dir,
                    soft_link_dir,
                }
            })
            .collect()
    }

    pub fn segment_dir(&self) -> &Path {
        &self.segment_dir
    }

    pub fn hard_link_dir(&self) -> Option<&Path> {
        self.hard_link_dir.as_deref()
    }

    pub fn soft_link_dir(&self) -> Option<&Path> {
        self.soft_link_dir.as_deref()
    }

    pub fn snapshots_enabled(&self) -> bool {
        self.hard_link_dir.is_some() && self.soft_link_dir.is_some()
    }

    /// Full path of a file inside the segment directory
    pub fn file(&self, name: &str) -> PathBuf {
        self.segment_dir.join(name)
    }

    /// Create every directory this path refers to
    pub fn ensure_dirs(&self) -> Result<()> {
        ensure_dir(&self.segment_dir)?;
        if let Some(dir) = &self.hard_link_dir {
            ensure_dir(dir)?;
        }
        if let Some(dir) = &self.soft_link_dir {
            ensure_dir(dir)?;
        }
        Ok(())
    }

    /// Link a sealed file into the snapshot trees. Existing links are kept.
    pub fn snapshot_file(&self, name: &str) -> Result<()> {
        let (hard_dir, soft_dir) = match (&self.hard_link_dir, &self.soft_link_dir) {
            (Some(hard), Some(soft)) => (hard, soft),
            _ => return Ok(()),
        };

        let source = self.segment_dir.join(name);
        let hard_link = hard_dir.join(name);
        if !hard_link.exists() {
            fs::hard_link(&source, &hard_link)?;
        }

        let soft_link = soft_dir.join(name);
        if fs::symlink_metadata(&soft_link).is_err() {
            symlink(&hard_link, &soft_link)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> Result<()> {
    fs::copy(target, link)?;
    Ok(())
}
