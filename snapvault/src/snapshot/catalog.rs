//! Snapshot catalog: the ordered list of snapshots in one storage location.
//!
//! A catalog is always read fresh from the filesystem. Callers re-list after
//! anything that adds or removes snapshots instead of keeping one around.

use super::{parse_snapshot_name, Snapshot};
use crate::utils::errors::{Result, SnapError};
use chrono::NaiveDateTime;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Chronological direction of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Snapshots found in one storage root.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    order: SortOrder,
    snapshots: Vec<Snapshot>,
}

impl Catalog {
    /// List the snapshots in the local directory `root`.
    ///
    /// Only immediate subdirectories are considered and symlinks are not
    /// followed. Entries whose names are not snapshot names are skipped.
    ///
    /// # Errors
    /// * `NotFound` - `root` does not exist
    /// * `NotReadable` - `root` cannot be listed, or listing failed part way
    pub fn list(root: &Path, order: SortOrder) -> Result<Self> {
        match std::fs::metadata(root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(SnapError::NotFound(root.to_path_buf())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SnapError::NotFound(root.to_path_buf()))
            }
            Err(e) => return Err(not_readable(root, e)),
        }

        let entries = std::fs::read_dir(root).map_err(|e| not_readable(root, e))?;

        let mut names = Vec::new();
        for entry in entries {
            // A partial listing must never drive a deletion, so any error
            // while iterating fails the whole listing.
            let entry = entry.map_err(|e| not_readable(root, e))?;
            let file_type = entry.file_type().map_err(|e| not_readable(root, e))?;
            if !file_type.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => debug!(entry = ?raw, "Skipping non UTF-8 catalog entry"),
            }
        }

        Ok(Self::from_names(root, names, order))
    }

    /// Build a catalog from directory names listed elsewhere (e.g. over ssh).
    pub fn from_names<I, S>(root: &Path, names: I, order: SortOrder) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let snapshots = names
            .into_iter()
            .filter_map(|name| {
                let name = name.as_ref();
                match parse_snapshot_name(name) {
                    Some(timestamp) => Some(Snapshot::new(timestamp, root.join(name))),
                    None => {
                        debug!(root = %root.display(), entry = name, "Ignoring unparsable catalog entry");
                        None
                    }
                }
            })
            .collect();
        Self::from_snapshots(root, snapshots, order)
    }

    /// Build a catalog from snapshots, sorting them and dropping duplicates.
    pub fn from_snapshots(root: &Path, mut snapshots: Vec<Snapshot>, order: SortOrder) -> Self {
        snapshots.sort_by_key(|s| s.timestamp);
        snapshots.dedup_by_key(|s| s.timestamp);
        if order == SortOrder::Descending {
            snapshots.reverse();
        }
        Self {
            root: root.to_path_buf(),
            order,
            snapshots,
        }
    }

    /// Empty catalog for `root`.
    pub fn empty(root: &Path, order: SortOrder) -> Self {
        Self::from_snapshots(root, Vec::new(), order)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn into_snapshots(self) -> Vec<Snapshot> {
        self.snapshots
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Most recent snapshot.
    pub fn latest(&self) -> Option<&Snapshot> {
        match self.order {
            SortOrder::Ascending => self.snapshots.last(),
            SortOrder::Descending => self.snapshots.first(),
        }
    }

    /// Oldest snapshot.
    pub fn oldest(&self) -> Option<&Snapshot> {
        match self.order {
            SortOrder::Ascending => self.snapshots.first(),
            SortOrder::Descending => self.snapshots.last(),
        }
    }

    pub fn get(&self, timestamp: NaiveDateTime) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.timestamp == timestamp)
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        self.get(timestamp).is_some()
    }

    /// Same snapshots in the other direction.
    pub fn reordered(mut self, order: SortOrder) -> Self {
        if self.order != order {
            self.snapshots.reverse();
            self.order = order;
        }
        self
    }
}

fn not_readable(root: &Path, source: std::io::Error) -> SnapError {
    SnapError::NotReadable {
        path: root.to_path_buf(),
        source,
    }
}
