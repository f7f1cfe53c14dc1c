//! Snapshot identity and the on-disk name encoding.
//!
//! A snapshot directory is named after the local wall-clock time it was taken
//! at, using `%Y-%m-%d_%H-%M-%S` (e.g. `2017-03-08_15-23-11`). The encoding is
//! fixed width and zero padded, so sorting names lexicographically sorts the
//! snapshots chronologically. The name is both the sort key and the identity.

pub mod catalog;

pub use catalog::{Catalog, SortOrder};

use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Directory name format of a snapshot.
pub const SNAPSHOT_NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Length of an encoded snapshot name.
const SNAPSHOT_NAME_LEN: usize = 19;

/// One backup directory inside a storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Time the snapshot was taken (second resolution)
    pub timestamp: NaiveDateTime,

    /// Full path of the snapshot directory
    pub location: PathBuf,
}

impl Snapshot {
    pub fn new(timestamp: NaiveDateTime, location: PathBuf) -> Self {
        Self { timestamp, location }
    }

    /// Snapshot `timestamp` placed inside the storage root `root`.
    pub fn in_root(root: &Path, timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            location: root.join(format_snapshot_name(timestamp)),
        }
    }

    /// Encoded directory name.
    pub fn name(&self) -> String {
        format_snapshot_name(self.timestamp)
    }

    pub fn path(&self) -> &Path {
        &self.location
    }
}

/// Encode `timestamp` as a snapshot directory name.
pub fn format_snapshot_name(timestamp: NaiveDateTime) -> String {
    timestamp.format(SNAPSHOT_NAME_FORMAT).to_string()
}

/// Parse a directory name as a snapshot timestamp.
///
/// Only the exact encoding is accepted: chrono alone would tolerate
/// unpadded fields, which would break the name/sort-order equivalence.
pub fn parse_snapshot_name(name: &str) -> Option<NaiveDateTime> {
    if name.len() != SNAPSHOT_NAME_LEN {
        return None;
    }
    let well_formed = name.bytes().enumerate().all(|(i, b)| match i {
        4 | 7 => b == b'-',
        10 => b == b'_',
        13 | 16 => b == b'-',
        _ => b.is_ascii_digit(),
    });
    if !well_formed {
        return None;
    }
    NaiveDateTime::parse_from_str(name, SNAPSHOT_NAME_FORMAT).ok()
}
