//! The sync driver: turns a source tree into a new snapshot.
//!
//! The driver owns the data transfer. Given a baseline it hardlinks unchanged
//! files instead of copying them, and given a mv-record it also recognises
//! files that were only moved or renamed since the baseline was taken.

pub mod rsync;
pub mod stats;

pub use rsync::{RsyncDriver, RsyncOptions};

use crate::storage::Location;
use crate::utils::errors::Result;

/// Parameters of one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Tree to back up
    pub source: Location,

    /// Snapshot directory to create
    pub destination: Location,

    /// Previous snapshot on the destination side, used as hardlink source
    pub baseline: Option<Location>,

    /// Hardlink mirror of the source as of `baseline`, on the source side
    pub mv_record: Option<Location>,

    /// Only report whether anything would change
    pub dry_run: bool,
}

impl SyncRequest {
    pub fn new(source: Location, destination: Location) -> Self {
        Self {
            source,
            destination,
            baseline: None,
            mv_record: None,
            dry_run: false,
        }
    }

    pub fn with_baseline(mut self, baseline: Option<Location>) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_mv_record(mut self, mv_record: Option<Location>) -> Self {
        self.mv_record = mv_record;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Whether a sync found differences between source and baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Changed,
    Unchanged,
}

/// Performs the transfer for a [`SyncRequest`].
#[allow(async_fn_in_trait)]
pub trait SyncDriver {
    /// Create `request.destination` (or, for a dry run, only compare).
    ///
    /// On failure no snapshot directory is left behind.
    async fn sync(&self, request: &SyncRequest) -> Result<SyncOutcome>;
}
