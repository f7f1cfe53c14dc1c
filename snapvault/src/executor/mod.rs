//! Backup executor - applies catalog, chain and retention decisions.
//!
//! This is the only place where decisions turn into side effects:
//! - list the storage location (always fresh)
//! - resolve the baseline, run the sync driver
//! - refresh the mv-record
//! - re-list and apply the retention policy
//!
//! Everything runs sequentially; one executor per storage location at a time.

use crate::chain::{plan_mirror, resolve_primary, MirrorStep};
use crate::retention::{RetentionDecision, RetentionPolicy};
use crate::snapshot::{format_snapshot_name, Catalog, SortOrder};
use crate::storage::{Access, DirStatus, Location, StorageMutator};
use crate::sync::{SyncDriver, SyncOutcome, SyncRequest};
use crate::utils::errors::{Result, SnapError};
use chrono::{Local, NaiveDateTime, Timelike};
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Backup job configuration
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub source: Location,
    pub destination: Location,
    pub mv_record: Option<Location>,
    pub only_if_changed: bool,
    pub dry_run: bool,
    pub retention: Option<RetentionPolicy>,
}

impl BackupJob {
    pub fn new(source: Location, destination: Location) -> Self {
        Self {
            source,
            destination,
            mv_record: None,
            only_if_changed: false,
            dry_run: false,
            retention: None,
        }
    }
}

/// What a backup run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStatus {
    /// A new snapshot was created
    Created,
    /// Nothing changed since the latest snapshot, none was created
    Unchanged,
    /// Dry run only; carries what a real run would find
    DryRun(SyncOutcome),
}

/// Backup execution result
#[derive(Debug)]
pub struct BackupReport {
    pub status: BackupStatus,
    pub snapshot: Option<Location>,
    pub baseline: Option<Location>,
    pub cleanup: Option<RetentionDecision>,
    pub duration: Duration,
}

type Clock = Box<dyn Fn() -> NaiveDateTime + Send + Sync>;

fn local_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Main backup executor
pub struct BackupExecutor<D, S> {
    driver: D,
    storage: S,
    clock: Clock,
}

impl<D: SyncDriver, S: StorageMutator> BackupExecutor<D, S> {
    pub fn new(driver: D, storage: S) -> Self {
        Self {
            driver,
            storage,
            clock: Box::new(local_now),
        }
    }

    /// Replace the wall clock used to name snapshots
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    async fn require_dir(&self, loc: &Location, access: Access) -> Result<()> {
        match self.storage.dir_status(loc, access).await? {
            DirStatus::Ok => Ok(()),
            DirStatus::Missing => Err(SnapError::NotFound(loc.path().to_path_buf())),
            DirStatus::Denied => match access {
                Access::Read => Err(SnapError::NotReadable {
                    path: loc.path().to_path_buf(),
                    source: ErrorKind::PermissionDenied.into(),
                }),
                Access::Write => Err(SnapError::NotWritable(loc.to_string())),
            },
        }
    }

    /// Create a new snapshot of `job.source` in `job.destination`.
    pub async fn backup(&self, job: &BackupJob) -> Result<BackupReport> {
        let start_time = Instant::now();

        check_layout(job)?;

        self.require_dir(&job.source, Access::Read).await?;
        self.require_dir(&job.destination, Access::Write).await?;

        let catalog = self.storage.catalog(&job.destination, SortOrder::Descending).await?;
        let baseline = resolve_primary(&catalog).map(|p| job.destination.with_path(p));

        info!(
            source = %job.source,
            destination = %job.destination,
            snapshots = catalog.len(),
            baseline = baseline.as_ref().map(ToString::to_string).as_deref().unwrap_or("none"),
            "Starting backup"
        );

        if job.dry_run || (job.only_if_changed && baseline.is_some()) {
            let change_check = SyncRequest::new(job.source.clone(), job.destination.join("dry-run"))
                .with_baseline(baseline.clone())
                .dry_run(true);
            let outcome = self.driver.sync(&change_check).await?;

            let status = if job.dry_run {
                Some(BackupStatus::DryRun(outcome))
            } else if outcome == SyncOutcome::Unchanged {
                Some(BackupStatus::Unchanged)
            } else {
                None
            };

            if let Some(status) = status {
                info!(?status, "No snapshot created");
                return Ok(BackupReport {
                    status,
                    snapshot: None,
                    baseline,
                    cleanup: None,
                    duration: start_time.elapsed(),
                });
            }
        }

        let timestamp = (self.clock)();
        let name = format_snapshot_name(timestamp);
        if catalog.contains(timestamp) {
            return Err(SnapError::SnapshotExists(name));
        }
        let snapshot = job.destination.join(&name);

        let request = SyncRequest::new(job.source.clone(), snapshot.clone())
            .with_baseline(baseline.clone())
            .with_mv_record(job.mv_record.clone());
        self.driver.sync(&request).await?;
        info!(snapshot = %snapshot, "Snapshot created");

        if let Some(mv_record) = &job.mv_record {
            self.storage.hardlink_copy(&job.source, mv_record).await?;
            info!(mv_record = %mv_record, "mv-record updated");
        }

        let cleanup = match &job.retention {
            Some(policy) => Some(self.clean(&job.destination, policy, false).await?),
            None => None,
        };

        let duration = start_time.elapsed();
        info!(snapshot = %snapshot, duration_secs = duration.as_secs(), "Backup complete");

        Ok(BackupReport {
            status: BackupStatus::Created,
            snapshot: Some(snapshot),
            baseline,
            cleanup,
            duration,
        })
    }

    /// Apply `policy` to the snapshots in `location`.
    ///
    /// # Errors
    /// `InvalidRule` for a policy without rules; listing errors abort before
    /// anything is deleted.
    pub async fn clean(&self, location: &Location, policy: &RetentionPolicy, dry_run: bool) -> Result<RetentionDecision> {
        if policy.is_empty() {
            return Err(SnapError::InvalidRule(
                "no retention rules configured, refusing to clean".to_string(),
            ));
        }

        let catalog = self.storage.catalog(location, SortOrder::Descending).await?;
        let decision = policy.decide(&catalog);

        info!(
            location = %location,
            policy = %policy,
            keep = decision.keep.len(),
            delete = decision.delete.len(),
            dry_run,
            "Retention decided"
        );
        if !catalog.is_empty() {
            info!("\n{}", decision.report());
        }

        if !dry_run {
            for snapshot in &decision.delete {
                self.storage.remove(&location.with_path(&snapshot.location)).await?;
            }
        }

        Ok(decision)
    }

    /// Copy every snapshot of `source` missing from `mirror`, oldest first.
    pub async fn mirror(&self, source: &Location, mirror: &Location, dry_run: bool) -> Result<Vec<MirrorStep>> {
        self.require_dir(mirror, Access::Write).await?;

        let source_catalog = self.storage.catalog(source, SortOrder::Ascending).await?;
        let mirror_catalog = self.storage.catalog(mirror, SortOrder::Ascending).await?;
        let plan = plan_mirror(&source_catalog, &mirror_catalog);

        info!(
            source = %source,
            mirror = %mirror,
            source_snapshots = source_catalog.len(),
            mirror_snapshots = mirror_catalog.len(),
            missing = plan.len(),
            "Mirror planned"
        );

        for (idx, step) in plan.iter().enumerate() {
            info!(
                "[{}/{}] {} (baseline: {}, mv-record: {})",
                idx + 1,
                plan.len(),
                step.target.name(),
                display_opt(step.baseline.as_deref()),
                display_opt(step.mv_record.as_deref()),
            );
            if dry_run {
                continue;
            }

            let request = SyncRequest::new(
                source.with_path(&step.target.location),
                mirror.with_path(&step.destination),
            )
            .with_baseline(step.baseline.as_ref().map(|p| mirror.with_path(p)))
            .with_mv_record(step.mv_record.as_ref().map(|p| source.with_path(p)));
            self.driver.sync(&request).await?;
        }

        if !dry_run && !plan.is_empty() {
            let refreshed = self.storage.catalog(mirror, SortOrder::Ascending).await?;
            let missing: Vec<String> = plan
                .iter()
                .filter(|step| !refreshed.contains(step.target.timestamp))
                .map(|step| step.target.name())
                .collect();
            if !missing.is_empty() {
                warn!(?missing, "Mirror incomplete after sync");
                return Err(SnapError::Sync(format!(
                    "snapshots missing from mirror after sync: {}",
                    missing.join(", ")
                )));
            }
        }

        Ok(plan)
    }

    /// Newest-first catalog of `location`.
    pub async fn list(&self, location: &Location) -> Result<Catalog> {
        self.storage.catalog(location, SortOrder::Descending).await
    }
}

/// Reject layouts where a backup would copy into, or replace, its own source.
fn check_layout(job: &BackupJob) -> Result<()> {
    let source = &job.source;

    if job.destination.is_within(source) {
        return Err(SnapError::Config(format!(
            "destination {} lies inside the source {source}",
            job.destination
        )));
    }

    if let Some(mv_record) = &job.mv_record {
        if !mv_record.same_host(source) {
            return Err(SnapError::Config(format!(
                "mv-record {mv_record} must be on the same host as the source {source}"
            )));
        }
        // Refreshing the mv-record replaces it with a hardlink copy of the source
        if mv_record.is_within(source) || source.is_within(mv_record) {
            return Err(SnapError::Config(format!(
                "mv-record {mv_record} and the source {source} must not contain each other"
            )));
        }
        if mv_record.is_within(&job.destination) {
            return Err(SnapError::Config(format!(
                "mv-record {mv_record} lies inside the destination {}",
                job.destination
            )));
        }
    }
    Ok(())
}

fn display_opt(path: Option<&std::path::Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "none".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::{IntervalKind, KeepReason};
    use crate::snapshot::test_support::ts;
    use crate::storage::catalog_from_listing;
    use chrono::Duration as ChronoDuration;
    use std::collections::BTreeSet;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    /// Directory tree kept in memory; hosts are ignored.
    #[derive(Clone, Default)]
    struct MemoryStorage {
        dirs: Arc<Mutex<BTreeSet<PathBuf>>>,
        denied: Arc<Mutex<BTreeSet<PathBuf>>>,
        removed: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl MemoryStorage {
        fn with_dirs(dirs: &[&str]) -> Self {
            let storage = Self::default();
            for dir in dirs {
                storage.insert(Path::new(dir));
            }
            storage
        }

        fn insert(&self, path: &Path) {
            self.dirs.lock().unwrap().insert(path.to_path_buf());
        }

        /// Existing directory without the requested access
        fn deny(&self, path: &str) {
            self.denied.lock().unwrap().insert(PathBuf::from(path));
        }

        fn drop_tree(&self, path: &Path) {
            self.dirs.lock().unwrap().retain(|d| !d.starts_with(path));
        }

        fn removed(&self) -> Vec<PathBuf> {
            self.removed.lock().unwrap().clone()
        }

        fn contains(&self, path: &str) -> bool {
            self.dirs.lock().unwrap().contains(Path::new(path))
        }

        fn children(&self, path: &str) -> Vec<String> {
            let mut names = child_names(self, Path::new(path));
            names.sort();
            names
        }
    }

    fn child_names(storage: &MemoryStorage, path: &Path) -> Vec<String> {
        storage
            .dirs
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.parent() == Some(path))
            .filter_map(|d| d.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect()
    }

    impl StorageMutator for MemoryStorage {
        async fn dir_status(&self, loc: &Location, _access: Access) -> Result<DirStatus> {
            if self.denied.lock().unwrap().contains(loc.path()) {
                Ok(DirStatus::Denied)
            } else if self.dirs.lock().unwrap().contains(loc.path()) {
                Ok(DirStatus::Ok)
            } else {
                Ok(DirStatus::Missing)
            }
        }

        async fn list_names(&self, loc: &Location) -> Result<Vec<String>> {
            Ok(child_names(self, loc.path()))
        }

        async fn remove(&self, loc: &Location) -> Result<()> {
            self.removed.lock().unwrap().push(loc.path().to_path_buf());
            self.drop_tree(loc.path());
            Ok(())
        }

        async fn rename(&self, src: &Location, dest: &Location) -> Result<()> {
            self.drop_tree(src.path());
            self.insert(dest.path());
            Ok(())
        }

        async fn hardlink_copy(&self, _src: &Location, dest: &Location) -> Result<()> {
            self.drop_tree(dest.path());
            self.insert(dest.path());
            Ok(())
        }
    }

    /// Records requests and materializes real syncs in the storage.
    #[derive(Clone)]
    struct FakeDriver {
        storage: MemoryStorage,
        requests: Arc<Mutex<Vec<SyncRequest>>>,
        dry_run_outcome: SyncOutcome,
    }

    impl FakeDriver {
        fn new(storage: &MemoryStorage, dry_run_outcome: SyncOutcome) -> Self {
            Self {
                storage: storage.clone(),
                requests: Arc::default(),
                dry_run_outcome,
            }
        }

        fn requests(&self) -> Vec<SyncRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl SyncDriver for FakeDriver {
        async fn sync(&self, request: &SyncRequest) -> Result<SyncOutcome> {
            self.requests.lock().unwrap().push(request.clone());
            if request.dry_run {
                return Ok(self.dry_run_outcome);
            }
            self.storage.insert(request.destination.path());
            Ok(SyncOutcome::Changed)
        }
    }

    fn build_executor(
        storage: &MemoryStorage,
        outcome: SyncOutcome,
        now: &str,
    ) -> (BackupExecutor<FakeDriver, MemoryStorage>, FakeDriver) {
        let driver = FakeDriver::new(storage, outcome);
        let now = ts(now);
        let executor = BackupExecutor::new(driver.clone(), storage.clone()).with_clock(move || now);
        (executor, driver)
    }

    fn job() -> BackupJob {
        BackupJob::new(Location::local("/src"), Location::local("/dest"))
    }

    fn day_policy(count: i64) -> RetentionPolicy {
        RetentionPolicy::from_counts(&[(IntervalKind::Day, count)], true).unwrap()
    }

    #[tokio::test]
    async fn test_first_backup_has_no_baseline() {
        let storage = MemoryStorage::with_dirs(&["/src", "/dest"]);
        let (executor, driver) = build_executor(&storage, SyncOutcome::Changed, "2017-03-08 15:23:11");

        let report = executor.backup(&job()).await.unwrap();

        assert_eq!(report.status, BackupStatus::Created);
        assert_eq!(
            report.snapshot,
            Some(Location::local("/dest/2017-03-08_15-23-11"))
        );
        assert!(report.baseline.is_none());
        assert!(report.cleanup.is_none());

        let requests = driver.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].baseline.is_none());
        assert!(!requests[0].dry_run);
        assert!(storage.contains("/dest/2017-03-08_15-23-11"));
    }

    #[tokio::test]
    async fn test_backup_builds_on_latest_and_refreshes_mv_record() {
        let storage = MemoryStorage::with_dirs(&[
            "/src",
            "/dest",
            "/dest/2017-03-06_10-00-00",
            "/dest/2017-03-07_10-00-00",
            "/dest/not-a-snapshot",
        ]);
        let (executor, driver) = build_executor(&storage, SyncOutcome::Changed, "2017-03-08 10:00:00");

        let mut job = job();
        job.mv_record = Some(Location::local("/mv-record"));
        let report = executor.backup(&job).await.unwrap();

        assert_eq!(
            report.baseline,
            Some(Location::local("/dest/2017-03-07_10-00-00"))
        );
        let requests = driver.requests();
        assert_eq!(requests[0].baseline, report.baseline);
        assert_eq!(requests[0].mv_record, Some(Location::local("/mv-record")));
        assert!(storage.contains("/mv-record"));
    }

    #[tokio::test]
    async fn test_only_if_changed_skips_unchanged_tree() {
        let storage = MemoryStorage::with_dirs(&["/src", "/dest", "/dest/2017-03-07_10-00-00"]);
        let (executor, driver) = build_executor(&storage, SyncOutcome::Unchanged, "2017-03-08 10:00:00");

        let mut job = job();
        job.only_if_changed = true;
        let report = executor.backup(&job).await.unwrap();

        assert_eq!(report.status, BackupStatus::Unchanged);
        assert!(report.snapshot.is_none());
        let requests = driver.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].dry_run);
        assert_eq!(storage.children("/dest"), vec!["2017-03-07_10-00-00"]);
    }

    #[tokio::test]
    async fn test_only_if_changed_without_baseline_backs_up() {
        let storage = MemoryStorage::with_dirs(&["/src", "/dest"]);
        let (executor, driver) = build_executor(&storage, SyncOutcome::Unchanged, "2017-03-08 10:00:00");

        let mut job = job();
        job.only_if_changed = true;
        let report = executor.backup(&job).await.unwrap();

        assert_eq!(report.status, BackupStatus::Created);
        let requests = driver.requests();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].dry_run);
    }

    #[tokio::test]
    async fn test_dry_run_creates_nothing() {
        let storage = MemoryStorage::with_dirs(&["/src", "/dest", "/dest/2017-03-07_10-00-00"]);
        let (executor, _driver) = build_executor(&storage, SyncOutcome::Changed, "2017-03-08 10:00:00");

        let mut job = job();
        job.dry_run = true;
        job.retention = Some(day_policy(1));
        let report = executor.backup(&job).await.unwrap();

        assert_eq!(report.status, BackupStatus::DryRun(SyncOutcome::Changed));
        assert!(report.cleanup.is_none());
        assert_eq!(storage.children("/dest"), vec!["2017-03-07_10-00-00"]);
    }

    #[tokio::test]
    async fn test_existing_snapshot_name_is_rejected() {
        let storage = MemoryStorage::with_dirs(&["/src", "/dest", "/dest/2017-03-08_10-00-00"]);
        let (executor, driver) = build_executor(&storage, SyncOutcome::Changed, "2017-03-08 10:00:00");

        let result = executor.backup(&job()).await;
        assert!(matches!(result, Err(SnapError::SnapshotExists(name)) if name == "2017-03-08_10-00-00"));
        assert!(driver.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_locations() {
        let storage = MemoryStorage::with_dirs(&["/dest"]);
        let (executor, _) = build_executor(&storage, SyncOutcome::Changed, "2017-03-08 10:00:00");
        assert!(matches!(
            executor.backup(&job()).await,
            Err(SnapError::NotFound(p)) if p == Path::new("/src")
        ));

        let storage = MemoryStorage::with_dirs(&["/src"]);
        let (executor, _) = build_executor(&storage, SyncOutcome::Changed, "2017-03-08 10:00:00");
        assert!(matches!(
            executor.backup(&job()).await,
            Err(SnapError::NotFound(p)) if p == Path::new("/dest")
        ));
    }

    #[tokio::test]
    async fn test_mv_record_must_share_source_host() {
        let storage = MemoryStorage::with_dirs(&["/src", "/dest"]);
        let (executor, _) = build_executor(&storage, SyncOutcome::Changed, "2017-03-08 10:00:00");

        let mut job = job();
        job.mv_record = Some(Location::remote("nas", "/mv-record"));
        assert!(matches!(executor.backup(&job).await, Err(SnapError::Config(_))));
    }

    #[tokio::test]
    async fn test_nested_layouts_are_rejected() {
        let storage = MemoryStorage::with_dirs(&["/home", "/home/backups", "/dest"]);
        let (executor, driver) = build_executor(&storage, SyncOutcome::Changed, "2017-03-08 10:00:00");

        let mut inside_source = BackupJob::new(Location::local("/home"), Location::local("/dest"));
        inside_source.mv_record = Some(Location::local("/home/.snapvault-mv-record"));

        let mut is_source = inside_source.clone();
        is_source.mv_record = Some(Location::local("/home"));

        let mut above_source = inside_source.clone();
        above_source.mv_record = Some(Location::local("/"));

        let mut inside_destination = inside_source.clone();
        inside_destination.mv_record = Some(Location::local("/dest/mv-record"));

        let dest_in_source = BackupJob::new(Location::local("/home"), Location::local("/home/backups"));

        for job in [inside_source, is_source, above_source, inside_destination, dest_in_source] {
            let result = executor.backup(&job).await;
            assert!(matches!(result, Err(SnapError::Config(_))), "{job:?}: {result:?}");
        }

        assert!(driver.requests().is_empty());
        assert!(!storage.contains("/home/.snapvault-mv-record"));
    }

    #[tokio::test]
    async fn test_sibling_mv_record_is_accepted() {
        let storage = MemoryStorage::with_dirs(&["/home", "/dest"]);
        let (executor, _) = build_executor(&storage, SyncOutcome::Changed, "2017-03-08 10:00:00");

        let mut job = BackupJob::new(Location::local("/home"), Location::local("/dest"));
        job.mv_record = Some(Location::local("/home.snapvault-mv-record"));
        executor.backup(&job).await.unwrap();
        assert!(storage.contains("/home.snapvault-mv-record"));
    }

    #[tokio::test]
    async fn test_unreadable_locations() {
        let storage = MemoryStorage::with_dirs(&["/src", "/dest", "/dest/2017-03-05_10-00-00"]);
        storage.deny("/dest");
        let (executor, driver) = build_executor(&storage, SyncOutcome::Changed, "2017-03-08 10:00:00");
        let dest = Location::local("/dest");

        let listing = catalog_from_listing(&storage, &dest, SortOrder::Descending).await;
        assert!(matches!(listing, Err(SnapError::NotReadable { path, .. }) if path == Path::new("/dest")));

        let cleaned = executor.clean(&dest, &day_policy(1), false).await;
        assert!(matches!(cleaned, Err(SnapError::NotReadable { .. })));
        assert!(storage.removed().is_empty());
        assert!(storage.contains("/dest/2017-03-05_10-00-00"));

        assert!(matches!(
            executor.backup(&job()).await,
            Err(SnapError::NotWritable(_))
        ));

        storage.deny("/src");
        assert!(matches!(
            executor.backup(&job()).await,
            Err(SnapError::NotReadable { path, .. }) if path == Path::new("/src")
        ));
        assert!(driver.requests().is_empty());
    }

    #[tokio::test]
    async fn test_daily_backups_with_retention() {
        let storage = MemoryStorage::with_dirs(&["/src", "/dest"]);
        let driver = FakeDriver::new(&storage, SyncOutcome::Changed);
        let now = Arc::new(Mutex::new(ts("2017-03-01 12:00:00")));
        let clock = Arc::clone(&now);
        let executor = BackupExecutor::new(driver, storage.clone())
            .with_clock(move || *clock.lock().unwrap());

        let mut job = job();
        job.retention = Some(day_policy(3));

        let mut last = None;
        for _ in 0..10 {
            last = Some(executor.backup(&job).await.unwrap());
            let mut guard = now.lock().unwrap();
            *guard += ChronoDuration::days(1);
        }

        assert_eq!(
            storage.children("/dest"),
            vec![
                "2017-03-07_12-00-00",
                "2017-03-08_12-00-00",
                "2017-03-09_12-00-00",
                "2017-03-10_12-00-00",
            ]
        );

        let cleanup = last.unwrap().cleanup.unwrap();
        assert_eq!(cleanup.keep[0].1, KeepReason::Latest);
        assert_eq!(cleanup.delete.len(), 1);
        assert_eq!(cleanup.delete[0].name(), "2017-03-06_12-00-00");
    }

    #[tokio::test]
    async fn test_clean_dry_run_deletes_nothing() {
        let storage = MemoryStorage::with_dirs(&[
            "/dest",
            "/dest/2017-03-05_10-00-00",
            "/dest/2017-03-06_10-00-00",
            "/dest/2017-03-07_10-00-00",
            "/dest/2017-03-08_10-00-00",
        ]);
        let (executor, _) = build_executor(&storage, SyncOutcome::Changed, "2017-03-09 10:00:00");
        let dest = Location::local("/dest");
        let policy = day_policy(1);

        let decision = executor.clean(&dest, &policy, true).await.unwrap();
        assert_eq!(decision.delete.len(), 2);
        assert_eq!(storage.children("/dest").len(), 4);

        executor.clean(&dest, &policy, false).await.unwrap();
        assert_eq!(
            storage.children("/dest"),
            vec!["2017-03-07_10-00-00", "2017-03-08_10-00-00"]
        );
    }

    #[tokio::test]
    async fn test_clean_refuses_empty_policy() {
        let storage = MemoryStorage::with_dirs(&["/dest", "/dest/2017-03-05_10-00-00"]);
        let (executor, _) = build_executor(&storage, SyncOutcome::Changed, "2017-03-09 10:00:00");
        let policy = RetentionPolicy::new(Vec::new(), true).unwrap();

        let result = executor.clean(&Location::local("/dest"), &policy, false).await;
        assert!(matches!(result, Err(SnapError::InvalidRule(_))));
        assert_eq!(storage.children("/dest").len(), 1);
    }

    #[tokio::test]
    async fn test_clean_missing_location() {
        let storage = MemoryStorage::default();
        let (executor, _) = build_executor(&storage, SyncOutcome::Changed, "2017-03-09 10:00:00");
        let result = executor.clean(&Location::local("/dest"), &day_policy(1), false).await;
        assert!(matches!(result, Err(SnapError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_mirror_copies_missing_snapshots_in_order() {
        let storage = MemoryStorage::with_dirs(&[
            "/src",
            "/src/2017-03-08_00-00-00",
            "/src/2017-04-07_00-00-00",
            "/src/2017-05-07_00-00-00",
            "/src/2017-06-08_00-00-00",
            "/mir",
            "/mir/2017-04-07_00-00-00",
            "/mir/2017-05-06_00-00-00",
        ]);
        let (executor, driver) = build_executor(&storage, SyncOutcome::Changed, "2017-07-01 00:00:00");

        let plan = executor
            .mirror(&Location::local("/src"), &Location::local("/mir"), false)
            .await
            .unwrap();
        assert_eq!(plan.len(), 3);

        let requests = driver.requests();
        let targets: Vec<&Path> = requests.iter().map(|r| r.destination.path()).collect();
        assert_eq!(
            targets,
            vec![
                Path::new("/mir/2017-03-08_00-00-00"),
                Path::new("/mir/2017-05-07_00-00-00"),
                Path::new("/mir/2017-06-08_00-00-00"),
            ]
        );
        assert_eq!(
            requests[2].baseline,
            Some(Location::local("/mir/2017-05-07_00-00-00"))
        );
        assert_eq!(
            requests[2].mv_record,
            Some(Location::local("/src/2017-05-07_00-00-00"))
        );
        assert_eq!(storage.children("/mir").len(), 5);

        // Second run has nothing left to do
        let plan = executor
            .mirror(&Location::local("/src"), &Location::local("/mir"), false)
            .await
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(driver.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_mirror_dry_run() {
        let storage = MemoryStorage::with_dirs(&["/src", "/src/2017-03-08_00-00-00", "/mir"]);
        let (executor, driver) = build_executor(&storage, SyncOutcome::Changed, "2017-07-01 00:00:00");

        let plan = executor
            .mirror(&Location::local("/src"), &Location::local("/mir"), true)
            .await
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert!(driver.requests().is_empty());
        assert!(storage.children("/mir").is_empty());
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let storage = MemoryStorage::with_dirs(&[
            "/dest",
            "/dest/2017-03-05_10-00-00",
            "/dest/2017-03-08_10-00-00",
            "/dest/incomplete.tmp",
        ]);
        let (executor, _) = build_executor(&storage, SyncOutcome::Changed, "2017-03-09 10:00:00");

        let catalog = executor.list(&Location::local("/dest")).await.unwrap();
        let names: Vec<String> = catalog.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["2017-03-08_10-00-00", "2017-03-05_10-00-00"]);
    }
}
