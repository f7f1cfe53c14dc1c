//! Backup chain resolution: which existing snapshot a new one is built on.
//!
//! For a plain backup the baseline is simply the newest snapshot in the
//! destination. Mirroring one storage location into another needs two
//! independent choices per snapshot: a baseline that already exists in the
//! mirror (hardlink source) and a mv-record taken from the original storage
//! (the previous snapshot there), which lets rsync detect renamed files.

use crate::snapshot::{Catalog, Snapshot};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Hardlink baseline for a new snapshot in `catalog`: its newest snapshot.
pub fn resolve_primary(catalog: &Catalog) -> Option<&Path> {
    catalog
        .iter()
        .max_by_key(|s| s.timestamp)
        .map(Snapshot::path)
}

/// One snapshot to copy from the source storage into the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MirrorStep {
    /// Snapshot in the source storage
    pub target: Snapshot,

    /// Where the copy lands in the mirror
    pub destination: PathBuf,

    /// Mirror snapshot used as hardlink baseline
    pub baseline: Option<PathBuf>,

    /// Source snapshot preceding `target`, used as mv-record
    pub mv_record: Option<PathBuf>,
}

/// Resolve baseline and mv-record for mirroring `target`.
///
/// Returns `None` when the mirror already holds a snapshot with the same
/// timestamp.
pub fn resolve_mirror(source: &Catalog, mirror: &Catalog, target: &Snapshot) -> Option<MirrorStep> {
    let mirrored: Vec<NaiveDateTime> = mirror.iter().map(|s| s.timestamp).collect();
    resolve_step(source.snapshots(), mirror.root(), &mirrored, target)
}

/// Every snapshot of `source` missing from `mirror`, oldest first.
///
/// Steps are resolved as if each earlier step had already been copied, so a
/// later snapshot can use an earlier planned one as its baseline.
pub fn plan_mirror(source: &Catalog, mirror: &Catalog) -> Vec<MirrorStep> {
    let mut mirrored: Vec<NaiveDateTime> = mirror.iter().map(|s| s.timestamp).collect();
    mirrored.sort();

    let mut targets: Vec<&Snapshot> = source.iter().collect();
    targets.sort_by_key(|s| s.timestamp);

    let mut plan = Vec::new();
    for target in targets {
        if let Some(step) = resolve_step(source.snapshots(), mirror.root(), &mirrored, target) {
            let at = mirrored.partition_point(|t| *t < target.timestamp);
            mirrored.insert(at, target.timestamp);
            plan.push(step);
        }
    }
    plan
}

fn resolve_step(
    source: &[Snapshot],
    mirror_root: &Path,
    mirrored: &[NaiveDateTime],
    target: &Snapshot,
) -> Option<MirrorStep> {
    if mirrored.contains(&target.timestamp) {
        return None;
    }

    let predecessor = source
        .iter()
        .filter(|s| s.timestamp < target.timestamp)
        .max_by_key(|s| s.timestamp);

    // Prefer the mirror copy of the predecessor: its tree matches the
    // mv-record. Otherwise fall back to the newest older mirror snapshot.
    let baseline = predecessor
        .map(|p| p.timestamp)
        .filter(|t| mirrored.contains(t))
        .or_else(|| {
            mirrored
                .iter()
                .copied()
                .filter(|t| *t < target.timestamp)
                .max()
        })
        .map(|t| Snapshot::in_root(mirror_root, t).location);

    Some(MirrorStep {
        target: target.clone(),
        destination: Snapshot::in_root(mirror_root, target.timestamp).location,
        baseline,
        mv_record: predecessor.map(|p| p.location.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SortOrder;

    fn catalog(root: &str, names: &[&str]) -> Catalog {
        Catalog::from_names(Path::new(root), names, SortOrder::Descending)
    }

    #[test]
    fn test_primary_is_newest() {
        let dest = catalog(
            "/dest",
            &["2017-03-05_10-00-00", "2017-03-08_15-23-11", "2017-03-07_10-00-00"],
        );
        assert_eq!(
            resolve_primary(&dest),
            Some(Path::new("/dest/2017-03-08_15-23-11"))
        );

        let asc = dest.reordered(SortOrder::Ascending);
        assert_eq!(
            resolve_primary(&asc),
            Some(Path::new("/dest/2017-03-08_15-23-11"))
        );
    }

    #[test]
    fn test_primary_empty() {
        assert_eq!(resolve_primary(&catalog("/dest", &[])), None);
    }

    #[test]
    fn test_mirror_plan() {
        let source = catalog(
            "/src",
            &[
                "2017-03-08_00-00-00",
                "2017-04-07_00-00-00",
                "2017-05-07_00-00-00",
                "2017-06-08_00-00-00",
            ],
        );
        let mirror = catalog("/mir", &["2017-04-07_00-00-00", "2017-05-06_00-00-00"]);

        let plan = plan_mirror(&source, &mirror);
        let summary: Vec<(String, Option<PathBuf>, Option<PathBuf>)> = plan
            .iter()
            .map(|s| (s.target.name(), s.baseline.clone(), s.mv_record.clone()))
            .collect();

        assert_eq!(
            summary,
            vec![
                ("2017-03-08_00-00-00".to_string(), None, None),
                (
                    "2017-05-07_00-00-00".to_string(),
                    Some(PathBuf::from("/mir/2017-04-07_00-00-00")),
                    Some(PathBuf::from("/src/2017-04-07_00-00-00")),
                ),
                (
                    "2017-06-08_00-00-00".to_string(),
                    Some(PathBuf::from("/mir/2017-05-07_00-00-00")),
                    Some(PathBuf::from("/src/2017-05-07_00-00-00")),
                ),
            ]
        );
        assert_eq!(plan[0].destination, PathBuf::from("/mir/2017-03-08_00-00-00"));
    }

    #[test]
    fn test_mirror_falls_back_to_nearest_older() {
        let source = catalog(
            "/src",
            &["2017-01-01_00-00-00", "2017-02-01_00-00-00", "2017-03-01_00-00-00"],
        );
        let mirror = catalog("/mir", &["2017-01-01_00-00-00", "2017-01-15_00-00-00"]);
        let target = source.latest().unwrap().clone();

        let step = resolve_mirror(&source, &mirror, &target).unwrap();
        assert_eq!(step.mv_record, Some(PathBuf::from("/src/2017-02-01_00-00-00")));
        assert_eq!(step.baseline, Some(PathBuf::from("/mir/2017-01-15_00-00-00")));
    }

    #[test]
    fn test_mirror_skips_present_snapshots() {
        let source = catalog("/src", &["2017-01-01_00-00-00", "2017-02-01_00-00-00"]);
        let mirror = catalog("/mir", &["2017-01-01_00-00-00", "2017-02-01_00-00-00"]);
        assert!(plan_mirror(&source, &mirror).is_empty());
        let target = source.oldest().unwrap().clone();
        assert!(resolve_mirror(&source, &mirror, &target).is_none());
    }

    #[test]
    fn test_mirror_into_empty() {
        let source = catalog(
            "/src",
            &["2017-01-01_00-00-00", "2017-02-01_00-00-00", "2017-03-01_00-00-00"],
        );
        let plan = plan_mirror(&source, &catalog("/mir", &[]));
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].baseline, None);
        assert_eq!(plan[0].mv_record, None);
        for pair in plan.windows(2) {
            assert!(pair[0].target.timestamp < pair[1].target.timestamp);
            assert_eq!(pair[1].baseline.as_ref(), Some(&pair[0].destination));
            assert_eq!(pair[1].mv_record.as_ref(), Some(&pair[0].target.location));
        }
    }
}
