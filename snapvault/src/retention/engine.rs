//! The retention walk.

use super::{IntervalKind, IntervalRule};
use crate::snapshot::Snapshot;
use std::fmt;

/// Why a snapshot survives a cleanup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    /// The `ordinal`-th snapshot kept by the `kind` rule
    Rule { kind: IntervalKind, ordinal: u32 },
    /// Most recent snapshot, protected outside the rules
    Latest,
}

impl fmt::Display for KeepReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepReason::Rule { kind, ordinal } => write!(f, "keep by {ordinal}. {kind}"),
            KeepReason::Latest => f.write_str("keep as latest"),
        }
    }
}

/// Partition of a catalog into snapshots to keep and snapshots to delete.
///
/// Both lists are newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionDecision {
    pub keep: Vec<(Snapshot, KeepReason)>,
    pub delete: Vec<Snapshot>,
}

impl RetentionDecision {
    pub fn kept(&self) -> impl Iterator<Item = &Snapshot> {
        self.keep.iter().map(|(s, _)| s)
    }

    pub fn reason_for(&self, snapshot: &Snapshot) -> Option<KeepReason> {
        self.keep
            .iter()
            .find(|(s, _)| s.timestamp == snapshot.timestamp)
            .map(|(_, r)| *r)
    }

    /// Operator listing, newest first, one snapshot per line.
    pub fn report(&self) -> String {
        let mut rows: Vec<(&Snapshot, String)> = self
            .keep
            .iter()
            .map(|(s, r)| (s, r.to_string()))
            .chain(self.delete.iter().map(|s| (s, "REMOVE".to_string())))
            .collect();
        rows.sort_by(|a, b| b.0.timestamp.cmp(&a.0.timestamp));
        rows.iter()
            .map(|(s, msg)| format!("  {} <- {}", s.name(), msg))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Decide which of `snapshots` the interval `rules` keep.
///
/// Rules are applied from hour to year regardless of the order given. For
/// each rule the walk starts at the newest snapshot not kept yet, steps back
/// to the end of the previous calendar unit, keeps the newest remaining
/// snapshot at or before that boundary and continues from there, at most
/// `count` times. The newest snapshot is not protected here.
pub fn decide(snapshots: &[Snapshot], rules: &[IntervalRule]) -> RetentionDecision {
    let mut candidates: Vec<&Snapshot> = snapshots.iter().collect();
    candidates.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    candidates.dedup_by_key(|s| s.timestamp);

    let Some(oldest) = candidates.last().map(|s| s.timestamp) else {
        return RetentionDecision::default();
    };

    let mut ordered_rules = rules.to_vec();
    ordered_rules.sort_by_key(|r| r.kind);

    let mut marks: Vec<Option<KeepReason>> = vec![None; candidates.len()];

    for rule in &ordered_rules {
        let Some(start) = marks.iter().position(Option::is_none) else {
            break;
        };
        let mut cursor = candidates[start].timestamp;
        let mut kept = 0;

        for _ in 0..rule.count {
            let boundary = rule.kind.boundary_before(cursor);

            // Candidates are newest first, so everything from `first_older`
            // on is at or before the boundary.
            let first_older = candidates.partition_point(|s| s.timestamp > boundary);
            let found = (first_older..candidates.len()).find(|&i| marks[i].is_none());

            match found {
                Some(i) => {
                    kept += 1;
                    marks[i] = Some(KeepReason::Rule {
                        kind: rule.kind,
                        ordinal: kept,
                    });
                    cursor = candidates[i].timestamp;
                }
                None => cursor = boundary,
            }

            if cursor < oldest {
                break;
            }
        }
    }

    let mut decision = RetentionDecision::default();
    for (snapshot, mark) in candidates.into_iter().zip(marks) {
        match mark {
            Some(reason) => decision.keep.push((snapshot.clone(), reason)),
            None => decision.delete.push(snapshot.clone()),
        }
    }
    decision
}
