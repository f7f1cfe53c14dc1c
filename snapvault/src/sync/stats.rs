//! Parsing of rsync's `--stats` summary.

use super::SyncOutcome;

/// Summary lines whose count tells whether the tree changed.
const CHANGE_COUNTERS: [&str; 3] = [
    "Number of created files:",
    "Number of deleted files:",
    "Number of regular files transferred:",
];

/// Parse the count of a stats line such as
/// `Number of created files: 1,204 (reg: 1,200, dir: 4)`.
fn parse_count(value: &str) -> Option<u64> {
    let number = value.split('(').next()?.trim().replace([',', '.'], "");
    number.parse().ok()
}

/// Outcome of a dry run, judged from its `--stats` output.
///
/// Missing counters count as no change.
pub fn outcome_from_stats<S: AsRef<str>>(lines: &[S]) -> SyncOutcome {
    let changed = lines.iter().rev().any(|line| {
        let line = line.as_ref().trim();
        CHANGE_COUNTERS.iter().any(|counter| {
            line.strip_prefix(counter)
                .and_then(parse_count)
                .is_some_and(|n| n != 0)
        })
    });

    if changed {
        SyncOutcome::Changed
    } else {
        SyncOutcome::Unchanged
    }
}
