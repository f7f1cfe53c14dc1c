//! Validated set of retention rules.

use super::engine::{decide, KeepReason, RetentionDecision};
use super::{IntervalKind, IntervalRule};
use crate::snapshot::Catalog;
use crate::utils::errors::{Result, SnapError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    rules: Vec<IntervalRule>,
    protect_latest: bool,
}

impl RetentionPolicy {
    /// # Errors
    /// `InvalidRule` if two rules share a kind.
    pub fn new(mut rules: Vec<IntervalRule>, protect_latest: bool) -> Result<Self> {
        rules.sort_by_key(|r| r.kind);
        if let Some(pair) = rules.windows(2).find(|w| w[0].kind == w[1].kind) {
            return Err(SnapError::InvalidRule(format!(
                "more than one {} rule",
                pair[0].kind
            )));
        }
        Ok(Self {
            rules,
            protect_latest,
        })
    }

    /// Policy from per-kind counts, zero meaning "no rule".
    pub fn from_counts(counts: &[(IntervalKind, i64)], protect_latest: bool) -> Result<Self> {
        let mut rules = Vec::new();
        for (kind, count) in counts {
            if let Some(rule) = IntervalRule::from_config(*kind, *count)? {
                rules.push(rule);
            }
        }
        Self::new(rules, protect_latest)
    }

    pub fn rules(&self) -> &[IntervalRule] {
        &self.rules
    }

    pub fn protect_latest(&self) -> bool {
        self.protect_latest
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run the rules over `catalog`.
    ///
    /// With `protect_latest` the newest snapshot is kept even when no rule
    /// reaches it. It still takes part in the walk, so protecting it does not
    /// shift what the rules keep.
    pub fn decide(&self, catalog: &Catalog) -> RetentionDecision {
        let mut decision = decide(catalog.snapshots(), &self.rules);

        if self.protect_latest {
            if let Some(latest) = catalog.latest() {
                if let Some(pos) = decision
                    .delete
                    .iter()
                    .position(|s| s.timestamp == latest.timestamp)
                {
                    let latest = decision.delete.remove(pos);
                    decision.keep.insert(0, (latest, KeepReason::Latest));
                }
            }
        }
        decision
    }
}

impl std::fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rules: Vec<String> = self.rules.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", rules.join(", "))?;
        if self.protect_latest {
            f.write_str(" +latest")?;
        }
        Ok(())
    }
}
