//! Interval based snapshot retention.
//!
//! A retention policy is a set of interval rules such as "keep the last
//! snapshot of each of the last 7 days". Rules walk backwards through history
//! one calendar unit at a time and are applied from the finest unit to the
//! coarsest; a snapshot kept by a finer rule never counts towards a coarser
//! one.

pub mod engine;
pub mod policy;

pub use engine::{decide, KeepReason, RetentionDecision};
pub use policy::RetentionPolicy;

use crate::utils::errors::{Result, SnapError};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::fmt;
use std::str::FromStr;

/// Calendar granularity of a retention rule.
///
/// The declaration order is the order rules are applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntervalKind {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl IntervalKind {
    pub const ALL: [IntervalKind; 5] = [
        IntervalKind::Hour,
        IntervalKind::Day,
        IntervalKind::Week,
        IntervalKind::Month,
        IntervalKind::Year,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IntervalKind::Hour => "hour",
            IntervalKind::Day => "day",
            IntervalKind::Week => "week",
            IntervalKind::Month => "month",
            IntervalKind::Year => "year",
        }
    }

    /// First instant of the unit containing `t`. Weeks start on Monday.
    pub fn unit_start(self, t: NaiveDateTime) -> NaiveDateTime {
        let date = t.date();
        let midnight = |d: NaiveDate| d.and_time(NaiveTime::MIN);
        match self {
            IntervalKind::Hour => midnight(date) + Duration::hours(i64::from(t.hour())),
            IntervalKind::Day => midnight(date),
            IntervalKind::Week => midnight(
                date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
            ),
            IntervalKind::Month => midnight(date - Duration::days(i64::from(date.day0()))),
            IntervalKind::Year => midnight(date - Duration::days(i64::from(date.ordinal0()))),
        }
    }

    /// Retention boundary one step back from `t`: the last second of the unit
    /// preceding the one that contains `t`.
    ///
    /// `2017-03-08 15:23:11` gives `2017-03-08 14:59:59` for hours,
    /// `2017-03-07 23:59:59` for days, `2017-03-05 23:59:59` (a Sunday) for
    /// weeks, `2017-02-28 23:59:59` for months and `2016-12-31 23:59:59` for
    /// years.
    pub fn boundary_before(self, t: NaiveDateTime) -> NaiveDateTime {
        self.unit_start(t) - Duration::seconds(1)
    }
}

impl fmt::Display for IntervalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntervalKind {
    type Err = SnapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "hours" | "hourly" => Ok(IntervalKind::Hour),
            "day" | "days" | "daily" => Ok(IntervalKind::Day),
            "week" | "weeks" | "weekly" => Ok(IntervalKind::Week),
            "month" | "months" | "monthly" => Ok(IntervalKind::Month),
            "year" | "years" | "yearly" => Ok(IntervalKind::Year),
            other => Err(SnapError::InvalidRule(format!("unknown interval `{other}`"))),
        }
    }
}

/// Keep at most `count` snapshots, one per `kind` unit, walking back in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalRule {
    pub kind: IntervalKind,
    pub count: u32,
}

impl IntervalRule {
    /// # Errors
    /// `InvalidRule` when `count` is zero.
    pub fn new(kind: IntervalKind, count: u32) -> Result<Self> {
        if count == 0 {
            return Err(SnapError::InvalidRule(format!(
                "{kind} rule needs a positive count"
            )));
        }
        Ok(Self { kind, count })
    }

    /// Rule from a configuration value: zero means the rule is absent, a
    /// negative count is invalid.
    pub fn from_config(kind: IntervalKind, count: i64) -> Result<Option<Self>> {
        match count {
            0 => Ok(None),
            n if n < 0 => Err(SnapError::InvalidRule(format!(
                "{kind} count must not be negative (got {n})"
            ))),
            n => {
                let count = u32::try_from(n).map_err(|_| {
                    SnapError::InvalidRule(format!("{kind} count {n} is too large"))
                })?;
                Self::new(kind, count).map(Some)
            }
        }
    }
}

impl fmt::Display for IntervalRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind, self.count)
    }
}

/// Parses `day=7` or `day:7`.
impl FromStr for IntervalRule {
    type Err = SnapError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, count) = s
            .split_once(['=', ':'])
            .ok_or_else(|| SnapError::InvalidRule(format!("expected KIND=COUNT, got `{s}`")))?;
        let kind: IntervalKind = kind.parse()?;
        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| SnapError::InvalidRule(format!("invalid count in `{s}`")))?;
        Self::new(kind, count)
    }
}
