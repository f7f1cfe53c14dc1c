//! Configuration management for snapvault.
//!
//! Loads configuration from a TOML file. Every section is optional and
//! command-line flags override file values.

use crate::retention::{IntervalKind, RetentionPolicy};
use crate::storage::Location;
use crate::utils::errors::{Result, SnapError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub mirror: MirrorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SshConfig {
    /// Identity file for ssh and rsync's ssh transport
    #[serde(default)]
    pub key: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// rsync executable
    #[serde(default = "default_rsync_program")]
    pub program: String,

    /// Extra rsync arguments (e.g. excludes)
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Log every transferred file
    #[serde(default)]
    pub verbose: bool,
}

/// Per-interval counts. Zero (the default) disables an interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub hour: i64,

    #[serde(default)]
    pub day: i64,

    #[serde(default)]
    pub week: i64,

    #[serde(default)]
    pub month: i64,

    #[serde(default)]
    pub year: i64,

    /// Never delete the newest snapshot
    #[serde(default = "default_true")]
    pub protect_latest: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Tree to back up (`/path` or `host:/path`)
    #[serde(default)]
    pub source: Option<String>,

    /// Storage location receiving the snapshots
    #[serde(default)]
    pub destination: Option<String>,

    /// Hardlink mirror of the source used for move detection
    #[serde(default)]
    pub mv_record: Option<String>,

    /// Skip the backup when a dry run finds no change
    #[serde(default)]
    pub only_if_changed: bool,

    /// Apply the retention policy after a successful backup
    #[serde(default = "default_true")]
    pub clean_after: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Storage location to replicate
    #[serde(default)]
    pub source: Option<String>,

    /// Second storage location receiving the copies
    #[serde(default)]
    pub target: Option<String>,
}

// Default values
fn default_log_level() -> String {
    "info".to_string()
}

fn default_rsync_program() -> String {
    "rsync".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            program: default_rsync_program(),
            extra_args: Vec::new(),
            verbose: false,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            hour: 0,
            day: 0,
            week: 0,
            month: 0,
            year: 0,
            protect_latest: true,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            source: None,
            destination: None,
            mv_record: None,
            only_if_changed: false,
            clean_after: true,
        }
    }
}

impl RetentionConfig {
    /// Configured policy, `None` when no interval has a count.
    ///
    /// # Errors
    /// `InvalidRule` for negative counts.
    pub fn policy(&self) -> Result<Option<RetentionPolicy>> {
        let counts = [
            (IntervalKind::Hour, self.hour),
            (IntervalKind::Day, self.day),
            (IntervalKind::Week, self.week),
            (IntervalKind::Month, self.month),
            (IntervalKind::Year, self.year),
        ];
        let policy = RetentionPolicy::from_counts(&counts, self.protect_latest)?;
        Ok((!policy.is_empty()).then_some(policy))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SnapError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        // Surface bad retention counts before anything runs.
        config.retention.policy()?;
        Ok(config)
    }
}

/// Parse an optional location string from the config.
pub fn parse_location(value: Option<&str>) -> Result<Option<Location>> {
    value.map(str::parse::<Location>).transpose()
}
