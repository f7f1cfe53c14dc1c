//! Error types for snapvault.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapError {
    #[error("Storage location not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Storage location not readable: {}: {source}", path.display())]
    NotReadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage location not writable: {0}")]
    NotWritable(String),

    #[error("Invalid retention rule: {0}")]
    InvalidRule(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command `{command}` failed ({status}): {output}")]
    Command {
        command: String,
        status: String,
        output: String,
    },

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Snapshot already exists: {0}")]
    SnapshotExists(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SnapError>;
