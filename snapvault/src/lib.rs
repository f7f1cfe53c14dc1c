//! Snapvault Library
//!
//! Incremental snapshot backups: rsync with hardlinks against the previous
//! snapshot, and calendar-based retention of the snapshot history.

pub mod chain;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod retention;
pub mod snapshot;
pub mod storage;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::SnapError;
pub type Result<T> = std::result::Result<T, SnapError>;
