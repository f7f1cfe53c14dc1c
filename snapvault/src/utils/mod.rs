//! Utility modules for snapvault.

pub mod errors;
pub mod logger;

pub use errors::{Result, SnapError};
