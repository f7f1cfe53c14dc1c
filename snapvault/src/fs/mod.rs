//! Local filesystem helpers.

pub mod walker;
