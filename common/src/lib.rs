//! Common Utilities and Types Library
//!
//! This crate provides shared LTE types and numeric helpers used across the
//! UE synchronization front end.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
