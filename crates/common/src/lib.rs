//! vexport Common Utilities
//!
//! Shared infrastructure for all vexport crates:
//! - Error types and result aliases
//! - Frame clock for fixed-step time iteration
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
