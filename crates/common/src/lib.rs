//! clipstitch Common Utilities
//!
//! Shared infrastructure for all clipstitch crates:
//! - Error taxonomy and result alias
//! - Configuration loading and validation
//! - Tracing/logging initialization
//! - Date window resolution for output naming

pub mod config;
pub mod error;
pub mod logging;
pub mod window;

pub use config::*;
pub use error::*;
pub use window::*;
