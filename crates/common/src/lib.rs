//! hubtest Common Library
//!
//! Shared data model and error handling for the hubtest workspace.

pub mod config;
pub mod error;
pub mod report;
pub mod unit;

// Re-export commonly used types
pub use config::{TestConfig, WorkspaceConfig, DEFAULT_CONNECTOR_PORT};
pub use error::{Error, Result};
pub use report::{Outcome, RunReport};
pub use unit::{JobEntry, TestUnit};

/// hubtest version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
