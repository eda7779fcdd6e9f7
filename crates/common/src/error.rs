//! Error types for hubtest

use thiserror::Error;

/// Result type alias using the hubtest Error
pub type Result<T> = std::result::Result<T, Error>;

/// hubtest error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to launch command: {0}")]
    Launch(String),

    #[error("Command exited with code {code}: {command}\n{stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Snapshot failure: {0}")]
    Snapshot(String),

    #[error("Cloud setup error: {0}")]
    Cloud(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error was caused by run cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
