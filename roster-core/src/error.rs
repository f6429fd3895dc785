//! Error types for roster-core

use thiserror::Error;

/// Top-level error type for roster-core
#[derive(Error, Debug)]
pub enum RosterError {
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from dumping or loading a session snapshot
///
/// I/O failures and malformed content are kept apart so callers can tell
/// "file missing or unwritable" from "file present but unusable".
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode snapshot: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Snapshot truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Snapshot body of {0} bytes exceeds the 4-byte length prefix")]
    TooLarge(usize),

    #[error("Snapshot is inconsistent: {0}")]
    Inconsistent(String),
}

impl SnapshotError {
    /// Whether the error came from the filesystem rather than the content
    pub fn is_io(&self) -> bool {
        matches!(self, SnapshotError::Io(_))
    }
}

/// Errors from loading or validating registry configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
