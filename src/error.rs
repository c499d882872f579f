//! Centralized error types for gmail-archiver.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the gmail-archiver library.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// A configuration value is out of range or malformed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An encoder or decoder rejected its input or could not be set up.
    #[error("{codec} codec error: {reason}")]
    Codec { codec: &'static str, reason: String },

    /// A single message could not be retrieved from its source.
    #[error("Failed to fetch message '{unique_id}': {reason}")]
    Fetch { unique_id: String, reason: String },

    /// The archive extension does not map to a supported codec.
    #[error("Unsupported archive type: {0}")]
    UnsupportedArchive(PathBuf),

    /// The file does not appear to be a valid MBOX.
    #[error("File does not appear to be a valid MBOX: {0}")]
    InvalidMbox(PathBuf),
}

/// Convenience alias for `Result<T, ArchiveError>`.
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `Codec` variant from any displayable codec failure.
    pub fn codec(codec: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Codec {
            codec,
            reason: reason.to_string(),
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `ArchiveError::io`).
impl From<std::io::Error> for ArchiveError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
