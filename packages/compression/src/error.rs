//! Error types for the compression crate

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for compression operations
pub type Result<T> = std::result::Result<T, CompressionError>;

/// Main error type for archive operations
#[derive(Error, Debug)]
pub enum CompressionError {
    /// Building the archive failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    /// Reading the archive failed
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    /// An entry path would escape the extraction target
    #[error("Unsafe archive path: {0}")]
    UnsafePath(String),

    /// A required source directory does not exist
    #[error("Source directory does not exist: {}", .0.display())]
    MissingSource(PathBuf),

    /// IO error wrapper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl CompressionError {
    /// Create a `CompressionFailed` error with a formatted message
    #[must_use]
    pub fn compression_failed(msg: impl fmt::Display) -> Self {
        Self::CompressionFailed(msg.to_string())
    }

    /// Create a `DecompressionFailed` error with a formatted message
    #[must_use]
    pub fn decompression_failed(msg: impl fmt::Display) -> Self {
        Self::DecompressionFailed(msg.to_string())
    }

    /// Create an `UnsafePath` error for the offending entry name
    #[must_use]
    pub fn unsafe_path(path: impl fmt::Display) -> Self {
        Self::UnsafePath(path.to_string())
    }

    /// Create an `InternalError` with a formatted message
    #[must_use]
    pub fn internal(msg: impl fmt::Display) -> Self {
        Self::InternalError(msg.to_string())
    }
}

impl From<tokio::task::JoinError> for CompressionError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("Blocking archive task failed: {err}"))
    }
}
