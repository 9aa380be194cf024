use std::path::PathBuf;
use thiserror::Error;

use crate::address::AddressError;

/// All errors produced by the storage engine.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The storage root could not be resolved or inspected.
    #[error("cannot use storage root '{path}': {source}")]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The storage root exists but is not a directory.
    #[error("storage root is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The address given by the caller could not be normalized.
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    /// Filesystem error with the offending path.
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The mail could not be encoded for storage.
    #[error("cannot encode mail: {0}")]
    Encode(#[source] serde_json::Error),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed before the operation finished.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// The blocking task running the operation did not complete.
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
