//! errors.rs
//!     Defines a portable error-handling module for
//!     use when encountering runtime exceptions.

use std::io;
use std::path::PathBuf;

/// Aliases a custom `Result` type to return our specific error type.
pub type Result<T> = std::result::Result<T, KVError>;

/// `KVError` defines the implementation-level errors that may be reached
/// during runtime execution, and is what ultimately gets returned to any
/// user-facing code.
///
/// A missing key is never an error; lookups return `Option` or a default.
#[derive(Debug, thiserror::Error)]
pub enum KVError {
    /// The directory holding the backing file cannot be created.
    #[error("cannot create store directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The backing file exists but cannot be read.
    #[error("cannot read store file {path:?}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing or renaming the store file failed. The in-memory state
    /// keeps the attempted mutation.
    #[error("failed to save data to {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The mapping could not be encoded as JSON.
    #[error("cannot serialize store contents: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A typed value could not be converted to or from its stored form.
    #[error("cannot convert value for key '{key}': {source}")]
    Conversion {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// locking error, indicating a poisoned lock
    #[error("store lock poisoned by a panicked thread")]
    Poison,
}

impl KVError {
    /// `true` for failures that happened while persisting, after the
    /// in-memory mapping was already mutated.
    pub fn is_storage(&self) -> bool {
        matches!(self, KVError::Storage { .. } | KVError::Serialize(_))
    }
}
