//! Error types for the shelf/checkpoint engine

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for shelf engine operations
pub type LedgeResult<T> = Result<T, LedgeError>;

/// Main error type for the shelf engine
#[derive(Error, Debug, Clone)]
pub enum LedgeError {
    /// The named shelf has no checkpoints
    #[error("shelf '{name}' not found")]
    ShelfNotFound { name: String },

    /// The shelf exists but the requested checkpoint does not
    #[error("shelf '{name}' has no checkpoint {sequence}")]
    VersionNotFound { name: String, sequence: u64 },

    /// A stored patch or checkpoint record is structurally malformed
    #[error("corrupt patch: {0}")]
    CorruptPatch(String),

    /// The patch applies with conflicts; the working copy was left untouched
    #[error("{} path(s) in conflict, working copy unchanged", .paths.len())]
    Conflicts { paths: Vec<PathBuf> },

    /// Save attempted with no local modifications
    #[error("nothing to save: working copy has no local modifications")]
    EmptyDelta,

    /// I/O failure in the persistence layer, fatal to the current operation
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid argument (empty shelf name, malformed path, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl LedgeError {
    /// Create a shelf-not-found error
    pub fn shelf_not_found(name: impl Into<String>) -> Self {
        Self::ShelfNotFound { name: name.into() }
    }

    /// Create a version-not-found error
    pub fn version_not_found(name: impl Into<String>, sequence: u64) -> Self {
        Self::VersionNotFound {
            name: name.into(),
            sequence,
        }
    }

    /// Create a corrupt-patch error
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptPatch(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create an invalid-input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

impl From<std::io::Error> for LedgeError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error.to_string())
    }
}
