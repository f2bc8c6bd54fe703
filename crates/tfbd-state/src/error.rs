//! Error types for tfbd-state

use thiserror::Error;

/// Errors raised by the pointer repository and the blob service.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Tag or blob does not exist
    #[error("not found: {name}")]
    NotFound { name: String },

    /// A non-forced tag write hit an existing tag (locally or on the remote)
    #[error("already exists: {name}")]
    AlreadyExists { name: String },

    /// Name is not usable as a tag or blob name
    #[error("invalid name: {name}")]
    InvalidName { name: String },

    /// The backend itself failed (git exited non-zero, remote unreachable)
    #[error("backend error: {0}")]
    Backend(String),

    /// Local filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether this error means "the thing is absent" rather than "the backend broke".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}
