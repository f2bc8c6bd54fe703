//! Storage trait definitions for tf-branch-deploy
//!
//! These traits define the two remote primitives the deployment protocol is
//! built on:
//! - `PointerRepository`: a flat tag namespace with glob listing
//! - `BlobService`: opaque named blobs, scoped by workflow run
//!
//! Both traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// Identifier of one workflow execution, supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub String);

impl RunId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        RunId(value.to_string())
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        RunId(value)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PointerRepository: tag namespace
// ---------------------------------------------------------------------------

/// One entry returned by a tag listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEntry {
    /// Full tag name, e.g. `plan/dev/1234/<sha>`
    pub name: String,
    /// Creation time as reported by the backend
    pub created_at: DateTime<Utc>,
    /// Tag message (first line), if the backend keeps one
    pub message: Option<String>,
}

/// Tag namespace used as a pointer index.
///
/// Guarantees:
/// - `create_tag(.., force = false)` fails with `StorageError::AlreadyExists`
///   when the name is taken; it never silently overwrites.
/// - `create_tag(.., force = true)` replaces any existing tag of that name.
/// - `list_tags(pattern)` matches `*` within a single `/`-separated segment.
/// - `delete_tag` returns `StorageError::NotFound` when nothing was deleted.
#[async_trait]
pub trait PointerRepository: Send + Sync {
    /// Create a tag pointing at `target`, overwriting only when `force` is set.
    async fn create_tag(
        &self,
        name: &str,
        target: &str,
        message: &str,
        force: bool,
    ) -> StorageResult<()>;

    /// List tags matching a glob pattern.
    async fn list_tags(&self, pattern: &str) -> StorageResult<Vec<TagEntry>>;

    /// Delete a tag locally and on the remote, if any.
    async fn delete_tag(&self, name: &str) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// BlobService: run-scoped artifact storage
// ---------------------------------------------------------------------------

/// Blob store where every blob lives inside the storage scope of one run.
///
/// Two runs may hold blobs with identical names; only the run ID tells them
/// apart.
#[async_trait]
pub trait BlobService: Send + Sync {
    /// Store `data` under `name` in the scope of `run_id`.
    async fn upload(&self, run_id: &RunId, name: &str, data: &[u8]) -> StorageResult<()>;

    /// Fetch `name` from the scope of `run_id`. Returns `StorageError::NotFound` if absent.
    async fn download(&self, run_id: &RunId, name: &str) -> StorageResult<Vec<u8>>;
}

/// Reject names that cannot be used as a single path component.
pub(crate) fn validate_component(name: &str) -> StorageResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.chars().any(|c| c.is_control())
    {
        return Err(StorageError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}
