//! tfbd-state: remote state primitives for tf-branch-deploy
//!
//! A deployment job has no database. The only shared state between the job
//! that produced a plan and the job that applies it lives in two places:
//!
//! - a tag namespace in the repository (`PointerRepository`)
//! - a blob store scoped per workflow run (`BlobService`)
//!
//! ## Key Components
//!
//! - `GitTagRepository`: tag namespace backed by the `git` CLI, optionally
//!   pushed to a remote
//! - `FsBlobService`: run-scoped blobs on a filesystem root
//! - `fakes`: in-memory implementations with call counters for tests

mod error;
pub mod fakes;
pub mod fs_blob;
pub mod git_tags;
pub mod glob;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_blob::FsBlobService;
pub use git_tags::GitTagRepository;
pub use storage_traits::{BlobService, PointerRepository, RunId, StorageResult, TagEntry};
