//! Plan artifact storage, naming and integrity.
//!
//! The artifact name depends only on the environment and commit, so apply
//! can compute it without reading the pointer. Which run's storage scope to
//! read from does come from the pointer.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tfbd_state::{BlobService, RunId, StorageError};

use crate::domain::{CommitSha, DeployError, Result};

/// `tfplan-{env}-{sha[:8]}.tfplan`
pub fn artifact_name(environment: &str, sha: &CommitSha) -> String {
    format!("tfplan-{environment}-{}.tfplan", sha.short())
}

/// Hex-encoded SHA-256 of the plan bytes.
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Fail with `ChecksumMismatch` unless `data` hashes to `expected`.
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<()> {
    let actual = checksum(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(DeployError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Thin pass-through to the run-scoped blob service.
#[derive(Clone)]
pub struct ArtifactBlobStore {
    service: Arc<dyn BlobService>,
}

impl ArtifactBlobStore {
    pub fn new(service: Arc<dyn BlobService>) -> Self {
        Self { service }
    }

    /// Store the plan in the scope of the current run.
    pub async fn upload(&self, run_id: &RunId, name: &str, data: &[u8]) -> Result<()> {
        self.service
            .upload(run_id, name, data)
            .await
            .map_err(DeployError::from)
    }

    /// Fetch the plan from the scope of the run that produced it.
    pub async fn download(&self, run_id: &RunId, name: &str) -> Result<Vec<u8>> {
        self.service
            .download(run_id, name)
            .await
            .map_err(|err| match err {
                StorageError::NotFound { .. } => DeployError::ArtifactNotFound {
                    run_id: run_id.to_string(),
                    name: name.to_string(),
                },
                other => other.into(),
            })
    }
}
