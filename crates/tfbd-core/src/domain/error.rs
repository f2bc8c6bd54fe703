//! Deployment error taxonomy.
//!
//! A halted request is not an error; it is reported through
//! `LifecycleState::Halted`.

use tfbd_state::StorageError;

use crate::domain::outcome::ToolStage;

/// Errors produced by the deployment lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("terraform {stage} failed with exit code {code}")]
    ToolFailure { stage: ToolStage, code: i32 },

    #[error(
        "no plan on file for commit {sha} in environment '{environment}'; run a plan first"
    )]
    NoPlanOnFile { environment: String, sha: String },

    #[error(
        "plan artifact '{name}' from run {run_id} is not available (expired or never uploaded); run a new plan"
    )]
    ArtifactNotFound { run_id: String, name: String },

    #[error("{phase} hook '{name}' failed with exit code {code}")]
    HookFailed {
        phase: String,
        name: String,
        code: i32,
    },

    #[error("index inconsistency: {0}")]
    IndexInconsistency(String),

    #[error("plan artifact checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("backend transport error: {0}")]
    BackendTransport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Process exit code surfaced to the host. Always binary.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Whether the requesting actor can fix this by issuing another command.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            DeployError::NoPlanOnFile { .. }
                | DeployError::ArtifactNotFound { .. }
                | DeployError::ToolFailure { .. }
                | DeployError::HookFailed { .. }
        )
    }
}

impl From<StorageError> for DeployError {
    fn from(err: StorageError) -> Self {
        DeployError::BackendTransport(err.to_string())
    }
}

/// Result type for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;
