//! Plan pointers stored in the tag namespace.
//!
//! The logical key is `(environment, commit)`, but the tag name also embeds
//! the run ID: `plan/{env}/{run}/{sha}`. The namespace can be listed by glob
//! and not queried by value, so the run has to be recoverable from the name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tfbd_state::RunId;

use crate::domain::request::CommitSha;

/// Top-level tag namespace for pointers.
pub const POINTER_NAMESPACE: &str = "plan";

/// Tag name for one pointer.
pub fn pointer_name(environment: &str, run_id: &RunId, sha: &CommitSha) -> String {
    format!("{POINTER_NAMESPACE}/{environment}/{run_id}/{sha}")
}

/// Glob matching every pointer for `(environment, sha)`, whatever the run.
pub fn pointer_glob(environment: &str, sha: &CommitSha) -> String {
    format!("{POINTER_NAMESPACE}/{environment}/*/{sha}")
}

/// Components recovered from a pointer tag name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerName {
    pub environment: String,
    pub run_id: RunId,
    pub sha: String,
}

impl PointerName {
    /// Split `plan/{env}/{run}/{sha}`. Returns `None` for any other shape.
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.split('/');
        let namespace = parts.next()?;
        let environment = parts.next()?;
        let run_id = parts.next()?;
        let sha = parts.next()?;
        if parts.next().is_some()
            || namespace != POINTER_NAMESPACE
            || environment.is_empty()
            || run_id.is_empty()
            || sha.is_empty()
        {
            return None;
        }
        Some(PointerName {
            environment: environment.to_string(),
            run_id: RunId::from(run_id),
            sha: sha.to_string(),
        })
    }
}

/// Pointer value, serialized as JSON into the tag message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerValue {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// A resolved pointer: which run produced the plan for `(environment, commit)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanPointer {
    pub environment: String,
    pub commit_sha: CommitSha,
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    /// SHA-256 of the plan artifact, when the publisher recorded one.
    pub checksum: Option<String>,
}

impl PlanPointer {
    pub fn tag_name(&self) -> String {
        pointer_name(&self.environment, &self.run_id, &self.commit_sha)
    }
}
