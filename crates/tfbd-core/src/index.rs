//! Plan pointer index.
//!
//! `PointerIndex` is the contract the lifecycle depends on:
//! - `publish` supersedes: after it returns, the new pointer is the newest
//!   one for its key, and older pointers for the key have been removed
//!   (best effort).
//! - `resolve` returns the newest pointer for the key, or `None`.
//! - `retract` removes the pointer for an exact `(env, sha, run)` triple.
//!
//! `PlanArtifactIndex` implements it over any `PointerRepository`, by default
//! a git tag namespace. Another backend (a key-value store, a database) only
//! has to preserve the same supersede and newest-wins semantics.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tfbd_state::{PointerRepository, RunId, StorageError, TagEntry};
use tracing::{debug, warn};

use crate::domain::{
    pointer_glob, pointer_name, validate_segment, CommitSha, DeployError, PlanPointer,
    PointerName, PointerValue, Result,
};
use crate::obs;

/// What `publish` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishResult {
    pub pointer: PlanPointer,
    /// Runs whose pointers for the same key were replaced.
    pub superseded: Vec<RunId>,
    /// Whether the initial write was rejected and retried with force.
    pub forced: bool,
}

#[async_trait]
pub trait PointerIndex: Send + Sync {
    async fn publish(
        &self,
        environment: &str,
        sha: &CommitSha,
        run_id: &RunId,
        actor: &str,
        checksum: Option<&str>,
    ) -> Result<PublishResult>;

    async fn resolve(&self, environment: &str, sha: &CommitSha) -> Result<Option<PlanPointer>>;

    async fn retract(&self, environment: &str, sha: &CommitSha, run_id: &RunId) -> Result<()>;
}

/// Pointer index over a tag namespace.
pub struct PlanArtifactIndex {
    repo: Arc<dyn PointerRepository>,
}

impl PlanArtifactIndex {
    pub fn new(repo: Arc<dyn PointerRepository>) -> Self {
        Self { repo }
    }

    /// Pointers for `(environment, sha)` found by a name scan, unsorted.
    async fn candidates(&self, environment: &str, sha: &CommitSha) -> Result<Vec<PlanPointer>> {
        let entries = self
            .repo
            .list_tags(&pointer_glob(environment, sha))
            .await?;
        Ok(entries
            .iter()
            .filter_map(|entry| pointer_from_entry(entry, environment, sha))
            .collect())
    }

    async fn write_pointer(&self, name: &str, sha: &CommitSha, message: &str) -> Result<bool> {
        match self.repo.create_tag(name, sha.as_str(), message, false).await {
            Ok(()) => Ok(false),
            Err(first) => {
                warn!(tag = %name, error = %first, "pointer write rejected, retrying once with force");
                self.repo
                    .create_tag(name, sha.as_str(), message, true)
                    .await
                    .map_err(|forced| {
                        DeployError::BackendTransport(format!(
                            "could not publish plan pointer {name}: {forced} (initial attempt: {first})"
                        ))
                    })?;
                Ok(true)
            }
        }
    }
}

/// Build a pointer from a listed tag.
///
/// The run always comes from the name. The message supplies the exact
/// creation time, author and checksum when it decodes; otherwise the
/// listing timestamp is used.
fn pointer_from_entry(entry: &TagEntry, environment: &str, sha: &CommitSha) -> Option<PlanPointer> {
    let parsed = PointerName::parse(&entry.name)?;
    if parsed.environment != environment || parsed.sha != sha.as_str() {
        return None;
    }
    let value = entry
        .message
        .as_deref()
        .and_then(|m| serde_json::from_str::<PointerValue>(m).ok())
        .filter(|v| v.run_id == parsed.run_id.as_str());

    Some(match value {
        Some(value) => PlanPointer {
            environment: parsed.environment,
            commit_sha: sha.clone(),
            run_id: parsed.run_id,
            created_at: value.created_at,
            created_by: value.created_by,
            checksum: value.checksum,
        },
        None => PlanPointer {
            environment: parsed.environment,
            commit_sha: sha.clone(),
            run_id: parsed.run_id,
            created_at: entry.created_at,
            created_by: String::new(),
            checksum: None,
        },
    })
}

/// Newest first; ties broken by run ID descending so the order is total.
fn newest_first(pointers: &mut [PlanPointer]) {
    pointers.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.run_id.cmp(&a.run_id))
    });
}

#[async_trait]
impl PointerIndex for PlanArtifactIndex {
    async fn publish(
        &self,
        environment: &str,
        sha: &CommitSha,
        run_id: &RunId,
        actor: &str,
        checksum: Option<&str>,
    ) -> Result<PublishResult> {
        validate_segment("environment", environment)?;
        validate_segment("run id", run_id.as_str())?;

        // A failed scan only costs us the cleanup of older pointers; resolve
        // still picks the newest, so the write goes ahead.
        let existing = match self.candidates(environment, sha).await {
            Ok(found) => found,
            Err(err) => {
                warn!(error = %err, "could not list existing plan pointers; older pointers will not be removed");
                Vec::new()
            }
        };

        let value = PointerValue {
            run_id: run_id.to_string(),
            created_at: Utc::now(),
            created_by: actor.to_string(),
            checksum: checksum.map(str::to_string),
        };
        let name = pointer_name(environment, run_id, sha);
        let message = serde_json::to_string(&value)?;
        let forced = self.write_pointer(&name, sha, &message).await?;

        let mut superseded = Vec::new();
        for old in existing.iter().filter(|p| &p.run_id != run_id) {
            let old_name = old.tag_name();
            obs::emit_plan_superseded(&old_name, run_id.as_str());
            match self.repo.delete_tag(&old_name).await {
                Ok(()) | Err(StorageError::NotFound { .. }) => {}
                Err(err) => {
                    warn!(tag = %old_name, error = %err, "could not remove superseded pointer; newest still wins on resolve");
                }
            }
            superseded.push(old.run_id.clone());
        }

        obs::emit_plan_published(&name, superseded.len(), forced);
        Ok(PublishResult {
            pointer: PlanPointer {
                environment: environment.to_string(),
                commit_sha: sha.clone(),
                run_id: run_id.clone(),
                created_at: value.created_at,
                created_by: value.created_by,
                checksum: value.checksum,
            },
            superseded,
            forced,
        })
    }

    async fn resolve(&self, environment: &str, sha: &CommitSha) -> Result<Option<PlanPointer>> {
        validate_segment("environment", environment)?;
        let mut found = self.candidates(environment, sha).await?;
        newest_first(&mut found);
        let count = found.len();
        let newest = found.into_iter().next();
        if let Some(pointer) = &newest {
            obs::emit_plan_resolved(&pointer.tag_name(), count);
        } else {
            debug!(environment, sha = %sha, "no plan pointer on file");
        }
        Ok(newest)
    }

    async fn retract(&self, environment: &str, sha: &CommitSha, run_id: &RunId) -> Result<()> {
        let name = pointer_name(environment, run_id, sha);
        match self.repo.delete_tag(&name).await {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound { .. }) => {
                debug!(tag = %name, "pointer already gone");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
