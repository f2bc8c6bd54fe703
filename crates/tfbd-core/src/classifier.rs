//! Decide whether a request is a plan, an apply or a rollback.
//!
//! Rollback is only the *apply* of the stable branch. A preview of the stable
//! branch is an ordinary plan.

use tfbd_state::RunId;

use crate::dispatch::DispatchDecision;
use crate::domain::{validate_segment, CommitSha, DeploymentRequest, Operation, Result};

/// Outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The dispatcher said no. Nothing else runs.
    Halt,
    Plan,
    Apply,
    Rollback,
}

impl Classification {
    pub fn operation(self) -> Option<Operation> {
        match self {
            Classification::Halt => None,
            Classification::Plan => Some(Operation::Plan),
            Classification::Apply => Some(Operation::Apply),
            Classification::Rollback => Some(Operation::Rollback),
        }
    }
}

pub struct OperationClassifier;

impl OperationClassifier {
    /// Total over its inputs given a non-empty `stable_branch`.
    pub fn classify(
        proceed: bool,
        target_ref: &str,
        stable_branch: &str,
        preview_only: bool,
    ) -> Classification {
        if !proceed {
            return Classification::Halt;
        }
        match (target_ref == stable_branch, preview_only) {
            (true, false) => Classification::Rollback,
            (_, true) => Classification::Plan,
            (false, false) => Classification::Apply,
        }
    }

    /// Classify a dispatcher decision and build the request.
    ///
    /// Returns `Ok(None)` for a halted request. Inputs are only validated once
    /// the request is known to proceed.
    pub fn request(
        decision: &DispatchDecision,
        stable_branch: &str,
        run_id: &RunId,
    ) -> Result<Option<DeploymentRequest>> {
        let classification = Self::classify(
            decision.proceed,
            &decision.target_ref,
            stable_branch,
            decision.preview_only,
        );
        let Some(operation) = classification.operation() else {
            return Ok(None);
        };

        validate_segment("environment", &decision.environment)?;
        validate_segment("run id", run_id.as_str())?;
        let commit_sha = CommitSha::parse(&decision.commit_sha)?;

        Ok(Some(DeploymentRequest {
            environment: decision.environment.clone(),
            commit_sha,
            target_ref: decision.target_ref.clone(),
            operation,
            extra_args: decision.extra_args.clone(),
            run_id: run_id.clone(),
            actor: decision.actor.clone(),
            issue_number: decision.issue_number,
        }))
    }
}
