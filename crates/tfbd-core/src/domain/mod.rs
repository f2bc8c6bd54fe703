//! Domain models for tf-branch-deploy.
//!
//! - `DeploymentRequest`: the classified intent of one invocation
//! - `PlanPointer`: tag-namespace record mapping `(env, commit)` to a run
//! - `ToolOutcome`: three-way result of a terraform invocation

pub mod error;
pub mod outcome;
pub mod pointer;
pub mod request;

pub use error::{DeployError, Result};
pub use outcome::{ExitClass, ToolOutcome, ToolStage};
pub use pointer::{pointer_glob, pointer_name, PlanPointer, PointerName, PointerValue};
pub use request::{validate_segment, CommitSha, DeploymentRequest, Operation};
