//! tfbd-core: plan artifact addressing and deployment lifecycle
//!
//! Plans and applies run in separate, stateless jobs. A plan job publishes a
//! pointer `plan/{env}/{run}/{sha}` into a tag namespace and uploads the plan
//! artifact into its run-scoped blob storage; an apply job resolves the
//! pointer for the same `(env, sha)` and applies exactly that artifact, or
//! refuses to run.

pub mod artifacts;
pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod fakes;
pub mod git;
pub mod hooks;
pub mod index;
pub mod invoker;
pub mod lifecycle;
pub mod obs;
pub mod outputs;
pub mod reporting;
pub mod runner;
pub mod telemetry;

pub use artifacts::{artifact_name, checksum, verify_checksum, ArtifactBlobStore};
pub use classifier::{Classification, OperationClassifier};
pub use config::{
    json_schema, DeployConfig, EnvironmentResolver, HotfixConfig, ResolvedEnvironment,
    DEFAULT_CONFIG_FILE,
};
pub use dispatch::{split_extra_args, DispatchDecision};
pub use domain::{
    CommitSha, DeployError, DeploymentRequest, ExitClass, Operation, PlanPointer, Result,
    ToolOutcome, ToolStage,
};
pub use git::{capture_head_sha, is_git_repo};
pub use hooks::{HookPhase, HookResult, HookRunner, HookSession, HooksConfig};
pub use index::{PlanArtifactIndex, PointerIndex, PublishResult};
pub use invoker::{ReportTarget, ToolArgs, ToolInvoker};
pub use lifecycle::{LifecycleOrchestrator, LifecycleReport, LifecycleState};
pub use outputs::OutputWriter;
pub use reporting::{render_result_comment, write_result_comment, ResultMetadata};
pub use runner::{CommandOutput, CommandSpec, ProcessRunner, SystemProcessRunner};
pub use telemetry::init_tracing;

pub use tfbd_state::RunId;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
