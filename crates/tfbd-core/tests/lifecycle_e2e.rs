//! End-to-end lifecycle scenarios.
//!
//! Each job gets its own workspace directory, as separate hosts would; the
//! only state shared between jobs is the tag namespace and the blob store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tfbd_core::fakes::ScriptedProcessRunner;
use tfbd_core::{
    artifact_name, ArtifactBlobStore, CommitSha, DeployConfig, DeployError, DispatchDecision,
    ExitClass, LifecycleOrchestrator, LifecycleReport, LifecycleState, PlanArtifactIndex,
    PlanPointer, PointerIndex, PublishResult, ReportTarget, RunId, ToolInvoker, ToolStage,
};
use tfbd_state::fakes::{MemoryBlobService, MemoryPointerRepository};
use tfbd_state::BlobService;

const CONFIG: &str = r#"
default-environment: dev
production-environments: prod
environments:
  dev: {}
  prod: {}
"#;

fn abc() -> String {
    format!("abc{}", "0".repeat(37))
}

fn xyz() -> String {
    format!("fed{}", "9".repeat(37))
}

/// Counts every call into the index before delegating.
struct SpyIndex {
    inner: PlanArtifactIndex,
    publishes: AtomicUsize,
    resolves: AtomicUsize,
    retracts: AtomicUsize,
}

impl SpyIndex {
    fn total(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
            + self.resolves.load(Ordering::SeqCst)
            + self.retracts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PointerIndex for SpyIndex {
    async fn publish(
        &self,
        environment: &str,
        sha: &CommitSha,
        run_id: &RunId,
        actor: &str,
        checksum: Option<&str>,
    ) -> tfbd_core::Result<PublishResult> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.inner.publish(environment, sha, run_id, actor, checksum).await
    }

    async fn resolve(&self, environment: &str, sha: &CommitSha) -> tfbd_core::Result<Option<PlanPointer>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(environment, sha).await
    }

    async fn retract(&self, environment: &str, sha: &CommitSha, run_id: &RunId) -> tfbd_core::Result<()> {
        self.retracts.fetch_add(1, Ordering::SeqCst);
        self.inner.retract(environment, sha, run_id).await
    }
}

struct World {
    tags: Arc<MemoryPointerRepository>,
    blobs: Arc<MemoryBlobService>,
    index: Arc<SpyIndex>,
    config: Arc<DeployConfig>,
}

impl World {
    fn new() -> Self {
        let tags = Arc::new(MemoryPointerRepository::new());
        let index = Arc::new(SpyIndex {
            inner: PlanArtifactIndex::new(tags.clone()),
            publishes: AtomicUsize::new(0),
            resolves: AtomicUsize::new(0),
            retracts: AtomicUsize::new(0),
        });
        Self {
            tags,
            blobs: Arc::new(MemoryBlobService::new()),
            index,
            config: Arc::new(DeployConfig::from_yaml_str(CONFIG).unwrap()),
        }
    }

    /// Run one job to completion with a fresh workspace.
    async fn run(
        &self,
        runner: &Arc<ScriptedProcessRunner>,
        decision: &DispatchDecision,
        run_id: &str,
    ) -> LifecycleReport {
        self.run_with(ToolInvoker::new(runner.clone()), decision, run_id).await
    }

    async fn run_with(
        &self,
        invoker: ToolInvoker,
        decision: &DispatchDecision,
        run_id: &str,
    ) -> LifecycleReport {
        let workspace = tempfile::tempdir().unwrap();
        let orchestrator = LifecycleOrchestrator::new(
            self.index.clone(),
            ArtifactBlobStore::new(self.blobs.clone()),
            invoker,
            self.config.clone(),
        )
        .with_workspace_root(workspace.path());
        orchestrator.execute(decision, "main", &RunId::from(run_id)).await
    }

    fn pointer_names(&self) -> Vec<String> {
        self.tags.tag_names()
    }
}

fn plan(sha: &str) -> DispatchDecision {
    DispatchDecision {
        proceed: true,
        target_ref: "feature/network".to_string(),
        commit_sha: sha.to_string(),
        environment: "dev".to_string(),
        preview_only: true,
        actor: "octocat".to_string(),
        extra_args: vec![],
        issue_number: Some(12),
    }
}

fn apply(sha: &str) -> DispatchDecision {
    DispatchDecision {
        preview_only: false,
        ..plan(sha)
    }
}

fn rollback() -> DispatchDecision {
    DispatchDecision {
        target_ref: "main".to_string(),
        preview_only: false,
        ..plan(&abc())
    }
}

fn runner(plan_exit: i32, plan_bytes: &[u8]) -> Arc<ScriptedProcessRunner> {
    let runner = Arc::new(ScriptedProcessRunner::new());
    runner.set_exit("plan", plan_exit);
    runner.set_plan_bytes(plan_bytes);
    runner
}

// ===========================================================================
// Scenarios
// ===========================================================================

#[tokio::test]
async fn scenario_a_plan_with_changes_then_apply() {
    let world = World::new();
    let planner = runner(2, b"plan from run 1");

    let report = world.run(&planner, &plan(&abc()), "1").await;
    assert_eq!(report.state, LifecycleState::Completed);
    assert!(report.changes_pending());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(world.pointer_names(), vec![format!("plan/dev/1/{}", abc())]);
    let sha = CommitSha::parse(&abc()).unwrap();
    assert!(world.blobs.contains(&RunId::from("1"), &artifact_name("dev", &sha)));

    let applier = Arc::new(ScriptedProcessRunner::new());
    let report = world.run(&applier, &apply(&abc()), "7").await;
    assert_eq!(report.state, LifecycleState::Completed);
    assert_eq!(report.pointer_run_id, Some(RunId::from("1")));
    assert_eq!(applier.subcommands(), vec!["init", "apply"]);
    assert_eq!(applier.applied_plans(), vec![b"plan from run 1".to_vec()]);
    assert!(world.pointer_names().is_empty(), "pointer retracted after apply");
}

#[tokio::test]
async fn scenario_b_apply_without_plan_is_blocked() {
    let world = World::new();
    let applier = Arc::new(ScriptedProcessRunner::new());

    let report = world.run(&applier, &apply(&xyz()), "3").await;
    assert_eq!(report.state, LifecycleState::Failed);
    assert_eq!(report.exit_code(), 1);
    match &report.error {
        Some(DeployError::NoPlanOnFile { environment, sha }) => {
            assert_eq!(environment, "dev");
            assert_eq!(sha, &xyz());
        }
        other => panic!("expected NoPlanOnFile, got {other:?}"),
    }
    assert!(applier.calls().is_empty(), "no tool invocation");
    assert_eq!(world.blobs.downloads(), 0);
}

#[tokio::test]
async fn scenario_c_replan_supersedes_earlier_plan() {
    let world = World::new();
    world.run(&runner(2, b"first plan"), &plan(&abc()), "1").await;
    let report = world.run(&runner(2, b"second plan"), &plan(&abc()), "2").await;
    assert_eq!(report.state, LifecycleState::Completed);
    assert_eq!(world.pointer_names(), vec![format!("plan/dev/2/{}", abc())]);

    let applier = Arc::new(ScriptedProcessRunner::new());
    let report = world.run(&applier, &apply(&abc()), "3").await;
    assert_eq!(report.pointer_run_id, Some(RunId::from("2")));
    assert_eq!(applier.applied_plans(), vec![b"second plan".to_vec()]);
}

#[tokio::test]
async fn scenario_d_rollback_aborts_when_plan_fails() {
    let world = World::new();
    let rb = runner(1, b"");

    let report = world.run(&rb, &rollback(), "5").await;
    assert_eq!(report.state, LifecycleState::Failed);
    assert_eq!(
        report.transitions,
        vec![
            LifecycleState::Classifying,
            LifecycleState::RollingBack,
            LifecycleState::Failed
        ]
    );
    assert!(matches!(
        report.error,
        Some(DeployError::ToolFailure {
            stage: ToolStage::Plan,
            code: 1
        })
    ));
    assert_eq!(rb.subcommands(), vec!["init", "plan"]);
    assert_eq!(world.index.total(), 0);
}

#[tokio::test]
async fn rollback_never_touches_the_index() {
    let world = World::new();
    // An old plan for the same key must neither be used nor removed.
    world.run(&runner(2, b"old plan"), &plan(&abc()), "1").await;
    let before = world.index.total();

    let rb = runner(2, b"rollback plan");
    let report = world.run(&rb, &rollback(), "9").await;
    assert_eq!(report.state, LifecycleState::Completed);
    assert_eq!(rb.subcommands(), vec!["init", "plan", "apply"]);
    assert_eq!(rb.applied_plans(), vec![b"rollback plan".to_vec()]);
    assert_eq!(world.index.total(), before);
    assert_eq!(world.pointer_names().len(), 1);
}

// ===========================================================================
// Exit-code mapping
// ===========================================================================

#[tokio::test]
async fn plan_exit_code_table() {
    for (code, class, published) in [
        (0, ExitClass::Clean, true),
        (2, ExitClass::ChangesPending, true),
        (1, ExitClass::Failure, false),
    ] {
        let world = World::new();
        let report = world.run(&runner(code, b"p"), &plan(&abc()), "1").await;
        let outcome = report.outcome.as_ref().unwrap();
        assert_eq!(outcome.exit_class, class, "plan exit {code}");
        assert_eq!(!world.pointer_names().is_empty(), published, "plan exit {code}");
        assert_eq!(report.exit_code(), if published { 0 } else { 1 });
        assert_eq!(world.blobs.uploads(), usize::from(published));
    }
}

#[tokio::test]
async fn apply_exit_code_table() {
    for (code, retracted) in [(0, true), (1, false), (2, false)] {
        let world = World::new();
        world.run(&runner(2, b"p"), &plan(&abc()), "1").await;

        let applier = Arc::new(ScriptedProcessRunner::new());
        applier.set_exit("apply", code);
        let report = world.run(&applier, &apply(&abc()), "2").await;

        assert_eq!(world.pointer_names().is_empty(), retracted, "apply exit {code}");
        let expected_exit = if retracted { 0 } else { 1 };
        assert_eq!(report.exit_code(), expected_exit, "apply exit {code}");
        if !retracted {
            assert!(matches!(
                report.error,
                Some(DeployError::ToolFailure {
                    stage: ToolStage::Apply,
                    ..
                })
            ));
        }
    }
}

// ===========================================================================
// Failure paths
// ===========================================================================

#[tokio::test]
async fn upload_failure_retracts_pointer_and_fails() {
    let world = World::new();
    world.blobs.fail_uploads(true);

    let report = world.run(&runner(2, b"p"), &plan(&abc()), "1").await;
    assert_eq!(report.state, LifecycleState::Failed);
    assert!(matches!(report.error, Some(DeployError::IndexInconsistency(_))));
    assert!(world.pointer_names().is_empty());

    // A later apply fails fast on resolve, not on download.
    let applier = Arc::new(ScriptedProcessRunner::new());
    let report = world.run(&applier, &apply(&abc()), "2").await;
    assert!(matches!(report.error, Some(DeployError::NoPlanOnFile { .. })));
}

#[tokio::test]
async fn expired_artifact_keeps_pointer_and_runs_nothing() {
    let world = World::new();
    world.run(&runner(2, b"p"), &plan(&abc()), "1").await;
    let sha = CommitSha::parse(&abc()).unwrap();
    world.blobs.expire(&RunId::from("1"), &artifact_name("dev", &sha));

    let applier = Arc::new(ScriptedProcessRunner::new());
    let report = world.run(&applier, &apply(&abc()), "2").await;
    match &report.error {
        Some(DeployError::ArtifactNotFound { run_id, .. }) => assert_eq!(run_id, "1"),
        other => panic!("expected ArtifactNotFound, got {other:?}"),
    }
    assert!(applier.calls().is_empty());
    assert_eq!(world.pointer_names().len(), 1);
}

#[tokio::test]
async fn tampered_artifact_is_never_applied() {
    let world = World::new();
    world.run(&runner(2, b"reviewed plan"), &plan(&abc()), "1").await;
    let sha = CommitSha::parse(&abc()).unwrap();
    world
        .blobs
        .upload(&RunId::from("1"), &artifact_name("dev", &sha), b"something else")
        .await
        .unwrap();

    let applier = Arc::new(ScriptedProcessRunner::new());
    let report = world.run(&applier, &apply(&abc()), "2").await;
    assert!(matches!(report.error, Some(DeployError::ChecksumMismatch { .. })));
    assert!(applier.calls().is_empty());
}

#[tokio::test]
async fn retract_failure_does_not_fail_a_successful_apply() {
    let world = World::new();
    world.run(&runner(2, b"p"), &plan(&abc()), "1").await;
    world.tags.fail_deletes(true);

    let report = world.run(&Arc::new(ScriptedProcessRunner::new()), &apply(&abc()), "2").await;
    assert_eq!(report.state, LifecycleState::Completed);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(world.pointer_names().len(), 1);
}

#[tokio::test]
async fn environments_are_isolated() {
    let world = World::new();
    world.run(&runner(2, b"dev plan"), &plan(&abc()), "1").await;

    let prod_apply = DispatchDecision {
        environment: "prod".to_string(),
        ..apply(&abc())
    };
    let applier = Arc::new(ScriptedProcessRunner::new());
    let report = world.run(&applier, &prod_apply, "2").await;
    assert!(matches!(report.error, Some(DeployError::NoPlanOnFile { .. })));
    assert!(applier.calls().is_empty());
}

#[tokio::test]
async fn halted_request_has_no_side_effects() {
    let world = World::new();
    let r = Arc::new(ScriptedProcessRunner::new());
    let halted = DispatchDecision {
        proceed: false,
        ..apply(&abc())
    };
    let report = world.run(&r, &halted, "1").await;
    assert_eq!(report.state, LifecycleState::Halted);
    assert_eq!(report.exit_code(), 0);
    assert!(r.calls().is_empty());
    assert_eq!(world.index.total(), 0);
}

#[tokio::test]
async fn wrapper_failure_does_not_mask_plan_result() {
    let world = World::new();
    let r = runner(2, b"p");
    r.set_wrapper_exit(Some(1));
    let invoker = ToolInvoker::new(r.clone()).with_report(ReportTarget::from_parts(
        Some("acme/infra"),
        Some(12),
        Some("t0ken"),
    ));

    let report = world.run_with(invoker, &plan(&abc()), "1").await;
    assert_eq!(report.state, LifecycleState::Completed);
    let outcome = report.outcome.unwrap();
    assert_eq!(outcome.raw_exit_code, 2);
    assert!(!outcome.report_sent);
    assert_eq!(world.pointer_names().len(), 1);
}
