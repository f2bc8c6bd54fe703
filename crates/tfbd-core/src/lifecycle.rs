//! Deployment lifecycle.
//!
//! `Classifying -> {Halted | Planning | Applying | RollingBack} -> {Completed | Failed}`
//!
//! Apply only ever runs against the artifact a resolved pointer names. A plan
//! publishes its pointer before uploading the artifact; if the upload fails
//! the pointer is retracted so a later apply fails fast on resolve.
//!
//! Configured hooks run around the terraform stages of every operation and
//! their results travel back in the report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tfbd_state::RunId;
use tracing::{info, warn, Instrument};

use crate::artifacts::{artifact_name, checksum, verify_checksum, ArtifactBlobStore};
use crate::classifier::OperationClassifier;
use crate::config::{EnvironmentResolver, ResolvedEnvironment};
use crate::dispatch::DispatchDecision;
use crate::domain::{DeployError, DeploymentRequest, Operation, Result, ToolOutcome};
use crate::hooks::{HookContext, HookResult, HookRunner, HookSession};
use crate::index::PointerIndex;
use crate::invoker::{ToolArgs, ToolInvoker};
use crate::obs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Classifying,
    Halted,
    Planning,
    Applying,
    RollingBack,
    Completed,
    Failed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Classifying => "classifying",
            LifecycleState::Halted => "halted",
            LifecycleState::Planning => "planning",
            LifecycleState::Applying => "applying",
            LifecycleState::RollingBack => "rolling_back",
            LifecycleState::Completed => "completed",
            LifecycleState::Failed => "failed",
        }
    }

    fn for_operation(operation: Operation) -> Self {
        match operation {
            Operation::Plan => LifecycleState::Planning,
            Operation::Apply => LifecycleState::Applying,
            Operation::Rollback => LifecycleState::RollingBack,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one lifecycle run produced.
#[derive(Debug)]
pub struct LifecycleReport {
    pub state: LifecycleState,
    pub request: Option<DeploymentRequest>,
    pub outcome: Option<ToolOutcome>,
    /// Run whose artifact was published (plan) or applied (apply).
    pub pointer_run_id: Option<RunId>,
    pub plan_checksum: Option<String>,
    pub error: Option<DeployError>,
    pub transitions: Vec<LifecycleState>,
    pub hooks: Vec<HookResult>,
    pub duration_ms: u64,
}

impl LifecycleReport {
    fn new() -> Self {
        Self {
            state: LifecycleState::Classifying,
            request: None,
            outcome: None,
            pointer_run_id: None,
            plan_checksum: None,
            error: None,
            transitions: vec![LifecycleState::Classifying],
            hooks: Vec::new(),
            duration_ms: 0,
        }
    }

    fn enter(&mut self, state: LifecycleState) {
        self.state = state;
        self.transitions.push(state);
    }

    /// 0 for Completed and Halted, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            LifecycleState::Completed | LifecycleState::Halted => 0,
            _ => self.error.as_ref().map_or(1, DeployError::exit_code),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == LifecycleState::Completed
    }

    pub fn changes_pending(&self) -> bool {
        self.outcome.as_ref().is_some_and(ToolOutcome::changes_pending)
    }
}

pub struct LifecycleOrchestrator {
    index: Arc<dyn PointerIndex>,
    blobs: ArtifactBlobStore,
    invoker: ToolInvoker,
    resolver: Arc<dyn EnvironmentResolver>,
    workspace_root: PathBuf,
}

impl LifecycleOrchestrator {
    pub fn new(
        index: Arc<dyn PointerIndex>,
        blobs: ArtifactBlobStore,
        invoker: ToolInvoker,
        resolver: Arc<dyn EnvironmentResolver>,
    ) -> Self {
        Self {
            index,
            blobs,
            invoker,
            resolver,
            workspace_root: PathBuf::from("."),
        }
    }

    /// Directory that environment working directories are relative to.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Classify a dispatcher decision and drive it to a terminal state.
    ///
    /// Never returns an error: failures end in `LifecycleState::Failed` with
    /// the cause in `LifecycleReport::error`.
    pub async fn execute(
        &self,
        decision: &DispatchDecision,
        stable_branch: &str,
        run_id: &RunId,
    ) -> LifecycleReport {
        let started = Instant::now();
        let mut report = LifecycleReport::new();

        let request = match OperationClassifier::request(decision, stable_branch, run_id) {
            Ok(Some(request)) => request,
            Ok(None) => {
                obs::emit_classified("halt", &decision.environment, &decision.target_ref);
                report.enter(LifecycleState::Halted);
                return finish(report, started);
            }
            Err(err) => {
                report.error = Some(err);
                report.enter(LifecycleState::Failed);
                return finish(report, started);
            }
        };
        obs::emit_classified(
            request.operation.as_str(),
            &request.environment,
            &request.target_ref,
        );

        let span = obs::deploy_span(&request);
        report.enter(LifecycleState::for_operation(request.operation));
        report.request = Some(request.clone());

        let result = self.drive(&request, &mut report).instrument(span).await;
        match result {
            Ok(()) => report.enter(LifecycleState::Completed),
            Err(err) => {
                warn!(error = %err, state = %report.state, "deployment failed");
                report.error = Some(err);
                report.enter(LifecycleState::Failed);
            }
        }
        finish(report, started)
    }

    async fn drive(&self, request: &DeploymentRequest, report: &mut LifecycleReport) -> Result<()> {
        let env = self.resolver.resolve(&request.environment)?;
        let working_dir = self.workspace_root.join(&env.working_directory);
        let mut hooks = self.hook_session(request, &env, &working_dir);
        let result = self.run_operation(request, &env, &working_dir, &mut hooks, report).await;
        report.hooks = hooks.into_results();
        result
    }

    fn hook_session(
        &self,
        request: &DeploymentRequest,
        env: &ResolvedEnvironment,
        working_dir: &Path,
    ) -> HookSession {
        if env.hooks.is_empty() {
            return HookSession::disabled();
        }
        let runner = HookRunner::new(self.invoker.runner(), env.hooks.clone())
            .with_terraform(self.invoker.binary());
        HookSession::new(
            Arc::new(runner),
            HookContext::for_request(request, env, working_dir),
        )
    }

    async fn run_operation(
        &self,
        request: &DeploymentRequest,
        env: &ResolvedEnvironment,
        working_dir: &Path,
        hooks: &mut HookSession,
        report: &mut LifecycleReport,
    ) -> Result<()> {
        let args = env.tool_args(&request.extra_args);
        let plan_file = working_dir.join(artifact_name(&request.environment, &request.commit_sha));

        match request.operation {
            Operation::Plan => {
                let outcome = self
                    .invoker
                    .invoke_with_hooks(Operation::Plan, working_dir, &args, &plan_file, hooks)
                    .await?;
                report.outcome = Some(outcome.clone());
                fail_on_tool_failure(&outcome)?;
                self.publish_plan(request, &plan_file, report).await
            }
            Operation::Apply => {
                let result = self
                    .apply_plan(request, working_dir, &args, &plan_file, hooks, report)
                    .await;
                remove_local_plan(&plan_file).await;
                result
            }
            Operation::Rollback => {
                // The stable branch is applied straight from a fresh plan; the
                // index is never consulted.
                let outcome = self
                    .invoker
                    .invoke_with_hooks(Operation::Rollback, working_dir, &args, &plan_file, hooks)
                    .await;
                remove_local_plan(&plan_file).await;
                let outcome = outcome?;
                report.outcome = Some(outcome.clone());
                fail_on_tool_failure(&outcome)
            }
        }
    }

    async fn publish_plan(
        &self,
        request: &DeploymentRequest,
        plan_file: &Path,
        report: &mut LifecycleReport,
    ) -> Result<()> {
        let bytes = tokio::fs::read(plan_file).await.map_err(|err| {
            DeployError::Io(std::io::Error::new(
                err.kind(),
                format!("plan file {} not produced: {err}", plan_file.display()),
            ))
        })?;
        let sum = checksum(&bytes);
        report.plan_checksum = Some(sum.clone());

        let published = self
            .index
            .publish(
                &request.environment,
                &request.commit_sha,
                &request.run_id,
                &request.actor,
                Some(&sum),
            )
            .await?;
        report.pointer_run_id = Some(published.pointer.run_id.clone());

        let name = artifact_name(&request.environment, &request.commit_sha);
        if let Err(upload_err) = self.blobs.upload(&request.run_id, &name, &bytes).await {
            let tag = published.pointer.tag_name();
            let retracted = match self
                .index
                .retract(&request.environment, &request.commit_sha, &request.run_id)
                .await
            {
                Ok(()) => "pointer retracted",
                Err(err) => {
                    obs::emit_retract_failed(&tag, &err);
                    "pointer could not be retracted"
                }
            };
            return Err(DeployError::IndexInconsistency(format!(
                "plan pointer {tag} was published but the artifact upload failed ({upload_err}); {retracted}"
            )));
        }

        info!(artifact = %name, checksum = %sum, "plan artifact stored");
        Ok(())
    }

    async fn apply_plan(
        &self,
        request: &DeploymentRequest,
        working_dir: &Path,
        args: &ToolArgs,
        plan_file: &Path,
        hooks: &mut HookSession,
        report: &mut LifecycleReport,
    ) -> Result<()> {
        let pointer = self
            .index
            .resolve(&request.environment, &request.commit_sha)
            .await?
            .ok_or_else(|| DeployError::NoPlanOnFile {
                environment: request.environment.clone(),
                sha: request.commit_sha.to_string(),
            })?;
        report.pointer_run_id = Some(pointer.run_id.clone());

        let name = artifact_name(&request.environment, &request.commit_sha);
        let bytes = self.blobs.download(&pointer.run_id, &name).await?;
        match pointer.checksum.as_deref() {
            Some(expected) => verify_checksum(&bytes, expected)?,
            None => warn!(tag = %pointer.tag_name(), "pointer carries no checksum; artifact not verified"),
        }
        report.plan_checksum = Some(checksum(&bytes));
        tokio::fs::write(plan_file, &bytes).await?;

        let outcome = self
            .invoker
            .invoke_with_hooks(Operation::Apply, working_dir, args, plan_file, hooks)
            .await?;
        report.outcome = Some(outcome.clone());
        // A failed apply keeps its pointer so the same plan can be inspected or retried.
        fail_on_tool_failure(&outcome)?;

        if let Err(err) = self
            .index
            .retract(&request.environment, &request.commit_sha, &pointer.run_id)
            .await
        {
            obs::emit_retract_failed(&pointer.tag_name(), &err);
        }
        Ok(())
    }

    /// Command lines the request would run, without running anything.
    pub fn describe(&self, request: &DeploymentRequest) -> Result<Vec<String>> {
        let env = self.resolver.resolve(&request.environment)?;
        let working_dir = self.workspace_root.join(&env.working_directory);
        let plan_file = working_dir.join(artifact_name(&request.environment, &request.commit_sha));
        let mut lines = self.invoker.describe(
            request.operation,
            &working_dir,
            &env.tool_args(&request.extra_args),
            &plan_file,
        );
        lines.extend(
            env.hooks
                .counts()
                .into_iter()
                .map(|(phase, n)| format!("{phase} hooks: {n}")),
        );
        Ok(lines)
    }
}

fn fail_on_tool_failure(outcome: &ToolOutcome) -> Result<()> {
    if outcome.exit_class.is_failure() {
        return Err(DeployError::ToolFailure {
            stage: outcome.stage,
            code: outcome.raw_exit_code,
        });
    }
    Ok(())
}

async fn remove_local_plan(plan_file: &Path) {
    match tokio::fs::remove_file(plan_file).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %plan_file.display(), error = %err, "could not remove local plan file"),
    }
}

fn finish(mut report: LifecycleReport, started: Instant) -> LifecycleReport {
    report.duration_ms = started.elapsed().as_millis() as u64;
    obs::emit_deploy_finished(report.state.as_str(), report.duration_ms, report.changes_pending());
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployConfig;
    use crate::fakes::ScriptedProcessRunner;
    use crate::index::PlanArtifactIndex;
    use tfbd_state::fakes::{MemoryBlobService, MemoryPointerRepository};

    const CONFIG: &str = "default-environment: dev\nproduction-environments: []\nenvironments:\n  dev: {}\n";

    struct Harness {
        _root: tempfile::TempDir,
        tags: Arc<MemoryPointerRepository>,
        runner: Arc<ScriptedProcessRunner>,
        orchestrator: LifecycleOrchestrator,
    }

    fn harness() -> Harness {
        harness_with(CONFIG)
    }

    fn harness_with(config: &str) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let tags = Arc::new(MemoryPointerRepository::new());
        let runner = Arc::new(ScriptedProcessRunner::new());
        let orchestrator = LifecycleOrchestrator::new(
            Arc::new(PlanArtifactIndex::new(tags.clone())),
            ArtifactBlobStore::new(Arc::new(MemoryBlobService::new())),
            ToolInvoker::new(runner.clone()),
            Arc::new(DeployConfig::from_yaml_str(config).unwrap()),
        )
        .with_workspace_root(root.path());
        Harness {
            _root: root,
            tags,
            runner,
            orchestrator,
        }
    }

    fn decision(preview: bool) -> DispatchDecision {
        DispatchDecision {
            proceed: true,
            target_ref: "feature/x".to_string(),
            commit_sha: "b".repeat(40),
            environment: "dev".to_string(),
            preview_only: preview,
            actor: "octocat".to_string(),
            ..DispatchDecision::default()
        }
    }

    #[tokio::test]
    async fn halted_request_touches_nothing() {
        let h = harness();
        let mut d = decision(false);
        d.proceed = false;
        let report = h.orchestrator.execute(&d, "main", &RunId::from("1")).await;
        assert_eq!(report.state, LifecycleState::Halted);
        assert_eq!(report.exit_code(), 0);
        assert!(h.runner.calls().is_empty());
        assert_eq!(h.tags.calls().total(), 0);
    }

    #[tokio::test]
    async fn plan_walks_planning_to_completed() {
        let h = harness();
        let report = h.orchestrator.execute(&decision(true), "main", &RunId::from("1")).await;
        assert_eq!(
            report.transitions,
            vec![
                LifecycleState::Classifying,
                LifecycleState::Planning,
                LifecycleState::Completed
            ]
        );
        assert_eq!(report.pointer_run_id, Some(RunId::from("1")));
        assert!(report.plan_checksum.is_some());
    }

    #[tokio::test]
    async fn invalid_sha_fails_during_classification() {
        let h = harness();
        let mut d = decision(true);
        d.commit_sha = "xyz".to_string();
        let report = h.orchestrator.execute(&d, "main", &RunId::from("1")).await;
        assert_eq!(report.state, LifecycleState::Failed);
        assert!(matches!(report.error, Some(DeployError::InvalidRequest(_))));
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_environment_fails_before_any_tool_runs() {
        let h = harness();
        let mut d = decision(true);
        d.environment = "qa".to_string();
        let report = h.orchestrator.execute(&d, "main", &RunId::from("1")).await;
        assert!(matches!(report.error, Some(DeployError::Config(_))));
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn describe_lists_commands_without_running() {
        let h = harness();
        let request = OperationClassifier::request(&decision(false), "main", &RunId::from("1"))
            .unwrap()
            .unwrap();
        let lines = h.orchestrator.describe(&request).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("apply"));
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn blocking_pre_plan_hook_prevents_publish() {
        let h = harness_with(&format!(
            "{CONFIG}hooks:\n  pre-plan:\n    - name: policy\n      run: exit 3\n"
        ));
        h.runner.passthrough("sh");
        let report = h.orchestrator.execute(&decision(true), "main", &RunId::from("1")).await;
        assert_eq!(report.state, LifecycleState::Failed);
        assert!(matches!(
            report.error,
            Some(DeployError::HookFailed { ref name, code: 3, .. }) if name == "policy"
        ));
        assert_eq!(report.hooks.len(), 1);
        assert!(report.pointer_run_id.is_none());
        assert_eq!(h.tags.calls().total(), 0);
        assert_eq!(h.runner.programs(), vec!["terraform", "sh"]);
    }

    #[tokio::test]
    async fn post_plan_hook_sees_the_plan_file() {
        let h = harness_with(&format!(
            "{CONFIG}hooks:\n  post-plan:\n    - name: inspect\n      run: test -s \"$TF_BD_PLAN_FILE\" && test \"$TF_BD_HAS_CHANGES\" = true\n"
        ));
        h.runner.passthrough("sh");
        h.runner.set_exit("plan", 2);
        let report = h.orchestrator.execute(&decision(true), "main", &RunId::from("1")).await;
        assert_eq!(report.state, LifecycleState::Completed, "{:?}", report.error);
        assert_eq!(report.hooks.len(), 1);
        assert!(report.hooks[0].success());
        assert_eq!(report.pointer_run_id, Some(RunId::from("1")));
    }

    #[tokio::test]
    async fn describe_mentions_configured_hooks() {
        let h = harness_with(&format!("{CONFIG}hooks:\n  builtin:\n    validate: {{}}\n"));
        let request = OperationClassifier::request(&decision(true), "main", &RunId::from("1"))
            .unwrap()
            .unwrap();
        let lines = h.orchestrator.describe(&request).unwrap();
        assert_eq!(lines.last().map(String::as_str), Some("pre-plan hooks: 1"));
    }
}
