//! Terraform invocation with exit-code classification.
//!
//! When a report target is configured every plan/apply runs inside the
//! `tfcmt` wrapper, which posts the output to the request. The wrapper can
//! fail on its own, so the terraform exit code is captured separately
//! through a small `sh` shim that writes it to a file before exiting. A
//! wrapper that is not installed downgrades the run to unreported terraform.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{DeployError, ExitClass, Operation, Result, ToolOutcome, ToolStage};
use crate::hooks::{HookPhase, HookSession};
use crate::obs;
use crate::runner::{CommandSpec, ProcessRunner};

/// `$0` of the shim script, also used to find the exit file in argv.
pub const SHIM_NAME: &str = "tfbd-shim";

const SHIM_SCRIPT: &str =
    r#"exit_file="$1"; shift; "$@"; code=$?; printf %s "$code" > "$exit_file"; exit "$code""#;

/// Resolved terraform arguments for one environment plus the request's extra args.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolArgs {
    pub var_files: Vec<String>,
    pub backend_configs: Vec<String>,
    pub init_args: Vec<String>,
    pub plan_args: Vec<String>,
    /// Appended to plan only. A saved-plan apply takes no extra arguments.
    pub extra_args: Vec<String>,
}

/// Where the wrapper posts its report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTarget {
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    pub token: String,
}

impl ReportTarget {
    /// Build a target from `owner/repo`. Returns `None` unless every piece is present.
    pub fn from_parts(
        repository: Option<&str>,
        issue_number: Option<u64>,
        token: Option<&str>,
    ) -> Option<Self> {
        let (owner, repo) = repository?.split_once('/')?;
        let token = token.filter(|t| !t.is_empty())?;
        if owner.is_empty() || repo.is_empty() {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            issue_number: issue_number?,
            token: token.to_string(),
        })
    }
}

/// Result of one stage: inner exit code and whether the wrapper reported it.
#[derive(Debug, Clone, Copy)]
struct StageRun {
    code: i32,
    report_sent: bool,
}

pub struct ToolInvoker {
    runner: Arc<dyn ProcessRunner>,
    binary: String,
    wrapper: String,
    report: Option<ReportTarget>,
    /// Set once spawning the wrapper failed with `NotFound`.
    wrapper_missing: AtomicBool,
}

impl ToolInvoker {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            binary: "terraform".to_string(),
            wrapper: "tfcmt".to_string(),
            report: None,
            wrapper_missing: AtomicBool::new(false),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_wrapper(mut self, wrapper: impl Into<String>) -> Self {
        self.wrapper = wrapper.into();
        self
    }

    pub fn with_report(mut self, report: Option<ReportTarget>) -> Self {
        self.report = report;
        self
    }

    pub fn reports(&self) -> bool {
        self.report.is_some()
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub fn init_command(&self, working_dir: &Path, args: &ToolArgs) -> CommandSpec {
        let mut argv = vec!["init".to_string(), "-input=false".to_string()];
        argv.extend(args.backend_configs.iter().map(|c| format!("-backend-config={c}")));
        argv.extend(args.init_args.iter().cloned());
        CommandSpec::new(&self.binary, argv, working_dir)
    }

    pub fn plan_command(&self, working_dir: &Path, args: &ToolArgs, plan_file: &Path) -> CommandSpec {
        let mut argv = vec![
            "plan".to_string(),
            "-input=false".to_string(),
            "-detailed-exitcode".to_string(),
        ];
        argv.extend(args.var_files.iter().map(|f| format!("-var-file={f}")));
        argv.push(format!("-out={}", plan_file.display()));
        argv.extend(args.plan_args.iter().cloned());
        argv.extend(args.extra_args.iter().cloned());
        CommandSpec::new(&self.binary, argv, working_dir)
    }

    pub fn apply_command(&self, working_dir: &Path, plan_file: &Path) -> CommandSpec {
        let argv = vec![
            "apply".to_string(),
            "-input=false".to_string(),
            "-auto-approve".to_string(),
            plan_file.display().to_string(),
        ];
        CommandSpec::new(&self.binary, argv, working_dir)
    }

    /// Wrap `inner` in the reporting wrapper and the exit-code shim.
    fn wrap(&self, target: &ReportTarget, stage: ToolStage, inner: CommandSpec, exit_file: &Path) -> CommandSpec {
        let mut argv = vec![
            "-owner".to_string(),
            target.owner.clone(),
            "-repo".to_string(),
            target.repo.clone(),
            "-pr".to_string(),
            target.issue_number.to_string(),
            stage.as_str().to_string(),
            "--".to_string(),
            "sh".to_string(),
            "-c".to_string(),
            SHIM_SCRIPT.to_string(),
            SHIM_NAME.to_string(),
            exit_file.display().to_string(),
            inner.program,
        ];
        argv.extend(inner.args);
        let mut spec = CommandSpec::new(&self.wrapper, argv, inner.working_dir);
        spec.env = inner.env;
        spec.with_env("GITHUB_TOKEN", target.token.clone())
    }

    /// Command lines `invoke` would run, for dry runs.
    pub fn describe(
        &self,
        operation: Operation,
        working_dir: &Path,
        args: &ToolArgs,
        plan_file: &Path,
    ) -> Vec<String> {
        let mut stages = Vec::new();
        if matches!(operation, Operation::Plan | Operation::Rollback) {
            stages.push((ToolStage::Plan, self.plan_command(working_dir, args, plan_file)));
        }
        if matches!(operation, Operation::Apply | Operation::Rollback) {
            stages.push((ToolStage::Apply, self.apply_command(working_dir, plan_file)));
        }

        let mut lines = vec![self.init_command(working_dir, args).display()];
        lines.extend(stages.into_iter().map(|(stage, spec)| match &self.report {
            Some(t) => format!(
                "{} -owner {} -repo {} -pr {} {stage} -- {}",
                self.wrapper,
                t.owner,
                t.repo,
                t.issue_number,
                spec.display()
            ),
            None => spec.display(),
        }));
        lines
    }

    /// Run `operation` in `working_dir`.
    ///
    /// Plan writes `plan_file`; Apply consumes it and refuses to run when it
    /// does not exist; Rollback plans into it and applies it in one call.
    /// Init runs first and a failing init ends the call with a
    /// `ToolStage::Init` failure.
    pub async fn invoke(
        &self,
        operation: Operation,
        working_dir: &Path,
        args: &ToolArgs,
        plan_file: &Path,
    ) -> Result<ToolOutcome> {
        let mut hooks = HookSession::disabled();
        self.invoke_with_hooks(operation, working_dir, args, plan_file, &mut hooks)
            .await
    }

    /// `invoke` with lifecycle hooks around each stage.
    ///
    /// A blocking hook failure before or after a stage ends the call with
    /// `DeployError::HookFailed`. Post-plan hooks run only for a plan that
    /// did not fail; post-apply hooks only after a successful apply, and
    /// their failures are logged but cannot undo the apply.
    pub async fn invoke_with_hooks(
        &self,
        operation: Operation,
        working_dir: &Path,
        args: &ToolArgs,
        plan_file: &Path,
        hooks: &mut HookSession,
    ) -> Result<ToolOutcome> {
        if operation == Operation::Apply && !plan_file.exists() {
            return Err(DeployError::InvalidRequest(format!(
                "refusing to apply without a plan file ({})",
                plan_file.display()
            )));
        }

        hooks.run(HookPhase::PreInit).await?;
        let init = self.runner.run(&self.init_command(working_dir, args)).await?;
        if !init.success() {
            warn!(stderr = %init.stderr.trim(), "terraform init failed");
            obs::emit_tool_finished(ToolStage::Init, init.exit_code, ExitClass::Failure, false);
            return Ok(ToolOutcome {
                exit_class: ExitClass::Failure,
                raw_exit_code: init.exit_code,
                report_sent: false,
                stage: ToolStage::Init,
            });
        }
        hooks.run(HookPhase::PostInit).await?;

        match operation {
            Operation::Plan => self.plan(working_dir, args, plan_file, hooks).await,
            Operation::Apply => {
                let apply = self.apply(working_dir, plan_file).await?;
                post_apply(hooks, &apply).await;
                Ok(apply)
            }
            Operation::Rollback => {
                let plan = self.plan(working_dir, args, plan_file, hooks).await?;
                if plan.exit_class.is_failure() {
                    info!("rollback plan failed; skipping apply");
                    return Ok(plan);
                }
                let apply = self.apply(working_dir, plan_file).await?;
                post_apply(hooks, &apply).await;
                Ok(ToolOutcome {
                    report_sent: plan.report_sent && apply.report_sent,
                    ..apply
                })
            }
        }
    }

    async fn plan(
        &self,
        working_dir: &Path,
        args: &ToolArgs,
        plan_file: &Path,
        hooks: &mut HookSession,
    ) -> Result<ToolOutcome> {
        hooks.run(HookPhase::PrePlan).await?;
        let spec = self.plan_command(working_dir, args, plan_file);
        let run = self.run_stage(ToolStage::Plan, spec).await?;
        let outcome = ToolOutcome {
            exit_class: ExitClass::from_plan_exit(run.code),
            raw_exit_code: run.code,
            report_sent: run.report_sent,
            stage: ToolStage::Plan,
        };
        obs::emit_tool_finished(outcome.stage, outcome.raw_exit_code, outcome.exit_class, outcome.report_sent);
        if !outcome.exit_class.is_failure() {
            hooks.record_plan(plan_file, outcome.changes_pending());
            hooks.run(HookPhase::PostPlan).await?;
        }
        Ok(outcome)
    }

    async fn apply(&self, working_dir: &Path, plan_file: &Path) -> Result<ToolOutcome> {
        let spec = self.apply_command(working_dir, plan_file);
        let run = self.run_stage(ToolStage::Apply, spec).await?;
        let outcome = ToolOutcome {
            exit_class: ExitClass::from_apply_exit(run.code),
            raw_exit_code: run.code,
            report_sent: run.report_sent,
            stage: ToolStage::Apply,
        };
        obs::emit_tool_finished(outcome.stage, outcome.raw_exit_code, outcome.exit_class, outcome.report_sent);
        Ok(outcome)
    }

    async fn run_stage(&self, stage: ToolStage, inner: CommandSpec) -> Result<StageRun> {
        let target = match &self.report {
            Some(target) if !self.wrapper_missing.load(Ordering::Relaxed) => target,
            _ => return self.run_unwrapped(&inner).await,
        };

        let scratch = tempfile::Builder::new().prefix("tfbd-exit-").tempdir()?;
        let exit_file = scratch.path().join("code");
        let spec = self.wrap(target, stage, inner.clone(), &exit_file);
        let output = match self.runner.run(&spec).await {
            Ok(output) => output,
            Err(DeployError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    wrapper = %self.wrapper,
                    stage = %stage,
                    "report wrapper not installed; running terraform without reporting"
                );
                self.wrapper_missing.store(true, Ordering::Relaxed);
                return self.run_unwrapped(&inner).await;
            }
            Err(err) => return Err(err),
        };

        match read_exit_file(&exit_file).await {
            Some(code) => Ok(StageRun {
                code,
                report_sent: output.exit_code == code,
            }),
            None => {
                warn!(
                    stage = %stage,
                    wrapper_exit = output.exit_code,
                    "inner exit code not recorded; using the wrapper's exit code"
                );
                Ok(StageRun {
                    code: output.exit_code,
                    report_sent: false,
                })
            }
        }
    }

    async fn run_unwrapped(&self, inner: &CommandSpec) -> Result<StageRun> {
        let output = self.runner.run(inner).await?;
        Ok(StageRun {
            code: output.exit_code,
            report_sent: false,
        })
    }
}

async fn post_apply(hooks: &mut HookSession, apply: &ToolOutcome) {
    if apply.exit_class.is_failure() {
        return;
    }
    if let Err(err) = hooks.run(HookPhase::PostApply).await {
        warn!(error = %err, "post-apply hook failed after the apply completed");
    }
}

async fn read_exit_file(path: &Path) -> Option<i32> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    raw.trim().parse().ok()
}
