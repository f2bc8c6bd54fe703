//! Lifecycle hooks.
//!
//! User commands and built-in checks (`terraform validate`, `tflint`,
//! `trivy`) run at fixed points around the terraform stages:
//!
//! `pre-init -> init -> post-init -> pre-plan -> plan -> post-plan -> apply -> post-apply`
//!
//! Every hook sees the request as `TF_BD_*` environment variables. A failing
//! hook with `fail-on-error` stops the phase and the operation; post-apply
//! hooks run after the change is made and are reported only.
//!
//! ```yaml
//! hooks:
//!   pre-plan:
//!     - name: policy
//!       run: ./scripts/check-policy.sh
//!       condition: apply-only
//!       timeout: 120
//!   builtin:
//!     validate: {}
//!     trivy: { severity: CRITICAL }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ResolvedEnvironment;
use crate::domain::{DeployError, DeploymentRequest, Operation, Result};
use crate::runner::{CommandOutput, CommandSpec, ProcessRunner};

/// Exit code recorded for a hook killed by its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookPhase {
    PreInit,
    PostInit,
    PrePlan,
    PostPlan,
    PostApply,
}

impl HookPhase {
    pub const ALL: [HookPhase; 5] = [
        HookPhase::PreInit,
        HookPhase::PostInit,
        HookPhase::PrePlan,
        HookPhase::PostPlan,
        HookPhase::PostApply,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::PreInit => "pre-init",
            HookPhase::PostInit => "post-init",
            HookPhase::PrePlan => "pre-plan",
            HookPhase::PostPlan => "post-plan",
            HookPhase::PostApply => "post-apply",
        }
    }
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which operations a hook runs for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookCondition {
    #[default]
    Always,
    PlanOnly,
    /// Apply and rollback: both change infrastructure.
    ApplyOnly,
    RollbackOnly,
}

impl HookCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            HookCondition::Always => "always",
            HookCondition::PlanOnly => "plan-only",
            HookCondition::ApplyOnly => "apply-only",
            HookCondition::RollbackOnly => "rollback-only",
        }
    }

    pub fn matches(self, operation: Operation) -> bool {
        match self {
            HookCondition::Always => true,
            HookCondition::PlanOnly => operation == Operation::Plan,
            HookCondition::ApplyOnly => matches!(operation, Operation::Apply | Operation::Rollback),
            HookCondition::RollbackOnly => operation == Operation::Rollback,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_hook_timeout() -> u64 {
    DEFAULT_HOOK_TIMEOUT_SECS
}

/// One user-defined hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HookConfig {
    pub name: String,
    /// Shell command, run with `sh -c`.
    pub run: String,
    #[serde(default)]
    pub condition: HookCondition,
    /// Seconds.
    #[serde(default = "default_hook_timeout")]
    pub timeout: u64,
    #[serde(default = "default_true")]
    pub fail_on_error: bool,
    /// Relative to the process directory. Defaults to the environment's working directory.
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ValidateHookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub fail_on_error: bool,
}

fn default_false() -> bool {
    false
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TflintHookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_false")]
    pub fail_on_error: bool,
    #[serde(default)]
    pub config_file: Option<String>,
}

fn default_trivy_severity() -> String {
    "HIGH,CRITICAL".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TrivyHookConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub fail_on_error: bool,
    #[serde(default = "default_trivy_severity")]
    pub severity: String,
}

/// Built-in checks. Listing one enables it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuiltinHooksConfig {
    #[serde(default)]
    pub validate: Option<ValidateHookConfig>,
    #[serde(default)]
    pub tflint: Option<TflintHookConfig>,
    #[serde(default)]
    pub trivy: Option<TrivyHookConfig>,
}

/// `hooks:` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HooksConfig {
    #[serde(default)]
    pub pre_init: Vec<HookConfig>,
    #[serde(default)]
    pub post_init: Vec<HookConfig>,
    #[serde(default)]
    pub pre_plan: Vec<HookConfig>,
    #[serde(default)]
    pub post_plan: Vec<HookConfig>,
    #[serde(default)]
    pub post_apply: Vec<HookConfig>,
    #[serde(default)]
    pub builtin: BuiltinHooksConfig,
}

impl HooksConfig {
    pub fn user_hooks(&self, phase: HookPhase) -> &[HookConfig] {
        match phase {
            HookPhase::PreInit => &self.pre_init,
            HookPhase::PostInit => &self.post_init,
            HookPhase::PrePlan => &self.pre_plan,
            HookPhase::PostPlan => &self.post_plan,
            HookPhase::PostApply => &self.post_apply,
        }
    }

    /// Enabled built-in checks, each with its `fail-on-error` setting.
    pub fn builtins(&self) -> Vec<(BuiltinHook, bool)> {
        let mut out = Vec::new();
        if let Some(trivy) = self.builtin.trivy.as_ref().filter(|c| c.enabled) {
            out.push((
                BuiltinHook::Trivy {
                    severity: trivy.severity.clone(),
                },
                trivy.fail_on_error,
            ));
        }
        if let Some(validate) = self.builtin.validate.as_ref().filter(|c| c.enabled) {
            out.push((BuiltinHook::Validate, validate.fail_on_error));
        }
        if let Some(tflint) = self.builtin.tflint.as_ref().filter(|c| c.enabled) {
            out.push((
                BuiltinHook::Tflint {
                    config_file: tflint.config_file.clone(),
                },
                tflint.fail_on_error,
            ));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        HookPhase::ALL.iter().all(|p| self.user_hooks(*p).is_empty()) && self.builtins().is_empty()
    }

    /// Hook count per phase, built-ins included, for summaries.
    pub fn counts(&self) -> Vec<(HookPhase, usize)> {
        let builtins = self.builtins();
        HookPhase::ALL
            .iter()
            .map(|phase| {
                let own = builtins.iter().filter(|(b, _)| b.phase() == *phase).count();
                (*phase, own + self.user_hooks(*phase).len())
            })
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}

/// What a hook can see about the request, exported as `TF_BD_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub phase: HookPhase,
    pub environment: String,
    pub operation: Operation,
    pub sha: String,
    pub target_ref: String,
    pub actor: String,
    pub pr_number: Option<u64>,
    pub params: String,
    pub working_dir: PathBuf,
    pub is_production: bool,
    /// Post-plan onwards.
    pub plan_file: Option<PathBuf>,
    pub has_changes: Option<bool>,
}

impl HookContext {
    pub fn for_request(
        request: &DeploymentRequest,
        env: &ResolvedEnvironment,
        working_dir: &Path,
    ) -> Self {
        Self {
            phase: HookPhase::PreInit,
            environment: request.environment.clone(),
            operation: request.operation,
            sha: request.commit_sha.to_string(),
            target_ref: request.target_ref.clone(),
            actor: request.actor.clone(),
            pr_number: request.issue_number,
            params: shell_words::join(&request.extra_args),
            working_dir: working_dir.to_path_buf(),
            is_production: env.is_production,
            plan_file: None,
            has_changes: None,
        }
    }

    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("TF_BD_PHASE", self.phase.as_str().to_string()),
            ("TF_BD_ENVIRONMENT", self.environment.clone()),
            ("TF_BD_OPERATION", self.operation.as_str().to_string()),
            (
                "TF_BD_IS_ROLLBACK",
                (self.operation == Operation::Rollback).to_string(),
            ),
            ("TF_BD_SHA", self.sha.clone()),
            ("TF_BD_REF", self.target_ref.clone()),
            ("TF_BD_ACTOR", self.actor.clone()),
            (
                "TF_BD_PR_NUMBER",
                self.pr_number.map(|n| n.to_string()).unwrap_or_default(),
            ),
            ("TF_BD_PARAMS", self.params.clone()),
            ("TF_BD_WORKING_DIR", self.working_dir.display().to_string()),
            ("TF_BD_IS_PRODUCTION", self.is_production.to_string()),
        ];
        if let Some(plan_file) = &self.plan_file {
            env.push(("TF_BD_PLAN_FILE", plan_file.display().to_string()));
        }
        if let Some(has_changes) = self.has_changes {
            env.push(("TF_BD_HAS_CHANGES", has_changes.to_string()));
        }
        env.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

/// Result of one hook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookResult {
    pub name: String,
    pub phase: HookPhase,
    pub exit_code: i32,
    #[serde(skip)]
    pub stdout: String,
    #[serde(skip)]
    pub stderr: String,
    pub timed_out: bool,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    /// `fail-on-error` of the hook that produced this result.
    pub blocking: bool,
    /// One-line summary from a built-in check.
    pub summary: Option<String>,
    /// Markdown section from a built-in check.
    #[serde(skip)]
    pub markdown: Option<String>,
}

impl HookResult {
    fn new(name: &str, phase: HookPhase, blocking: bool) -> Self {
        Self {
            name: name.to_string(),
            phase,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            skipped: false,
            skip_reason: None,
            blocking,
            summary: None,
            markdown: None,
        }
    }

    fn skipped(name: &str, phase: HookPhase, reason: String) -> Self {
        Self {
            skipped: true,
            skip_reason: Some(reason),
            ..Self::new(name, phase, false)
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    pub fn failed(&self) -> bool {
        !self.success() && !self.skipped
    }
}

/// A failed hook that stops the operation.
pub fn blocking_failure(results: &[HookResult]) -> Option<&HookResult> {
    results.iter().find(|r| r.failed() && r.blocking)
}

/// Built-in checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinHook {
    /// `terraform validate -json`.
    Validate,
    Tflint { config_file: Option<String> },
    Trivy { severity: String },
}

/// Interpreted output of a built-in check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinVerdict {
    pub success: bool,
    pub summary: String,
    pub markdown: String,
}

impl BuiltinHook {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinHook::Validate => "Terraform Validate",
            BuiltinHook::Tflint { .. } => "TFLint",
            BuiltinHook::Trivy { .. } => "Trivy Security Scan",
        }
    }

    pub fn phase(&self) -> HookPhase {
        match self {
            BuiltinHook::Trivy { .. } => HookPhase::PreInit,
            BuiltinHook::Validate | BuiltinHook::Tflint { .. } => HookPhase::PrePlan,
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            BuiltinHook::Trivy { .. } => Duration::from_secs(600),
            _ => Duration::from_secs(300),
        }
    }

    pub fn command(&self, terraform: &str, working_dir: &Path) -> CommandSpec {
        let (program, args): (&str, Vec<String>) = match self {
            BuiltinHook::Validate => (terraform, vec!["validate".into(), "-json".into()]),
            BuiltinHook::Tflint { config_file } => {
                let mut args = vec!["--format".to_string(), "json".to_string()];
                if let Some(file) = config_file {
                    args.push("--config".to_string());
                    args.push(file.clone());
                }
                ("tflint", args)
            }
            BuiltinHook::Trivy { severity } => (
                "trivy",
                vec![
                    "fs".into(),
                    "--scanners".into(),
                    "vuln,secret,misconfig".into(),
                    "--severity".into(),
                    severity.clone(),
                    "--format".into(),
                    "json".into(),
                    ".".into(),
                ],
            ),
        };
        CommandSpec::new(program, args, working_dir)
    }

    pub fn interpret(&self, output: &CommandOutput) -> BuiltinVerdict {
        let json: Option<Value> = serde_json::from_str(&output.stdout).ok();
        match self {
            BuiltinHook::Validate => interpret_validate(output, json.as_ref()),
            BuiltinHook::Tflint { .. } => interpret_tflint(output, json.as_ref()),
            BuiltinHook::Trivy { .. } => interpret_trivy(output, json.as_ref()),
        }
    }
}

fn count(value: Option<&Value>) -> u64 {
    value.and_then(Value::as_u64).unwrap_or(0)
}

fn details(body: &str) -> String {
    format!("<details>\n<summary>Details</summary>\n\n```\n{}\n```\n\n</details>", body.trim())
}

fn interpret_validate(output: &CommandOutput, json: Option<&Value>) -> BuiltinVerdict {
    let (valid, errors, warnings) = match json {
        Some(v) => (
            v.get("valid").and_then(Value::as_bool).unwrap_or(false),
            count(v.get("error_count")),
            count(v.get("warning_count")),
        ),
        None => (output.success(), u64::from(!output.success()), 0),
    };
    if valid {
        return BuiltinVerdict {
            success: true,
            summary: "Terraform configuration is valid".to_string(),
            markdown: "### Terraform Validate ✅\n\nConfiguration is valid.".to_string(),
        };
    }
    let raw = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    BuiltinVerdict {
        success: false,
        summary: format!("terraform validate failed: {errors} errors, {warnings} warnings"),
        markdown: format!(
            "### Terraform Validate ❌\n\n| Severity | Count |\n|----------|-------|\n| Errors | {errors} |\n| Warnings | {warnings} |\n\n{}",
            details(raw)
        ),
    }
}

fn interpret_tflint(output: &CommandOutput, json: Option<&Value>) -> BuiltinVerdict {
    let issues: Vec<&Value> = json
        .and_then(|v| v.get("issues"))
        .and_then(Value::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_default();
    let severity = |level: &str| {
        issues
            .iter()
            .filter(|i| i.pointer("/rule/severity").and_then(Value::as_str) == Some(level))
            .count()
    };
    if output.success() {
        return BuiltinVerdict {
            success: true,
            summary: "no linting issues".to_string(),
            markdown: "### TFLint ✅\n\nNo issues found.".to_string(),
        };
    }
    BuiltinVerdict {
        success: false,
        summary: format!("found {} linting issues", issues.len()),
        markdown: format!(
            "### TFLint ⚠️\n\n| Severity | Count |\n|----------|-------|\n| Errors | {} |\n| Warnings | {} |\n\n{}",
            severity("error"),
            severity("warning"),
            details(&output.stdout)
        ),
    }
}

fn interpret_trivy(output: &CommandOutput, json: Option<&Value>) -> BuiltinVerdict {
    let results: Vec<&Value> = json
        .and_then(|v| v.get("Results"))
        .and_then(Value::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_default();
    let total = |key: &str| -> usize {
        results
            .iter()
            .filter_map(|r| r.get(key).and_then(Value::as_array))
            .map(Vec::len)
            .sum()
    };
    let (vulns, secrets, misconfigs) = (
        total("Vulnerabilities"),
        total("Secrets"),
        total("Misconfigurations"),
    );
    if output.success() {
        return BuiltinVerdict {
            success: true,
            summary: "no security issues found".to_string(),
            markdown: "### Trivy Security Scan ✅\n\nNo vulnerabilities, secrets, or misconfigurations detected.".to_string(),
        };
    }
    BuiltinVerdict {
        success: false,
        summary: format!("found {} security issues", vulns + secrets + misconfigs),
        markdown: format!(
            "### Trivy Security Scan ❌\n\n| Type | Count |\n|------|-------|\n| Vulnerabilities | {vulns} |\n| Secrets | {secrets} |\n| Misconfigurations | {misconfigs} |\n\n{}",
            details(&output.stderr)
        ),
    }
}

/// Runs the hooks of one phase.
pub struct HookRunner {
    process: Arc<dyn ProcessRunner>,
    config: HooksConfig,
    terraform: String,
}

impl HookRunner {
    pub fn new(process: Arc<dyn ProcessRunner>, config: HooksConfig) -> Self {
        Self {
            process,
            config,
            terraform: "terraform".to_string(),
        }
    }

    /// Executable used by the validate check.
    pub fn with_terraform(mut self, binary: impl Into<String>) -> Self {
        self.terraform = binary.into();
        self
    }

    pub fn config(&self) -> &HooksConfig {
        &self.config
    }

    /// Built-in checks first, then user hooks in file order. Stops at the
    /// first blocking failure.
    pub async fn run_phase(&self, context: &HookContext) -> Vec<HookResult> {
        let phase = context.phase;
        let builtins: Vec<_> = self
            .config
            .builtins()
            .into_iter()
            .filter(|(b, _)| b.phase() == phase)
            .collect();
        let hooks = self.config.user_hooks(phase);
        if builtins.is_empty() && hooks.is_empty() {
            return Vec::new();
        }
        info!(phase = %phase, count = builtins.len() + hooks.len(), "running hooks");

        let mut results = Vec::new();
        for (builtin, fail_on_error) in &builtins {
            let result = self.run_builtin(builtin, *fail_on_error, context).await;
            let stop = log_result(&result);
            results.push(result);
            if stop {
                return results;
            }
        }
        for hook in hooks {
            let result = if hook.condition.matches(context.operation) {
                self.run_user(hook, context).await
            } else {
                HookResult::skipped(
                    &hook.name,
                    phase,
                    format!(
                        "condition '{}' not met for operation '{}'",
                        hook.condition.as_str(),
                        context.operation
                    ),
                )
            };
            let stop = log_result(&result);
            results.push(result);
            if stop {
                break;
            }
        }
        results
    }

    async fn run_user(&self, hook: &HookConfig, context: &HookContext) -> HookResult {
        let dir = hook
            .working_directory
            .as_ref()
            .map_or_else(|| context.working_dir.clone(), PathBuf::from);
        let mut spec = CommandSpec::new("sh", vec!["-c".to_string(), hook.run.clone()], dir);
        spec.env = context.to_env();
        spec.env
            .extend(hook.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut result = HookResult::new(&hook.name, context.phase, hook.fail_on_error);
        let limit = Duration::from_secs(hook.timeout);
        match tokio::time::timeout(limit, self.process.run(&spec)).await {
            Ok(Ok(output)) => {
                result.exit_code = output.exit_code;
                result.stdout = output.stdout;
                result.stderr = output.stderr;
            }
            Ok(Err(err)) => {
                result.exit_code = 1;
                result.stderr = err.to_string();
            }
            Err(_) => {
                result.exit_code = TIMEOUT_EXIT_CODE;
                result.timed_out = true;
                result.stderr = format!("hook timed out after {} seconds", hook.timeout);
            }
        }
        result
    }

    async fn run_builtin(
        &self,
        builtin: &BuiltinHook,
        fail_on_error: bool,
        context: &HookContext,
    ) -> HookResult {
        let spec = builtin.command(&self.terraform, &context.working_dir);
        let mut result = HookResult::new(builtin.name(), context.phase, fail_on_error);
        match tokio::time::timeout(builtin.timeout(), self.process.run(&spec)).await {
            Ok(Ok(output)) => {
                let verdict = builtin.interpret(&output);
                result.exit_code = if verdict.success {
                    0
                } else if output.exit_code == 0 {
                    1
                } else {
                    output.exit_code
                };
                result.summary = Some(verdict.summary);
                result.markdown = Some(verdict.markdown);
                result.stdout = output.stdout;
                result.stderr = output.stderr;
            }
            Ok(Err(DeployError::Io(err))) if err.kind() == std::io::ErrorKind::NotFound => {
                return HookResult::skipped(
                    builtin.name(),
                    context.phase,
                    format!("{} is not installed", spec.program),
                );
            }
            Ok(Err(err)) => {
                result.exit_code = 1;
                result.stderr = err.to_string();
                result.summary = Some(format!("{} error: {err}", builtin.name()));
            }
            Err(_) => {
                result.exit_code = TIMEOUT_EXIT_CODE;
                result.timed_out = true;
                result.summary = Some(format!(
                    "{} timed out after {} seconds",
                    builtin.name(),
                    builtin.timeout().as_secs()
                ));
            }
        }
        result
    }
}

/// Log one result; true when it stops the phase.
fn log_result(result: &HookResult) -> bool {
    if result.skipped {
        info!(hook = %result.name, reason = result.skip_reason.as_deref().unwrap_or(""), "hook skipped");
        false
    } else if !result.failed() {
        info!(hook = %result.name, phase = %result.phase, "hook passed");
        false
    } else if result.blocking {
        warn!(hook = %result.name, phase = %result.phase, exit_code = result.exit_code, stderr = %result.stderr.trim(), "hook failed (blocking)");
        true
    } else {
        warn!(hook = %result.name, phase = %result.phase, exit_code = result.exit_code, "hook failed (non-blocking)");
        false
    }
}

/// Hooks bound to one request. Collects every result across phases.
#[derive(Default)]
pub struct HookSession {
    bound: Option<(Arc<HookRunner>, HookContext)>,
    results: Vec<HookResult>,
}

impl HookSession {
    /// No hooks run.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(runner: Arc<HookRunner>, context: HookContext) -> Self {
        Self {
            bound: Some((runner, context)),
            results: Vec::new(),
        }
    }

    /// Expose the plan to post-plan and later hooks.
    pub fn record_plan(&mut self, plan_file: &Path, has_changes: bool) {
        if let Some((_, context)) = self.bound.as_mut() {
            context.plan_file = Some(plan_file.to_path_buf());
            context.has_changes = Some(has_changes);
        }
    }

    /// Run `phase`. A blocking failure becomes `DeployError::HookFailed`.
    pub async fn run(&mut self, phase: HookPhase) -> Result<()> {
        let Some((runner, context)) = self.bound.as_mut() else {
            return Ok(());
        };
        context.phase = phase;
        let results = runner.run_phase(context).await;
        let failure = blocking_failure(&results).map(|r| DeployError::HookFailed {
            phase: phase.to_string(),
            name: r.name.clone(),
            code: r.exit_code,
        });
        self.results.extend(results);
        failure.map_or(Ok(()), Err)
    }

    pub fn results(&self) -> &[HookResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<HookResult> {
        self.results
    }
}
