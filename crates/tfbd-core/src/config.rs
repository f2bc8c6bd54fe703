//! `.tf-branch-deploy.yml` loading, validation and per-environment resolution.
//!
//! ```yaml
//! default-environment: dev
//! production-environments: prod
//! defaults:
//!   var-files: common.tfvars
//! environments:
//!   dev:
//!     working-directory: terraform/dev
//!   prod:
//!     var-files: { inherit: false, paths: [prod.tfvars] }
//! hotfix:
//!   detection: { branch-pattern: "hotfix/*" }
//! hooks:
//!   builtin: { validate: {} }
//! ```
//!
//! [`json_schema`] describes the same document for editors and CI linters.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tfbd_state::glob::TagGlob;
use tracing::debug;

use crate::domain::{DeployError, Result};
use crate::hooks::HooksConfig;
use crate::invoker::ToolArgs;

pub const DEFAULT_CONFIG_FILE: &str = ".tf-branch-deploy.yml";

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(OneOrMany::deserialize(deserializer)?.into())
}

fn default_inherit() -> bool {
    true
}

/// `init-args`, `plan-args`, `apply-args`. A bare string or list means `args`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "ArgsRepr")]
pub struct ArgsConfig {
    pub inherit: bool,
    pub args: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ArgsBlock {
    #[serde(default = "default_inherit")]
    inherit: bool,
    #[serde(default)]
    args: Option<OneOrMany>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArgsRepr {
    Bare(OneOrMany),
    Block(ArgsBlock),
}

impl From<ArgsRepr> for ArgsConfig {
    fn from(repr: ArgsRepr) -> Self {
        match repr {
            ArgsRepr::Bare(args) => ArgsConfig {
                inherit: true,
                args: args.into(),
            },
            ArgsRepr::Block(block) => ArgsConfig {
                inherit: block.inherit,
                args: block.args.map(Into::into).unwrap_or_default(),
            },
        }
    }
}

/// `var-files`, `backend-configs`. A bare string or list means `paths`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "PathsRepr")]
pub struct PathsConfig {
    pub inherit: bool,
    pub paths: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PathsBlock {
    #[serde(default = "default_inherit")]
    inherit: bool,
    #[serde(default)]
    paths: Option<OneOrMany>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PathsRepr {
    Bare(OneOrMany),
    Block(PathsBlock),
}

impl From<PathsRepr> for PathsConfig {
    fn from(repr: PathsRepr) -> Self {
        match repr {
            PathsRepr::Bare(paths) => PathsConfig {
                inherit: true,
                paths: paths.into(),
            },
            PathsRepr::Block(block) => PathsConfig {
                inherit: block.inherit,
                paths: block.paths.map(Into::into).unwrap_or_default(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DefaultsConfig {
    pub var_files: Option<PathsConfig>,
    pub backend_configs: Option<PathsConfig>,
    pub init_args: Option<ArgsConfig>,
    pub plan_args: Option<ArgsConfig>,
    pub apply_args: Option<ArgsConfig>,
}

fn default_working_directory() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct EnvironmentConfig {
    #[serde(default = "default_working_directory")]
    pub working_directory: String,
    pub var_files: Option<PathsConfig>,
    pub backend_configs: Option<PathsConfig>,
    pub init_args: Option<ArgsConfig>,
    pub plan_args: Option<ArgsConfig>,
    pub apply_args: Option<ArgsConfig>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            working_directory: default_working_directory(),
            var_files: None,
            backend_configs: None,
            init_args: None,
            plan_args: None,
            apply_args: None,
        }
    }
}

fn default_stable_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}

fn default_hotfix_pattern() -> String {
    "hotfix/*".to_string()
}

fn default_confirmation_command() -> String {
    ".confirm-hotfix".to_string()
}

/// How a hotfix pull request is recognised.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HotfixDetectionConfig {
    /// Glob over the head branch. `*` stays within one `/` segment.
    #[serde(default = "default_hotfix_pattern", alias = "branch_pattern")]
    pub branch_pattern: String,
    #[serde(default = "default_true", alias = "targets_stable_branch")]
    pub targets_stable_branch: bool,
}

impl Default for HotfixDetectionConfig {
    fn default() -> Self {
        Self {
            branch_pattern: default_hotfix_pattern(),
            targets_stable_branch: true,
        }
    }
}

/// Gates the dispatcher enforces before a hotfix deploy. Reported, not enforced here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HotfixSafetyConfig {
    #[serde(default = "default_true", alias = "require-confirmation")]
    pub require_confirmation: bool,
    #[serde(default = "default_confirmation_command", alias = "confirmation-command")]
    pub confirmation_command: String,
    #[serde(default = "default_true", alias = "require-approval")]
    pub require_approval: bool,
    #[serde(default = "default_true", alias = "require-ci-pass")]
    pub require_ci_pass: bool,
}

impl Default for HotfixSafetyConfig {
    fn default() -> Self {
        Self {
            require_confirmation: true,
            confirmation_command: default_confirmation_command(),
            require_approval: true,
            require_ci_pass: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HotfixConfig {
    #[serde(default)]
    pub detection: HotfixDetectionConfig,
    #[serde(default)]
    pub safety: HotfixSafetyConfig,
}

/// Root of `.tf-branch-deploy.yml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DeployConfig {
    pub default_environment: String,
    #[serde(deserialize_with = "one_or_many")]
    pub production_environments: Vec<String>,
    pub environments: BTreeMap<String, EnvironmentConfig>,
    #[serde(default)]
    pub defaults: Option<DefaultsConfig>,
    #[serde(default = "default_stable_branch")]
    pub stable_branch: String,
    #[serde(default)]
    pub hotfix: Option<HotfixConfig>,
    #[serde(default)]
    pub hooks: HooksConfig,
}

/// Everything the tool needs for one environment, inheritance applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    pub name: String,
    pub working_directory: PathBuf,
    pub var_files: Vec<String>,
    pub backend_configs: Vec<String>,
    pub init_args: Vec<String>,
    pub plan_args: Vec<String>,
    pub apply_args: Vec<String>,
    pub is_production: bool,
    pub hooks: HooksConfig,
}

impl ResolvedEnvironment {
    pub fn tool_args(&self, extra_args: &[String]) -> ToolArgs {
        ToolArgs {
            var_files: self.var_files.clone(),
            backend_configs: self.backend_configs.clone(),
            init_args: self.init_args.clone(),
            plan_args: self.plan_args.clone(),
            extra_args: extra_args.to_vec(),
        }
    }
}

/// Maps an environment name to its resolved settings.
pub trait EnvironmentResolver: Send + Sync {
    fn resolve(&self, environment: &str) -> Result<ResolvedEnvironment>;
}

fn merge_paths(default: Option<&PathsConfig>, own: Option<&PathsConfig>) -> Vec<String> {
    let inherit = own.map_or(true, |c| c.inherit);
    let mut out = Vec::new();
    if inherit {
        if let Some(d) = default {
            out.extend(d.paths.iter().cloned());
        }
    }
    if let Some(o) = own {
        out.extend(o.paths.iter().cloned());
    }
    out
}

fn merge_args(default: Option<&ArgsConfig>, own: Option<&ArgsConfig>) -> Vec<String> {
    let inherit = own.map_or(true, |c| c.inherit);
    let mut out = Vec::new();
    if inherit {
        if let Some(d) = default {
            out.extend(d.args.iter().cloned());
        }
    }
    if let Some(o) = own {
        out.extend(o.args.iter().cloned());
    }
    out
}

impl DeployConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DeployError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Err(DeployError::Config(format!(
                "configuration file is empty: {}",
                path.display()
            )));
        }
        debug!(path = %path.display(), "loading configuration");
        Self::from_yaml_str(&raw)
            .map_err(|e| DeployError::Config(format!("{}: {}", path.display(), config_message(e))))
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: DeployConfig =
            serde_yaml::from_str(raw).map_err(|e| DeployError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Every referenced environment must be defined.
    pub fn validate(&self) -> Result<()> {
        if self.stable_branch.trim().is_empty() {
            return Err(DeployError::Config("stable-branch must not be empty".to_string()));
        }
        if !self.environments.contains_key(&self.default_environment) {
            return Err(DeployError::Config(format!(
                "default-environment '{}' is not defined in environments. Available environments: {}",
                self.default_environment,
                self.available()
            )));
        }
        for prod in &self.production_environments {
            if !self.environments.contains_key(prod) {
                return Err(DeployError::Config(format!(
                    "production-environment '{prod}' is not defined in environments. Available environments: {}",
                    self.available()
                )));
            }
        }
        if let Some(hotfix) = &self.hotfix {
            TagGlob::new(&hotfix.detection.branch_pattern).map_err(|_| {
                DeployError::Config(format!(
                    "hotfix branch-pattern '{}' is not a valid glob",
                    hotfix.detection.branch_pattern
                ))
            })?;
        }
        for phase in crate::hooks::HookPhase::ALL {
            for hook in self.hooks.user_hooks(phase) {
                if hook.name.trim().is_empty() || hook.run.trim().is_empty() {
                    return Err(DeployError::Config(format!(
                        "{phase} hooks need a name and a run command"
                    )));
                }
                if hook.timeout == 0 {
                    return Err(DeployError::Config(format!(
                        "{phase} hook '{}' has a zero timeout",
                        hook.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether `head_ref` is a hotfix branch. Without hotfix settings nothing is.
    ///
    /// When detection requires the stable branch as base and `base_ref` is
    /// known, it must equal `stable-branch`. An unknown base is not checked.
    pub fn is_hotfix(&self, head_ref: &str, base_ref: Option<&str>) -> bool {
        let Some(hotfix) = &self.hotfix else {
            return false;
        };
        let matches = TagGlob::new(&hotfix.detection.branch_pattern)
            .map(|glob| glob.is_match(head_ref))
            .unwrap_or(false);
        let base_ok = !hotfix.detection.targets_stable_branch
            || base_ref.map_or(true, |base| base == self.stable_branch);
        matches && base_ok
    }

    /// Sorted environment names.
    pub fn environment_names(&self) -> Vec<&str> {
        self.environments.keys().map(String::as_str).collect()
    }

    pub fn is_production(&self, environment: &str) -> bool {
        self.production_environments.iter().any(|p| p == environment)
    }

    fn available(&self) -> String {
        self.environment_names().join(", ")
    }
}

fn config_message(err: DeployError) -> String {
    match err {
        DeployError::Config(msg) => msg,
        other => other.to_string(),
    }
}

impl EnvironmentResolver for DeployConfig {
    fn resolve(&self, environment: &str) -> Result<ResolvedEnvironment> {
        let env = self.environments.get(environment).ok_or_else(|| {
            DeployError::Config(format!(
                "environment '{environment}' not found. Available environments: {}",
                self.available()
            ))
        })?;
        let defaults = self.defaults.clone().unwrap_or_default();

        Ok(ResolvedEnvironment {
            name: environment.to_string(),
            working_directory: PathBuf::from(&env.working_directory),
            var_files: merge_paths(defaults.var_files.as_ref(), env.var_files.as_ref()),
            backend_configs: merge_paths(
                defaults.backend_configs.as_ref(),
                env.backend_configs.as_ref(),
            ),
            init_args: merge_args(defaults.init_args.as_ref(), env.init_args.as_ref()),
            plan_args: merge_args(defaults.plan_args.as_ref(), env.plan_args.as_ref()),
            apply_args: merge_args(defaults.apply_args.as_ref(), env.apply_args.as_ref()),
            is_production: self.is_production(environment),
            hooks: self.hooks.clone(),
        })
    }
}

fn paths_schema() -> Value {
    json!({
        "oneOf": [
            { "type": "string" },
            { "type": "array", "items": { "type": "string" } },
            {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "inherit": { "type": "boolean", "default": true },
                    "paths": {
                        "oneOf": [
                            { "type": "string" },
                            { "type": "array", "items": { "type": "string" } }
                        ]
                    }
                }
            }
        ]
    })
}

fn args_schema() -> Value {
    json!({
        "oneOf": [
            { "type": "string" },
            { "type": "array", "items": { "type": "string" } },
            {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "inherit": { "type": "boolean", "default": true },
                    "args": {
                        "oneOf": [
                            { "type": "string" },
                            { "type": "array", "items": { "type": "string" } }
                        ]
                    }
                }
            }
        ]
    })
}

fn terraform_settings() -> serde_json::Map<String, Value> {
    let mut props = serde_json::Map::new();
    props.insert("var-files".into(), paths_schema());
    props.insert("backend-configs".into(), paths_schema());
    props.insert("init-args".into(), args_schema());
    props.insert("plan-args".into(), args_schema());
    props.insert("apply-args".into(), args_schema());
    props
}

fn hook_list_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "additionalProperties": false,
            "required": ["name", "run"],
            "properties": {
                "name": { "type": "string" },
                "run": { "type": "string" },
                "condition": {
                    "enum": ["always", "plan-only", "apply-only", "rollback-only"],
                    "default": "always"
                },
                "timeout": { "type": "integer", "minimum": 1, "default": 300 },
                "fail-on-error": { "type": "boolean", "default": true },
                "working-directory": { "type": "string" },
                "env": { "type": "object", "additionalProperties": { "type": "string" } }
            }
        }
    })
}

fn builtin_schema(extra: Value, fail_on_error: bool) -> Value {
    let mut props = json!({
        "enabled": { "type": "boolean", "default": true },
        "fail-on-error": { "type": "boolean", "default": fail_on_error }
    });
    if let (Some(props), Value::Object(extra)) = (props.as_object_mut(), extra) {
        props.extend(extra);
    }
    json!({ "type": "object", "additionalProperties": false, "properties": props })
}

/// JSON Schema (draft 2020-12) of `.tf-branch-deploy.yml`.
pub fn json_schema() -> Value {
    let mut environment = terraform_settings();
    environment.insert(
        "working-directory".into(),
        json!({ "type": "string", "default": "." }),
    );

    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "tf-branch-deploy configuration",
        "type": "object",
        "additionalProperties": false,
        "required": ["default-environment", "production-environments", "environments"],
        "properties": {
            "default-environment": { "type": "string" },
            "production-environments": {
                "oneOf": [
                    { "type": "string" },
                    { "type": "array", "items": { "type": "string" } }
                ]
            },
            "stable-branch": { "type": "string", "default": "main" },
            "defaults": {
                "type": "object",
                "additionalProperties": false,
                "properties": terraform_settings()
            },
            "environments": {
                "type": "object",
                "additionalProperties": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": environment
                }
            },
            "hotfix": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "detection": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "branch-pattern": { "type": "string", "default": "hotfix/*" },
                            "targets-stable-branch": { "type": "boolean", "default": true }
                        }
                    },
                    "safety": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "require_confirmation": { "type": "boolean", "default": true },
                            "confirmation_command": { "type": "string", "default": ".confirm-hotfix" },
                            "require_approval": { "type": "boolean", "default": true },
                            "require_ci_pass": { "type": "boolean", "default": true }
                        }
                    }
                }
            },
            "hooks": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "pre-init": hook_list_schema(),
                    "post-init": hook_list_schema(),
                    "pre-plan": hook_list_schema(),
                    "post-plan": hook_list_schema(),
                    "post-apply": hook_list_schema(),
                    "builtin": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "validate": builtin_schema(json!({}), true),
                            "tflint": builtin_schema(json!({ "config-file": { "type": "string" } }), false),
                            "trivy": builtin_schema(
                                json!({ "severity": { "type": "string", "default": "HIGH,CRITICAL" } }),
                                true
                            )
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
default-environment: dev
production-environments: prod
stable-branch: trunk
defaults:
  var-files: common.tfvars
  backend-configs:
    paths: [backend/common.hcl]
  plan-args: ["-parallelism=5"]
environments:
  dev:
    working-directory: terraform/dev
    var-files: [dev.tfvars]
  prod:
    working-directory: terraform/prod
    var-files:
      inherit: false
      paths: prod.tfvars
    plan-args:
      inherit: false
    apply-args: "-lock-timeout=5m"
"#;

    #[test]
    fn parses_shorthand_and_full_forms() {
        let config = DeployConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.production_environments, vec!["prod"]);
        assert_eq!(config.stable_branch, "trunk");
        assert_eq!(config.environment_names(), vec!["dev", "prod"]);
        let prod = &config.environments["prod"];
        assert_eq!(
            prod.var_files,
            Some(PathsConfig {
                inherit: false,
                paths: vec!["prod.tfvars".to_string()]
            })
        );
    }

    #[test]
    fn resolution_prepends_inherited_defaults() {
        let config = DeployConfig::from_yaml_str(SAMPLE).unwrap();
        let dev = config.resolve("dev").unwrap();
        assert_eq!(dev.working_directory, PathBuf::from("terraform/dev"));
        assert_eq!(dev.var_files, vec!["common.tfvars", "dev.tfvars"]);
        assert_eq!(dev.backend_configs, vec!["backend/common.hcl"]);
        assert_eq!(dev.plan_args, vec!["-parallelism=5"]);
        assert!(!dev.is_production);
    }

    #[test]
    fn inherit_false_drops_defaults() {
        let config = DeployConfig::from_yaml_str(SAMPLE).unwrap();
        let prod = config.resolve("prod").unwrap();
        assert_eq!(prod.var_files, vec!["prod.tfvars"]);
        assert!(prod.plan_args.is_empty());
        assert_eq!(prod.apply_args, vec!["-lock-timeout=5m"]);
        assert_eq!(prod.backend_configs, vec!["backend/common.hcl"]);
        assert!(prod.is_production);
    }

    #[test]
    fn tool_args_carry_extra_args() {
        let config = DeployConfig::from_yaml_str(SAMPLE).unwrap();
        let args = config
            .resolve("dev")
            .unwrap()
            .tool_args(&["-target=module.a".to_string()]);
        assert_eq!(args.extra_args, vec!["-target=module.a"]);
        assert_eq!(args.var_files, vec!["common.tfvars", "dev.tfvars"]);
    }

    #[test]
    fn stable_branch_defaults_to_main() {
        let config = DeployConfig::from_yaml_str(
            "default-environment: dev\nproduction-environments: []\nenvironments:\n  dev: {}\n",
        )
        .unwrap();
        assert_eq!(config.stable_branch, "main");
        assert_eq!(
            config.resolve("dev").unwrap().working_directory,
            PathBuf::from(".")
        );
    }

    #[test]
    fn undefined_default_environment_lists_available() {
        let err = DeployConfig::from_yaml_str(
            "default-environment: staging\nproduction-environments: []\nenvironments:\n  dev: {}\n  prod: {}\n",
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'staging'"), "{msg}");
        assert!(msg.contains("dev, prod"), "{msg}");
    }

    #[test]
    fn undefined_production_environment_is_rejected() {
        let err = DeployConfig::from_yaml_str(
            "default-environment: dev\nproduction-environments: [prod]\nenvironments:\n  dev: {}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("production-environment 'prod'"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = DeployConfig::from_yaml_str(
            "default-environment: dev\nproduction-environments: []\nenvironments:\n  dev:\n    workdir: x\n",
        )
        .unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }

    #[test]
    fn unknown_environment_on_resolve() {
        let config = DeployConfig::from_yaml_str(SAMPLE).unwrap();
        let err = config.resolve("qa").unwrap_err();
        assert!(err.to_string().contains("Available environments: dev, prod"));
    }

    #[test]
    fn load_reports_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let err = DeployConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("not found"));

        std::fs::write(&path, "  \n").unwrap();
        let err = DeployConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("empty"));

        std::fs::write(&path, SAMPLE).unwrap();
        assert!(DeployConfig::load(&path).is_ok());
    }

    #[test]
    fn hotfix_section_parses_with_defaults() {
        let config = DeployConfig::from_yaml_str(
            r#"
default-environment: dev
production-environments: [prod]
environments: { dev: {}, prod: {} }
hotfix:
  detection:
    branch-pattern: "hotfix/*"
    targets-stable-branch: true
  safety:
    require_confirmation: true
    confirmation_command: ".confirm-hotfix"
"#,
        )
        .unwrap();
        let hotfix = config.hotfix.clone().unwrap();
        assert_eq!(hotfix, HotfixConfig::default());
        assert!(hotfix.safety.require_approval);
        assert!(hotfix.safety.require_ci_pass);

        let sparse = DeployConfig::from_yaml_str(
            "default-environment: dev\nproduction-environments: []\nenvironments: { dev: {} }\nhotfix:\n  safety:\n    require-approval: false\n",
        )
        .unwrap();
        let hotfix = sparse.hotfix.unwrap();
        assert_eq!(hotfix.detection.branch_pattern, "hotfix/*");
        assert!(!hotfix.safety.require_approval);
    }

    #[test]
    fn hotfix_rejects_unknown_keys() {
        let err = DeployConfig::from_yaml_str(
            "default-environment: dev\nproduction-environments: []\nenvironments: { dev: {} }\nhotfix:\n  detection:\n    pattern: x\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn hotfix_detection_checks_branch_and_base() {
        let mut config = DeployConfig::from_yaml_str(SAMPLE).unwrap();
        assert!(!config.is_hotfix("hotfix/login", None));

        config.hotfix = Some(HotfixConfig::default());
        assert!(config.is_hotfix("hotfix/login", None));
        assert!(config.is_hotfix("hotfix/login", Some("trunk")));
        assert!(!config.is_hotfix("hotfix/login", Some("develop")));
        assert!(!config.is_hotfix("feature/login", Some("trunk")));

        if let Some(hotfix) = config.hotfix.as_mut() {
            hotfix.detection.targets_stable_branch = false;
        }
        assert!(config.is_hotfix("hotfix/login", Some("develop")));
    }

    #[test]
    fn hooks_reach_every_resolved_environment() {
        let raw = format!(
            "{SAMPLE}hooks:\n  pre-plan:\n    - name: fmt\n      run: terraform fmt -check\n"
        );
        let config = DeployConfig::from_yaml_str(&raw).unwrap();
        for env in ["dev", "prod"] {
            let resolved = config.resolve(env).unwrap();
            assert_eq!(resolved.hooks.pre_plan[0].name, "fmt");
        }
    }

    #[test]
    fn hooks_need_a_positive_timeout() {
        let raw = format!("{SAMPLE}hooks:\n  pre-init:\n    - name: x\n      run: echo\n      timeout: 0\n");
        let err = DeployConfig::from_yaml_str(&raw).unwrap_err();
        assert!(err.to_string().contains("zero timeout"));
    }

    /// Checks `value` against the subset of JSON Schema `json_schema` uses.
    fn conforms(schema: &Value, value: &Value, at: &str) -> std::result::Result<(), String> {
        if let Some(options) = schema.get("oneOf").and_then(Value::as_array) {
            let hits = options.iter().filter(|o| conforms(o, value, at).is_ok()).count();
            return if hits == 1 {
                Ok(())
            } else {
                Err(format!("{at}: matched {hits} oneOf branches"))
            };
        }
        if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(format!("{at}: {value} not in enum"));
            }
        }
        let type_ok = match schema.get("type").and_then(Value::as_str) {
            None => true,
            Some("string") => value.is_string(),
            Some("boolean") => value.is_boolean(),
            Some("integer") => value.is_u64() || value.is_i64(),
            Some("array") => value.is_array(),
            Some("object") => value.is_object(),
            Some(other) => return Err(format!("{at}: unhandled type {other}")),
        };
        if !type_ok {
            return Err(format!("{at}: expected {}", schema["type"]));
        }
        if let (Some(items), Some(values)) = (schema.get("items"), value.as_array()) {
            for (i, item) in values.iter().enumerate() {
                conforms(items, item, &format!("{at}[{i}]"))?;
            }
        }
        if let Some(object) = value.as_object() {
            let props = schema.get("properties").and_then(Value::as_object);
            for key in schema.get("required").and_then(Value::as_array).into_iter().flatten() {
                let key = key.as_str().unwrap_or_default();
                if !object.contains_key(key) {
                    return Err(format!("{at}: missing {key}"));
                }
            }
            for (key, child) in object {
                let path = format!("{at}.{key}");
                match (props.and_then(|p| p.get(key)), schema.get("additionalProperties")) {
                    (Some(sub), _) => conforms(sub, child, &path)?,
                    (None, Some(Value::Bool(false))) => return Err(format!("{path}: not allowed")),
                    (None, Some(extra @ Value::Object(_))) => conforms(extra, child, &path)?,
                    (None, _) => {}
                }
            }
        }
        Ok(())
    }

    const FULL: &str = r#"
default-environment: dev
production-environments: [prod]
stable-branch: main
defaults:
  var-files: common.tfvars
  backend-configs: { inherit: true, paths: [backend.hcl] }
  init-args: ["-upgrade"]
  plan-args: { args: "-parallelism=5" }
  apply-args: []
environments:
  dev:
    working-directory: terraform/dev
    var-files: [dev.tfvars]
  prod:
    working-directory: terraform/prod
    apply-args: { inherit: false, args: ["-lock-timeout=5m"] }
hotfix:
  detection: { branch-pattern: "hotfix/*", targets-stable-branch: true }
  safety:
    require_confirmation: true
    confirmation_command: ".confirm-hotfix"
    require_approval: true
    require_ci_pass: false
hooks:
  pre-init:
    - name: auth
      run: ./login.sh
  pre-plan:
    - name: policy
      run: conftest test .
      condition: apply-only
      timeout: 60
      fail-on-error: false
      working-directory: policy
      env: { STRICT: "1" }
  post-apply:
    - name: notify
      run: ./notify.sh
  builtin:
    validate: { enabled: true }
    tflint: { config-file: .tflint.hcl, fail-on-error: false }
    trivy: { severity: CRITICAL }
"#;

    #[test]
    fn schema_accepts_every_documented_key() {
        DeployConfig::from_yaml_str(FULL).unwrap();
        let value: Value = serde_yaml::from_str(FULL).unwrap();
        conforms(&json_schema(), &value, "$").unwrap();
    }

    #[test]
    fn schema_rejects_what_the_loader_rejects() {
        let schema = json_schema();
        let base = "default-environment: dev\nproduction-environments: []\nenvironments: { dev: {} }\n";
        for extra in [
            "bogus: 1\n",
            "hooks:\n  pre-apply: []\n",
            "hotfix:\n  detection:\n    pattern: x\n",
            "hooks:\n  pre-init:\n    - name: x\n      run: y\n      condition: sometimes\n",
            "environments: { dev: { workdir: x } }\n",
        ] {
            let raw = if extra.starts_with("environments") {
                format!("default-environment: dev\nproduction-environments: []\n{extra}")
            } else {
                format!("{base}{extra}")
            };
            let value: Value = serde_yaml::from_str(&raw).unwrap();
            assert!(conforms(&schema, &value, "$").is_err(), "{extra}");
            assert!(DeployConfig::from_yaml_str(&raw).is_err(), "{extra}");
        }
    }
}
