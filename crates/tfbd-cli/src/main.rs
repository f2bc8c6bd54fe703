//! tf-branch-deploy - Terraform plan/apply from pull request comments
//!
//! The command dispatcher (branch-deploy) parses the comment, checks
//! permissions and takes the environment lock. This binary takes its answer
//! and runs the deployment lifecycle.
//!
//! ## Commands
//!
//! - `parse`: resolve one environment from the config and write step outputs
//! - `execute`: classify the request and plan, apply or roll back
//! - `validate`: check the config file
//! - `environments`: list environment names, comma separated
//! - `schema`: print the JSON Schema of the config file

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use tfbd_core::{
    capture_head_sha, is_git_repo, json_schema, split_extra_args, write_result_comment, ArtifactBlobStore,
    DeployConfig, DispatchDecision, EnvironmentResolver, LifecycleOrchestrator, LifecycleReport,
    OperationClassifier, OutputWriter, PlanArtifactIndex, ReportTarget, ResolvedEnvironment, RunId,
    SystemProcessRunner, ToolInvoker, DEFAULT_CONFIG_FILE,
};
use tfbd_state::{FsBlobService, GitTagRepository};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "tf-branch-deploy")]
#[command(author = "Stevedores Org")]
#[command(version = tfbd_core::VERSION)]
#[command(about = "Terraform plan/apply over pull request comments", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true, env = "TF_BD_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an environment and write its settings as step outputs
    Parse {
        /// Target environment
        #[arg(short, long, env = "TF_BD_ENVIRONMENT")]
        environment: String,
    },

    /// Run the deployment lifecycle for a dispatcher decision
    Execute(Box<ExecuteArgs>),

    /// Validate the configuration file
    Validate,

    /// List environments, comma separated
    Environments,

    /// Print the configuration JSON Schema
    Schema,
}

#[derive(Args)]
struct ExecuteArgs {
    /// Whether the dispatcher approved the request
    #[arg(long, env = "TF_BD_CONTINUE", default_value = "true", action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    proceed: bool,

    /// Target environment (default: the config's default-environment)
    #[arg(short, long, env = "TF_BD_ENVIRONMENT")]
    environment: Option<String>,

    /// Branch being deployed
    #[arg(long = "ref", env = "TF_BD_REF")]
    target_ref: String,

    /// Base branch of the pull request, for hotfix detection
    #[arg(long, env = "TF_BD_BASE_REF")]
    base_ref: Option<String>,

    /// Commit SHA (default: HEAD of the current directory)
    #[arg(short, long, env = "TF_BD_SHA")]
    sha: Option<String>,

    /// Preview only (`.noop` / `.plan`)
    #[arg(long, env = "TF_BD_NOOP", default_value = "false", action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    noop: bool,

    /// User who issued the command
    #[arg(long, env = "TF_BD_ACTOR", default_value = "unknown")]
    actor: String,

    /// Extra terraform arguments from the comment, e.g. "-target=module.a"
    #[arg(long, env = "TF_BD_PARAMS")]
    params: Option<String>,

    /// Pull request number, for reports
    #[arg(long, env = "TF_BD_PR_NUMBER")]
    pr_number: Option<u64>,

    /// Workflow run identifier
    #[arg(long, env = "GITHUB_RUN_ID")]
    run_id: String,

    /// `owner/repo`, for reports
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Override the environment's working directory
    #[arg(short, long)]
    working_dir: Option<PathBuf>,

    /// Repository holding the plan pointer tags
    #[arg(long, default_value = ".")]
    repo_dir: PathBuf,

    /// Remote the pointer tags are pushed to
    #[arg(long, env = "TF_BD_POINTER_REMOTE", default_value = "origin")]
    remote: String,

    /// Keep pointer tags local
    #[arg(long)]
    no_push: bool,

    /// Root of the run-scoped artifact store
    #[arg(long, env = "TF_BD_ARTIFACT_DIR", default_value = ".tf-branch-deploy/artifacts")]
    artifact_dir: PathBuf,

    /// Terraform executable
    #[arg(long, env = "TF_BD_TERRAFORM", default_value = "terraform")]
    terraform_bin: String,

    /// Reporting wrapper executable
    #[arg(long, env = "TF_BD_TFCMT", default_value = "tfcmt")]
    wrapper_bin: String,

    /// File to write the result comment to
    #[arg(long)]
    summary_file: Option<PathBuf>,

    /// Step output file
    #[arg(long, env = "GITHUB_OUTPUT")]
    output: Option<PathBuf>,

    /// Print the classified operation and commands without running them
    #[arg(long)]
    dry_run: bool,
}

/// Config resolution with an optional working-directory override.
struct CliResolver {
    config: DeployConfig,
    working_dir: Option<PathBuf>,
}

impl EnvironmentResolver for CliResolver {
    fn resolve(&self, environment: &str) -> tfbd_core::Result<ResolvedEnvironment> {
        let mut resolved = self.config.resolve(environment)?;
        if let Some(dir) = &self.working_dir {
            resolved.working_directory = dir.clone();
        }
        Ok(resolved)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tfbd_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Parse { environment } => cmd_parse(&cli.config, &environment),
        Commands::Execute(args) => cmd_execute(&cli.config, *args).await,
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Environments => cmd_environments(&cli.config),
        Commands::Schema => cmd_schema(),
    }
}

fn load_config(path: &Path) -> Result<DeployConfig> {
    DeployConfig::load(path).with_context(|| format!("invalid configuration {:?}", path))
}

fn cmd_parse(config_path: &Path, environment: &str) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let env = config.resolve(environment)?;
    let outputs = OutputWriter::from_env();

    outputs.set("working_directory", env.working_directory.display().to_string())?;
    outputs.set_json("var_files", &env.var_files)?;
    outputs.set_json("backend_configs", &env.backend_configs)?;
    outputs.set_json("init_args", &env.init_args)?;
    outputs.set_json("plan_args", &env.plan_args)?;
    outputs.set_json("apply_args", &env.apply_args)?;
    outputs.set_bool("is_production", env.is_production)?;

    info!(environment, "parsed config");
    println!("Parsed config for environment: {environment}");
    Ok(ExitCode::SUCCESS)
}

fn cmd_validate(config_path: &Path) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    println!("Configuration is valid: {}", config_path.display());
    println!();
    println!("  {:<15} {}", "Environments", config.environment_names().join(", "));
    println!("  {:<15} {}", "Default", config.default_environment);
    println!("  {:<15} {}", "Production", config.production_environments.join(", "));
    println!("  {:<15} {}", "Stable Branch", config.stable_branch);
    if let Some(hotfix) = &config.hotfix {
        let detection = &hotfix.detection;
        let safety = &hotfix.safety;
        println!(
            "  {:<15} {} (targets stable branch: {})",
            "Hotfix", detection.branch_pattern, detection.targets_stable_branch
        );
        println!(
            "  {:<15} confirmation: {}, approval: {}, ci pass: {}",
            "Hotfix Safety",
            if safety.require_confirmation {
                safety.confirmation_command.as_str()
            } else {
                "off"
            },
            safety.require_approval,
            safety.require_ci_pass
        );
    }
    let hooks = config.hooks.counts();
    if !hooks.is_empty() {
        let summary: Vec<String> = hooks
            .iter()
            .map(|(phase, n)| format!("{phase} ({n})"))
            .collect();
        println!("  {:<15} {}", "Hooks", summary.join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_schema() -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(&json_schema())?);
    Ok(ExitCode::SUCCESS)
}

fn cmd_environments(config_path: &Path) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    println!("{}", config.environment_names().join(","));
    Ok(ExitCode::SUCCESS)
}

async fn cmd_execute(config_path: &Path, args: ExecuteArgs) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let stable_branch = config.stable_branch.clone();
    let is_hotfix = config.is_hotfix(&args.target_ref, args.base_ref.as_deref());
    if is_hotfix {
        info!(branch = %args.target_ref, "hotfix branch");
    }

    let commit_sha = match args.sha {
        Some(sha) => sha,
        None => capture_head_sha(Path::new("."))
            .await
            .context("no --sha given and HEAD could not be read")?
            .to_string(),
    };
    let decision = DispatchDecision {
        proceed: args.proceed,
        target_ref: args.target_ref,
        commit_sha,
        environment: args
            .environment
            .unwrap_or_else(|| config.default_environment.clone()),
        preview_only: args.noop,
        actor: args.actor,
        extra_args: args.params.as_deref().map(split_extra_args).unwrap_or_default(),
        issue_number: args.pr_number,
    };
    let run_id = RunId::from(args.run_id);

    if !is_git_repo(&args.repo_dir).await {
        anyhow::bail!(
            "{:?} is not a git work tree; plan pointers are stored as tags",
            args.repo_dir
        );
    }
    let mut tags = GitTagRepository::new(&args.repo_dir);
    if !args.no_push {
        tags = tags.with_remote(&args.remote);
    }
    let blobs = FsBlobService::new(&args.artifact_dir)
        .with_context(|| format!("open artifact store {:?}", args.artifact_dir))?;
    let report_target = ReportTarget::from_parts(
        args.repository.as_deref(),
        decision.issue_number,
        args.github_token.as_deref(),
    );
    let invoker = ToolInvoker::new(Arc::new(SystemProcessRunner))
        .with_binary(&args.terraform_bin)
        .with_wrapper(&args.wrapper_bin)
        .with_report(report_target);
    info!(reporting = invoker.reports(), "tool invoker ready");

    let orchestrator = LifecycleOrchestrator::new(
        Arc::new(PlanArtifactIndex::new(Arc::new(tags))),
        ArtifactBlobStore::new(Arc::new(blobs)),
        invoker,
        Arc::new(CliResolver {
            config,
            working_dir: args.working_dir,
        }),
    );

    if args.dry_run {
        return dry_run(&orchestrator, &decision, &stable_branch, &run_id);
    }

    let report = orchestrator.execute(&decision, &stable_branch, &run_id).await;
    let outputs = OutputWriter::new(args.output);
    write_outputs(&outputs, &report)?;
    outputs.set_bool("is_hotfix", is_hotfix)?;
    if let Some(path) = &args.summary_file {
        write_result_comment(path, &report)?;
    }

    match &report.error {
        Some(err) if err.is_user_actionable() => eprintln!("Cannot proceed: {err}"),
        Some(err) => eprintln!("Deployment failed: {err}"),
        None => println!("Deployment {}", report.state),
    }
    Ok(ExitCode::from(report.exit_code() as u8))
}

fn dry_run(
    orchestrator: &LifecycleOrchestrator,
    decision: &DispatchDecision,
    stable_branch: &str,
    run_id: &RunId,
) -> Result<ExitCode> {
    let Some(request) = OperationClassifier::request(decision, stable_branch, run_id)? else {
        println!("Request halted by the dispatcher; nothing would run.");
        return Ok(ExitCode::SUCCESS);
    };
    println!(
        "Dry run: {} of {} at {} to {}",
        request.operation,
        request.target_ref,
        request.commit_sha.short(),
        request.environment
    );
    for line in orchestrator.describe(&request)? {
        println!("  {line}");
    }
    Ok(ExitCode::SUCCESS)
}

fn write_outputs(outputs: &OutputWriter, report: &LifecycleReport) -> Result<()> {
    let operation = report
        .request
        .as_ref()
        .map_or("halt", |r| r.operation.as_str());
    outputs.set("operation", operation)?;
    outputs.set("outcome", report.state.as_str())?;
    outputs.set_bool("has_changes", report.changes_pending())?;
    if let Some(sum) = &report.plan_checksum {
        outputs.set("plan_checksum", sum)?;
    }
    if let Some(run) = &report.pointer_run_id {
        outputs.set("run_id", run.as_str())?;
    }
    Ok(())
}
