//! Scripted process runner standing in for terraform and the report wrapper.
//!
//! Plans write deterministic bytes to their `-out=` path, applies record the
//! bytes of the plan file they were given, and wrapped calls honour the
//! exit-code shim protocol. Programs marked missing fail to spawn; programs
//! marked passthrough (hook shells) run for real.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::{DeployError, Result};
use crate::invoker::SHIM_NAME;
use crate::runner::{CommandOutput, CommandSpec, ProcessRunner, SystemProcessRunner};

#[derive(Default)]
struct Script {
    exit_codes: HashMap<String, i32>,
    wrapper_exit: Option<i32>,
    skip_exit_file: bool,
    plan_bytes: Vec<u8>,
    calls: Vec<CommandSpec>,
    applied: Vec<Vec<u8>>,
    missing: Vec<String>,
    passthrough: Vec<String>,
}

pub struct ScriptedProcessRunner {
    script: Mutex<Script>,
}

impl Default for ScriptedProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProcessRunner {
    /// Every subcommand exits 0; plans contain `b"scripted plan"`.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                plan_bytes: b"scripted plan".to_vec(),
                ..Script::default()
            }),
        }
    }

    /// Exit code for a terraform subcommand (`init`, `plan`, `apply`).
    pub fn set_exit(&self, subcommand: &str, code: i32) {
        self.script
            .lock()
            .unwrap()
            .exit_codes
            .insert(subcommand.to_string(), code);
    }

    /// Make the wrapper exit with `code` regardless of the inner command.
    pub fn set_wrapper_exit(&self, code: Option<i32>) {
        self.script.lock().unwrap().wrapper_exit = code;
    }

    /// Simulate a shim that never got to write its exit file.
    pub fn skip_exit_file(&self, skip: bool) {
        self.script.lock().unwrap().skip_exit_file = skip;
    }

    pub fn set_plan_bytes(&self, bytes: &[u8]) {
        self.script.lock().unwrap().plan_bytes = bytes.to_vec();
    }

    /// Spawning `program` fails with `NotFound`, as for an uninstalled tool.
    pub fn missing_program(&self, program: &str) {
        self.script.lock().unwrap().missing.push(program.to_string());
    }

    /// Run `program` for real. Calls are still recorded.
    pub fn passthrough(&self, program: &str) {
        self.script.lock().unwrap().passthrough.push(program.to_string());
    }

    /// Programs of every recorded call, in order.
    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|spec| spec.program).collect()
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.script.lock().unwrap().calls.clone()
    }

    /// Terraform subcommands run so far, in order, wrapped or not.
    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|spec| inner_argv(spec).1.first().cloned())
            .collect()
    }

    /// Contents of the plan file each apply was handed.
    pub fn applied_plans(&self) -> Vec<Vec<u8>> {
        self.script.lock().unwrap().applied.clone()
    }
}

/// Split a spec into `(exit file, inner terraform args)`.
fn inner_argv(spec: &CommandSpec) -> (Option<PathBuf>, Vec<String>) {
    match spec.args.iter().position(|a| a == SHIM_NAME) {
        Some(at) => {
            let exit_file = spec.args.get(at + 1).map(PathBuf::from);
            // skip exit file and the inner program name
            let inner = spec.args.iter().skip(at + 3).cloned().collect();
            (exit_file, inner)
        }
        None => (None, spec.args.clone()),
    }
}

fn resolve(dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

#[async_trait]
impl ProcessRunner for ScriptedProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let real = {
            let mut script = self.script.lock().unwrap();
            if script.missing.contains(&spec.program) {
                return Err(DeployError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{}: not installed", spec.program),
                )));
            }
            let real = script.passthrough.contains(&spec.program);
            if real {
                script.calls.push(spec.clone());
            }
            real
        };
        if real {
            return SystemProcessRunner.run(spec).await;
        }

        let (exit_file, argv) = inner_argv(spec);
        let subcommand = argv.first().cloned().unwrap_or_default();

        let (code, wrapper_exit, skip_exit_file, plan_bytes) = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(spec.clone());
            (
                script.exit_codes.get(&subcommand).copied().unwrap_or(0),
                script.wrapper_exit,
                script.skip_exit_file,
                script.plan_bytes.clone(),
            )
        };

        match subcommand.as_str() {
            "plan" if code != 1 => {
                if let Some(out) = argv.iter().find_map(|a| a.strip_prefix("-out=")) {
                    tokio::fs::write(resolve(&spec.working_dir, out), &plan_bytes).await?;
                }
            }
            "apply" => {
                if let Some(plan) = argv.last() {
                    let bytes = tokio::fs::read(resolve(&spec.working_dir, plan)).await?;
                    self.script.lock().unwrap().applied.push(bytes);
                }
            }
            _ => {}
        }

        if let Some(exit_file) = exit_file.filter(|_| !skip_exit_file) {
            tokio::fs::write(&exit_file, code.to_string()).await?;
        }

        Ok(CommandOutput {
            exit_code: wrapper_exit.unwrap_or(code),
            stdout: format!("scripted {subcommand}"),
            stderr: String::new(),
            duration_ms: 0,
        })
    }
}
