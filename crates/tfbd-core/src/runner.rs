//! Subprocess execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::domain::Result;

/// A fully built command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Extra environment variables on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.into(),
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `program arg arg ...`, for logs and dry runs. Environment values are not shown.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of one process execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `-1` when killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands. Swapped for a scripted runner in tests.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as real child processes.
///
/// A child is killed when its `run` future is dropped, so callers can bound a
/// command with `tokio::time::timeout`.
pub struct SystemProcessRunner;

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();
        debug!(command = %spec.display(), dir = %spec.working_dir.display(), "spawning");

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let output = child.wait_with_output().await?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new(
            "terraform",
            vec!["plan".to_string(), "-input=false".to_string()],
            ".",
        )
        .with_env("GITHUB_TOKEN", "secret");
        assert_eq!(spec.display(), "terraform plan -input=false");
    }

    #[tokio::test]
    async fn execute_simple_command() {
        let spec = CommandSpec::new("echo", vec!["hello".to_string()], ".");
        let output = SystemProcessRunner.run(&spec).await.expect("execute failed");
        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn execute_failing_command_keeps_exit_code() {
        let spec = CommandSpec::new(
            "sh",
            vec!["-c".to_string(), "exit 2".to_string()],
            ".",
        );
        let output = SystemProcessRunner.run(&spec).await.expect("execute failed");
        assert_eq!(output.exit_code, 2);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn env_is_passed_to_child() {
        let spec = CommandSpec::new(
            "sh",
            vec!["-c".to_string(), "printf %s \"$TFBD_PROBE\"".to_string()],
            ".",
        )
        .with_env("TFBD_PROBE", "visible");
        let output = SystemProcessRunner.run(&spec).await.unwrap();
        assert_eq!(output.stdout, "visible");
    }

    #[tokio::test]
    async fn dropped_run_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let spec = CommandSpec::new(
            "sh",
            vec![
                "-c".to_string(),
                format!("sleep 2; touch {}", marker.display()),
            ],
            dir.path(),
        );
        let timed = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            SystemProcessRunner.run(&spec),
        )
        .await;
        assert!(timed.is_err());
        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let spec = CommandSpec::new("tfbd-definitely-not-installed", vec![], ".");
        assert!(SystemProcessRunner.run(&spec).await.is_err());
    }
}
