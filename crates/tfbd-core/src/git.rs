//! Repository state of the checked-out work tree.

use std::path::Path;

use tokio::process::Command;

use crate::domain::{CommitSha, DeployError, Result};

/// `git rev-parse HEAD` in `repo_dir`, validated as a full SHA.
pub async fn capture_head_sha(repo_dir: &Path) -> Result<CommitSha> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .await
        .map_err(|e| DeployError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DeployError::Git(format!(
            "git rev-parse HEAD failed: {}",
            stderr.trim()
        )));
    }

    CommitSha::parse(&String::from_utf8_lossy(&output.stdout))
}

/// Whether `dir` is inside a git work tree.
pub async fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    #[tokio::test]
    async fn head_sha_is_a_commit_sha() {
        let repo = make_git_repo();
        let sha = capture_head_sha(repo.path()).await.unwrap();
        assert_eq!(sha.as_str().len(), 40);
        assert!(is_git_repo(repo.path()).await);
    }

    #[tokio::test]
    async fn head_sha_fails_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        let err = capture_head_sha(dir.path()).await.unwrap_err();
        assert!(matches!(err, DeployError::Git(_)));
        assert!(!is_git_repo(dir.path()).await);
    }
}
