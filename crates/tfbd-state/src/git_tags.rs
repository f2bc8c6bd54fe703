//! Tag namespace backed by the `git` CLI.
//!
//! Tags are annotated so they carry a message and a tagger date. When a
//! remote is configured every write is pushed and every listing is preceded
//! by a pruning fetch of the listed prefix, so jobs on different hosts see
//! the same namespace.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::debug;

use crate::error::StorageError;
use crate::glob::TagGlob;
use crate::storage_traits::{PointerRepository, StorageResult, TagEntry};

const DEFAULT_TAGGER_NAME: &str = "tf-branch-deploy";
const DEFAULT_TAGGER_EMAIL: &str = "tf-branch-deploy@users.noreply.github.com";

/// Git tag namespace in a local work tree, optionally mirrored to a remote.
#[derive(Debug, Clone)]
pub struct GitTagRepository {
    repo_dir: PathBuf,
    remote: Option<String>,
    tagger_name: String,
    tagger_email: String,
}

impl GitTagRepository {
    /// Tags stay in the local repository only.
    pub fn new(repo_dir: impl AsRef<Path>) -> Self {
        Self {
            repo_dir: repo_dir.as_ref().to_path_buf(),
            remote: None,
            tagger_name: DEFAULT_TAGGER_NAME.to_string(),
            tagger_email: DEFAULT_TAGGER_EMAIL.to_string(),
        }
    }

    /// Push writes to and fetch listings from `remote`.
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    pub fn with_tagger(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.tagger_name = name.into();
        self.tagger_email = email.into();
        self
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    async fn git(&self, args: &[&str]) -> StorageResult<Output> {
        let name_cfg = format!("user.name={}", self.tagger_name);
        let email_cfg = format!("user.email={}", self.tagger_email);
        debug!(args = ?args, "running git");
        Command::new("git")
            .args(["-c", &name_cfg, "-c", &email_cfg, "-c", "tag.gpgSign=false"])
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .map_err(|e| StorageError::Backend(format!("failed to run git: {e}")))
    }

    async fn push_tag(&self, remote: &str, name: &str, force: bool) -> StorageResult<()> {
        let refspec = format!("refs/tags/{name}");
        let mut args = vec!["push"];
        if force {
            args.push("--force");
        }
        args.push(remote);
        args.push(&refspec);

        let output = self.git(&args).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = stderr_of(&output);
        if !force && (stderr.contains("already exists") || stderr.contains("rejected")) {
            return Err(StorageError::AlreadyExists {
                name: name.to_string(),
            });
        }
        Err(StorageError::Backend(format!(
            "git push {remote} {refspec} failed: {stderr}"
        )))
    }

    async fn fetch_prefix(&self, remote: &str, prefix: &str) -> StorageResult<()> {
        let refspec = format!("+refs/tags/{prefix}*:refs/tags/{prefix}*");
        let output = self
            .git(&["fetch", "--prune", "--no-tags", remote, &refspec])
            .await?;
        if !output.status.success() {
            return Err(StorageError::Backend(format!(
                "git fetch {remote} {refspec} failed: {}",
                stderr_of(&output)
            )));
        }
        Ok(())
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Parse one `name\tdate\tsubject` line from `git tag --format`.
fn parse_tag_line(line: &str) -> Option<TagEntry> {
    let mut parts = line.splitn(3, '\t');
    let name = parts.next()?.trim();
    let date = parts.next()?.trim();
    let subject = parts.next().map(str::trim).unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    let created_at = DateTime::parse_from_rfc3339(date)
        .ok()?
        .with_timezone(&Utc);
    Some(TagEntry {
        name: name.to_string(),
        created_at,
        message: if subject.is_empty() {
            None
        } else {
            Some(subject.to_string())
        },
    })
}

#[async_trait]
impl PointerRepository for GitTagRepository {
    async fn create_tag(
        &self,
        name: &str,
        target: &str,
        message: &str,
        force: bool,
    ) -> StorageResult<()> {
        let mut args = vec!["tag", "-a"];
        if force {
            args.push("-f");
        }
        args.extend([name, target, "-m", message]);

        let output = self.git(&args).await?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            if !force && stderr.contains("already exists") {
                return Err(StorageError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            return Err(StorageError::Backend(format!(
                "git tag {name} failed: {stderr}"
            )));
        }

        if let Some(remote) = &self.remote {
            self.push_tag(remote, name, force).await?;
        }
        Ok(())
    }

    async fn list_tags(&self, pattern: &str) -> StorageResult<Vec<TagEntry>> {
        let glob = TagGlob::new(pattern)?;
        if let Some(remote) = &self.remote {
            self.fetch_prefix(remote, glob.literal_prefix()).await?;
        }

        let output = self
            .git(&[
                "tag",
                "--list",
                pattern,
                "--format=%(refname:strip=2)%09%(creatordate:iso-strict)%09%(contents:subject)",
            ])
            .await?;
        if !output.status.success() {
            return Err(StorageError::Backend(format!(
                "git tag --list {pattern} failed: {}",
                stderr_of(&output)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(parse_tag_line)
            .filter(|entry| glob.is_match(&entry.name))
            .collect())
    }

    async fn delete_tag(&self, name: &str) -> StorageResult<()> {
        let output = self.git(&["tag", "-d", name]).await?;
        let local_deleted = output.status.success();
        if !local_deleted {
            let stderr = stderr_of(&output);
            if !stderr.contains("not found") {
                return Err(StorageError::Backend(format!(
                    "git tag -d {name} failed: {stderr}"
                )));
            }
        }

        let mut remote_deleted = false;
        if let Some(remote) = &self.remote {
            let refspec = format!("refs/tags/{name}");
            let output = self.git(&["push", remote, "--delete", &refspec]).await?;
            if output.status.success() {
                remote_deleted = true;
            } else {
                let stderr = stderr_of(&output);
                if !stderr.contains("remote ref does not exist") {
                    return Err(StorageError::Backend(format!(
                        "git push {remote} --delete {refspec} failed: {stderr}"
                    )));
                }
            }
        }

        if local_deleted || remote_deleted {
            Ok(())
        } else {
            Err(StorageError::NotFound {
                name: name.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) -> String {
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
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn make_git_repo() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        let sha = run_git(dir.path(), &["rev-parse", "HEAD"]);
        (dir, sha)
    }

    #[test]
    fn parse_tag_line_reads_all_fields() {
        let entry =
            parse_tag_line("plan/dev/1/abc\t2024-05-01T10:00:00+00:00\t{\"run_id\":\"1\"}")
                .unwrap();
        assert_eq!(entry.name, "plan/dev/1/abc");
        assert_eq!(entry.created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert_eq!(entry.message.as_deref(), Some("{\"run_id\":\"1\"}"));
    }

    #[test]
    fn parse_tag_line_rejects_garbage() {
        assert!(parse_tag_line("").is_none());
        assert!(parse_tag_line("plan/dev/1/abc\tnot-a-date\t").is_none());
    }

    #[tokio::test]
    async fn create_list_delete_local() {
        let (repo, sha) = make_git_repo();
        let tags = GitTagRepository::new(repo.path());

        tags.create_tag("plan/dev/1/abc", &sha, "{\"run_id\":\"1\"}", false)
            .await
            .unwrap();
        tags.create_tag("plan/prod/1/abc", &sha, "other", false)
            .await
            .unwrap();

        let listed = tags.list_tags("plan/dev/*/abc").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "plan/dev/1/abc");
        assert_eq!(listed[0].message.as_deref(), Some("{\"run_id\":\"1\"}"));

        tags.delete_tag("plan/dev/1/abc").await.unwrap();
        assert!(tags.list_tags("plan/dev/*/abc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_forced_create_of_existing_tag_is_already_exists() {
        let (repo, sha) = make_git_repo();
        let tags = GitTagRepository::new(repo.path());
        tags.create_tag("plan/dev/1/abc", &sha, "first", false)
            .await
            .unwrap();

        let err = tags
            .create_tag("plan/dev/1/abc", &sha, "second", false)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        tags.create_tag("plan/dev/1/abc", &sha, "second", true)
            .await
            .unwrap();
        let listed = tags.list_tags("plan/dev/*/abc").await.unwrap();
        assert_eq!(listed[0].message.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn deleting_missing_tag_is_not_found() {
        let (repo, _sha) = make_git_repo();
        let tags = GitTagRepository::new(repo.path());
        let err = tags.delete_tag("plan/dev/9/none").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn tags_travel_through_the_remote() {
        let remote_dir = tempfile::tempdir().unwrap();
        run_git(remote_dir.path(), &["init", "--bare"]);
        let remote_path = remote_dir.path().to_str().unwrap().to_string();

        let (planner, sha) = make_git_repo();
        run_git(planner.path(), &["remote", "add", "origin", &remote_path]);
        run_git(planner.path(), &["push", "origin", "HEAD:refs/heads/main"]);

        let applier = tempfile::tempdir().unwrap();
        run_git(
            applier.path(),
            &["clone", &remote_path, applier.path().to_str().unwrap()],
        );

        let planner_tags = GitTagRepository::new(planner.path()).with_remote("origin");
        let applier_tags = GitTagRepository::new(applier.path()).with_remote("origin");

        planner_tags
            .create_tag("plan/dev/1/abc", &sha, "pointer", false)
            .await
            .unwrap();

        let seen = applier_tags.list_tags("plan/dev/*/abc").await.unwrap();
        assert_eq!(seen.len(), 1);

        applier_tags.delete_tag("plan/dev/1/abc").await.unwrap();
        assert!(planner_tags
            .list_tags("plan/dev/*/abc")
            .await
            .unwrap()
            .is_empty());
    }
}
