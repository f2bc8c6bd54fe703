//! Classified deployment intent for one invocation.

use serde::{Deserialize, Serialize};
use tfbd_state::RunId;

use crate::domain::error::{DeployError, Result};

/// Full 40-character git commit SHA, stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitSha(String);

impl CommitSha {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.len() != 40 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DeployError::InvalidRequest(format!(
                "commit SHA must be 40 hex characters, got '{value}'"
            )));
        }
        Ok(CommitSha(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, as used in artifact names.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl TryFrom<String> for CommitSha {
    type Error = DeployError;

    fn try_from(value: String) -> Result<Self> {
        CommitSha::parse(&value)
    }
}

impl From<CommitSha> for String {
    fn from(sha: CommitSha) -> Self {
        sha.0
    }
}

impl std::fmt::Display for CommitSha {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a request asks the tool to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Plan,
    Apply,
    Rollback,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Plan => "plan",
            Operation::Apply => "apply",
            Operation::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified request. Built once per invocation and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub environment: String,
    pub commit_sha: CommitSha,
    pub target_ref: String,
    pub operation: Operation,
    pub extra_args: Vec<String>,
    pub run_id: RunId,
    pub actor: String,
    /// Pull request the command was issued on, when the host knows it.
    pub issue_number: Option<u64>,
}

/// Environment names and run IDs become tag path segments.
pub fn validate_segment(kind: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value
            .chars()
            .any(|c| c == '/' || c == '*' || c == '?' || c.is_whitespace() || c.is_control())
    {
        return Err(DeployError::InvalidRequest(format!(
            "{kind} '{value}' must be non-empty and contain no '/', '*', '?' or whitespace"
        )));
    }
    Ok(())
}
