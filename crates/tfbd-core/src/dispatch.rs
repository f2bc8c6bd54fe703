//! Decision handed over by the command dispatcher.
//!
//! The dispatcher parses the PR comment, checks permissions and holds the
//! environment lock. Its answer is taken as authoritative.

use serde::{Deserialize, Serialize};

/// Structured decision for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchDecision {
    /// False when the dispatcher rejected the request.
    pub proceed: bool,
    /// Branch being deployed.
    pub target_ref: String,
    pub commit_sha: String,
    pub environment: String,
    /// The dispatcher's noop flag: preview only, never change infrastructure.
    pub preview_only: bool,
    pub actor: String,
    pub extra_args: Vec<String>,
    /// PR number the request came from, used for reporting.
    pub issue_number: Option<u64>,
}

/// Split the free-form parameter string of a command into CLI tokens.
///
/// `.plan to dev | -target=module.a -var 'x=a b'` arrives here as
/// `-target=module.a -var 'x=a b'`. Shell quoting is honoured; if the quoting
/// is malformed the string is split on whitespace instead.
pub fn split_extra_args(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    match shell_words::split(raw) {
        Ok(tokens) => tokens,
        Err(err) => {
            tracing::warn!(error = %err, "unbalanced quoting in extra args, splitting on whitespace");
            raw.split_whitespace().map(str::to_string).collect()
        }
    }
}
