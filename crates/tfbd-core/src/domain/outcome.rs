//! Result of one tool invocation.

use serde::{Deserialize, Serialize};

/// Three-way classification of a terraform exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitClass {
    /// Succeeded with nothing to change.
    Clean,
    /// Plan succeeded and found differences. Not an error.
    ChangesPending,
    /// Hard failure.
    Failure,
}

impl ExitClass {
    /// Plan uses `-detailed-exitcode`: 0 clean, 2 changes pending, anything else fails.
    pub fn from_plan_exit(code: i32) -> Self {
        match code {
            0 => ExitClass::Clean,
            2 => ExitClass::ChangesPending,
            _ => ExitClass::Failure,
        }
    }

    /// Apply has no changes-pending state: 0 clean, anything else fails.
    pub fn from_apply_exit(code: i32) -> Self {
        match code {
            0 => ExitClass::Clean,
            _ => ExitClass::Failure,
        }
    }

    pub fn is_failure(self) -> bool {
        self == ExitClass::Failure
    }
}

/// Terraform sub-command that produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStage {
    Init,
    Plan,
    Apply,
}

impl ToolStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolStage::Init => "init",
            ToolStage::Plan => "plan",
            ToolStage::Apply => "apply",
        }
    }
}

impl std::fmt::Display for ToolStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one `ToolInvoker::invoke` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub exit_class: ExitClass,
    /// Exit code of the inner terraform command, never the wrapper's.
    pub raw_exit_code: i32,
    /// Whether the reporting wrapper ran and delivered its report.
    pub report_sent: bool,
    /// Last stage that ran.
    pub stage: ToolStage,
}

impl ToolOutcome {
    pub fn changes_pending(&self) -> bool {
        self.exit_class == ExitClass::ChangesPending
    }
}
