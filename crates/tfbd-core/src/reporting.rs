//! Result comment rendering and the summary file writer.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::domain::Operation;
use crate::hooks::HookResult;
use crate::lifecycle::{LifecycleReport, LifecycleState};

/// JSON block attached to the result comment.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResultMetadata {
    pub operation: Option<String>,
    pub state: String,
    pub environment: Option<String>,
    #[serde(rename = "ref")]
    pub target_ref: Option<String>,
    pub commit: Option<String>,
    pub actor: Option<String>,
    pub run_id: Option<String>,
    pub plan_run_id: Option<String>,
    pub noop: bool,
    pub changes_pending: bool,
}

impl ResultMetadata {
    pub fn from_report(report: &LifecycleReport) -> Self {
        let request = report.request.as_ref();
        Self {
            operation: request.map(|r| r.operation.to_string()),
            state: report.state.to_string(),
            environment: request.map(|r| r.environment.clone()),
            target_ref: request.map(|r| r.target_ref.clone()),
            commit: request.map(|r| r.commit_sha.to_string()),
            actor: request.map(|r| r.actor.clone()),
            run_id: request.map(|r| r.run_id.to_string()),
            plan_run_id: report.pointer_run_id.as_ref().map(ToString::to_string),
            noop: request.is_some_and(|r| r.operation == Operation::Plan),
            changes_pending: report.changes_pending(),
        }
    }
}

/// Render the markdown summary posted back to the request.
pub fn render_result_comment(report: &LifecycleReport) -> String {
    let mut out = String::new();
    match (&report.request, report.state) {
        (Some(request), LifecycleState::Completed) => {
            let verb = match request.operation {
                Operation::Plan => "**noop** deployed",
                Operation::Apply => "deployed",
                Operation::Rollback => "rolled back to",
            };
            out.push_str("### Deployment Results ✅\n\n");
            if request.operation == Operation::Rollback {
                out.push_str(&format!(
                    "**{}** successfully {verb} stable branch `{}` on **{}**\n",
                    request.actor, request.target_ref, request.environment
                ));
            } else {
                out.push_str(&format!(
                    "**{}** successfully {verb} branch `{}` to **{}**\n",
                    request.actor, request.target_ref, request.environment
                ));
            }
            if request.operation == Operation::Plan {
                if report.changes_pending() {
                    out.push_str("\nThe plan has changes. Apply it by deploying the same commit.\n");
                } else {
                    out.push_str("\nNo changes. Infrastructure matches the configuration.\n");
                }
            }
        }
        (_, LifecycleState::Halted) => {
            out.push_str("### ⚠️ Cannot proceed with deployment\n\n");
            out.push_str("The request was not approved; nothing was run.\n");
        }
        _ => {
            out.push_str("### ⚠️ Cannot proceed with deployment\n\n");
            match &report.error {
                Some(err) => out.push_str(&format!("{err}\n")),
                None => out.push_str(
                    "An unexpected error occurred. Please review the workflow logs for details.\n",
                ),
            }
        }
    }

    render_hooks(&mut out, &report.hooks);

    let metadata = ResultMetadata::from_report(report);
    let json = serde_json::to_string_pretty(&metadata).unwrap_or_else(|_| "{}".to_string());
    out.push_str("\n<details><summary>Details</summary>\n\n```json\n");
    out.push_str(&json);
    out.push_str("\n```\n\n</details>\n");
    out
}

fn render_hooks(out: &mut String, hooks: &[HookResult]) {
    if hooks.is_empty() {
        return;
    }
    out.push_str("\n#### Hooks\n\n| Hook | Phase | Result |\n|------|-------|--------|\n");
    for hook in hooks {
        let result = if hook.skipped {
            format!("skipped ({})", hook.skip_reason.as_deref().unwrap_or("condition not met"))
        } else if hook.timed_out {
            "timed out".to_string()
        } else if hook.failed() {
            format!("failed (exit {})", hook.exit_code)
        } else {
            "passed".to_string()
        };
        out.push_str(&format!("| {} | {} | {result} |\n", hook.name, hook.phase));
    }
    for section in hooks.iter().filter_map(|h| h.markdown.as_deref()) {
        out.push('\n');
        out.push_str(section);
        out.push('\n');
    }
}

/// Write the rendered comment for the dispatcher to post.
pub fn write_result_comment(path: &Path, report: &LifecycleReport) -> Result<()> {
    std::fs::write(path, render_result_comment(report))
        .with_context(|| format!("write {:?}", path))?;
    Ok(())
}
