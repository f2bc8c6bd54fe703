//! Structured observability hooks for the deployment lifecycle.
//!
//! This module provides:
//! - A request-scoped tracing span (`deploy_span`), attached to async work
//!   with `Instrument`
//! - Emission functions with a stable `event` field for each lifecycle step
//!
//! Events are emitted at `info!` level, except supersession and cleanup
//! failures which are `warn!`.

use tracing::{info, warn};

use crate::domain::{DeploymentRequest, ExitClass, ToolStage};

/// Request-scoped span carrying the fields every lifecycle event shares.
pub fn deploy_span(request: &DeploymentRequest) -> tracing::Span {
    tracing::info_span!(
        "tfbd.deploy",
        environment = %request.environment,
        sha = %request.commit_sha.short(),
        run_id = %request.run_id,
        operation = %request.operation,
    )
}

pub fn emit_classified(classification: &str, environment: &str, target_ref: &str) {
    info!(
        event = "deploy.classified",
        classification = %classification,
        environment = %environment,
        target_ref = %target_ref,
    );
}

pub fn emit_plan_published(tag: &str, superseded: usize, forced: bool) {
    info!(event = "plan.published", tag = %tag, superseded = superseded, forced = forced);
}

/// Warning: an older pointer for the same key is being replaced.
pub fn emit_plan_superseded(tag: &str, by_run: &str) {
    warn!(event = "plan.superseded", tag = %tag, by_run = %by_run, "superseding older plan pointer");
}

pub fn emit_plan_resolved(tag: &str, candidates: usize) {
    info!(event = "plan.resolved", tag = %tag, candidates = candidates);
}

/// Warning: pointer cleanup failed. Never fatal.
pub fn emit_retract_failed(tag: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "plan.retract_failed",
        tag = %tag,
        error = %error,
        "could not remove plan pointer; it will be superseded by the next plan"
    );
}

pub fn emit_tool_finished(stage: ToolStage, raw_exit_code: i32, class: ExitClass, report_sent: bool) {
    info!(
        event = "tool.finished",
        stage = %stage,
        exit_code = raw_exit_code,
        class = ?class,
        report_sent = report_sent,
    );
}

pub fn emit_deploy_finished(state: &str, duration_ms: u64, changes_pending: bool) {
    info!(
        event = "deploy.finished",
        state = %state,
        duration_ms = duration_ms,
        changes_pending = changes_pending,
    );
}
