//! Structured observability hooks for the remediation run lifecycle.
//!
//! Every event carries an `event` field so logs can be filtered by kind.
//! Events are emitted at `info!` unless they indicate a problem.

use tracing::{info, warn};

/// Span tagged with the run id; attach it with `tracing::Instrument`.
///
/// ```ignore
/// orchestrate().instrument(run_span("3f1c...")).await;
/// // every event inside carries run_id = "3f1c..."
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("remedy.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, findings: usize, workspace: &str) {
    info!(event = "run.started", run_id = %run_id, findings, workspace = %workspace);
}

pub fn emit_run_finished(
    run_id: &str,
    outcome: &str,
    duration_ms: u64,
    applied: usize,
    failed: usize,
    needs_approval: usize,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        outcome = %outcome,
        duration_ms,
        applied,
        failed,
        needs_approval,
    );
}

pub fn emit_preflight(clean: bool, reason: &str) {
    if clean {
        info!(event = "preflight.checked", clean, reason = %reason);
    } else {
        warn!(event = "preflight.checked", clean, reason = %reason);
    }
}

pub fn emit_batch_started(generation: u32, items: usize) {
    info!(event = "batch.started", generation, items);
}

/// Emit event: one work item reached a terminal state.
pub fn emit_item_terminal(item_id: &str, status: &str, attempts: u32, reason: &str) {
    info!(
        event = "item.terminal",
        item_id = %item_id,
        status = %status,
        attempts,
        reason = %reason,
    );
}

pub fn emit_verification_completed(checkers: usize, failed: usize, duration_ms: u64) {
    info!(event = "verification.completed", checkers, failed, duration_ms);
}

pub fn emit_cascade_detected(generation: u32, new_failures: usize) {
    if new_failures > 0 {
        warn!(event = "cascade.detected", generation, new_failures);
    } else {
        info!(event = "cascade.detected", generation, new_failures);
    }
}

/// Emit event: a new failure was not expanded because the depth bound was hit.
pub fn emit_cascade_limit(item_id: &str, checker: &str, signature: &str) {
    warn!(
        event = "cascade.limit_exceeded",
        item_id = %item_id,
        checker = %checker,
        signature = %signature,
    );
}

pub fn emit_approval_requested(candidates: usize) {
    info!(event = "approval.requested", candidates);
}

pub fn emit_approval_resolved(approved: usize, declined: usize) {
    info!(event = "approval.resolved", approved, declined);
}

pub fn emit_run_aborted(run_id: &str, unattempted: usize) {
    warn!(event = "run.aborted", run_id = %run_id, unattempted);
}

pub fn emit_closure_violation(applied: usize, failed: usize, needs_approval: usize, total: usize) {
    tracing::error!(
        event = "ledger.closure_violated",
        applied,
        failed,
        needs_approval,
        total,
    );
}

/// Emit event: an internal invariant broke; the run cannot be trusted.
pub fn emit_internal_error(run_id: &str, error: &dyn std::fmt::Display) {
    tracing::error!(event = "run.internal_error", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _entered = run_span("test-run-id").entered();
        emit_batch_started(1, 0);
        emit_cascade_detected(1, 0);
    }
}
