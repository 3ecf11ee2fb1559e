//! Retry controller: bounded, strategy-escalating attempts per work item.
//!
//! The attempt budget is independent of cascade depth: an item spawned by a
//! cascade starts with its own budget.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{Result, StrategyKind, WorkItem, MAX_ATTEMPTS};
use crate::fix::{ApplyOutcome, FixApplier};

/// Bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Effective bound; never above [`MAX_ATTEMPTS`].
    pub fn limit(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_ATTEMPTS)
    }
}

/// What to do with an item after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(StrategyKind),
    GiveUp(String),
}

/// Per-item result of driving the state machine to a terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemRun {
    pub attempts: u32,
    pub mutations: usize,
}

/// Sequences attempts for one item until it reaches a terminal state.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Reason recorded when the attempt budget runs out.
    pub fn exhausted_reason(attempts: u32, last_error: Option<&str>) -> String {
        format!(
            "Technical: Unable to fix after {attempts} attempts - {}",
            last_error.unwrap_or("no diagnostic")
        )
    }

    /// Decide the next step for an item sitting in `RetryPending`.
    pub fn decide(&self, item: &WorkItem) -> RetryDecision {
        if item.attempt_count() >= self.policy.limit() {
            return RetryDecision::GiveUp(Self::exhausted_reason(
                item.attempt_count(),
                item.last_error(),
            ));
        }
        match item.next_strategy() {
            Some(kind) => RetryDecision::Retry(kind),
            None => RetryDecision::GiveUp(Self::exhausted_reason(
                item.attempt_count(),
                item.last_error(),
            )),
        }
    }

    /// Drive `item` from `Pending` to a terminal state.
    ///
    /// Returns `Err` only for state-machine violations, which are internal bugs.
    pub async fn drive(&self, applier: &FixApplier, item: &mut WorkItem) -> Result<ItemRun> {
        let mut run = ItemRun::default();

        item.begin_attempt()?;
        if let Some(reason) = applier.requires_approval(item) {
            item.mark_needs_approval(reason)?;
            return Ok(run);
        }

        let mut kind = match item.next_strategy() {
            Some(kind) => kind,
            None => {
                let reason = Self::exhausted_reason(item.attempt_count(), item.last_error());
                item.mark_failed(reason)?;
                return Ok(run);
            }
        };

        loop {
            item.record_strategy(kind)?;
            run.attempts += 1;

            match applier.apply(item, kind).await {
                ApplyOutcome::Success { mutated, note } => {
                    if mutated {
                        run.mutations += 1;
                    }
                    let reason = match (mutated, note) {
                        (true, Some(note)) => format!("Applied with {kind} strategy: {note}"),
                        (true, None) => format!("Applied with {kind} strategy"),
                        (false, _) => "Applied: already resolved, no change needed".to_string(),
                    };
                    item.mark_applied(reason)?;
                    return Ok(run);
                }
                ApplyOutcome::NeedsApproval { reason } => {
                    info!(item = %item.id, reason = %reason, "fix classified as needing approval");
                    item.mark_needs_approval(format!("Architectural: {reason}"))?;
                    return Ok(run);
                }
                ApplyOutcome::Unfixable { reason } => {
                    item.mark_failed(reason)?;
                    return Ok(run);
                }
                ApplyOutcome::Failure { diagnostic } => {
                    debug!(item = %item.id, strategy = %kind, diagnostic = %diagnostic, "attempt failed");
                    item.mark_retry_pending(diagnostic)?;
                }
            }

            match self.decide(item) {
                RetryDecision::Retry(next) => {
                    item.begin_attempt()?;
                    kind = next;
                }
                RetryDecision::GiveUp(reason) => {
                    item.mark_failed(reason)?;
                    return Ok(run);
                }
            }
        }
    }
}
