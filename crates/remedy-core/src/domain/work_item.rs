//! Work items and their state machine.
//!
//! ```text
//! Pending -> Attempting -> { Applied | RetryPending | Failed | NeedsApproval }
//! RetryPending -> { Attempting | Failed }
//! NeedsApproval -> { Pending (approved) | Failed ("Deferred: ...") }
//! Pending -> Failed (aborted or over the cascade bound before any attempt)
//! ```
//!
//! `NeedsApproval` can only be left through [`WorkItem::approve`] or
//! [`WorkItem::decline`], both of which are driven by the approval gate.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{RemedyError, Result};
use super::finding::{Finding, Location, Severity};

/// Hard upper bound on fix attempts per item.
pub const MAX_ATTEMPTS: u32 = 3;

/// Hard upper bound on cascade generations per run.
pub const MAX_CASCADE_GENERATIONS: u32 = 3;

/// Stable identifier, `<scope>-<sequence>`, unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(String);

impl WorkItemId {
    pub fn new(scope: &str, sequence: usize) -> Self {
        Self(format!("{scope}-{sequence:03}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    Attempting,
    RetryPending,
    Applied,
    Failed,
    NeedsApproval,
}

impl WorkItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed | Self::NeedsApproval)
    }

    fn can_transition_to(self, to: Self) -> bool {
        use WorkItemStatus::*;
        matches!(
            (self, to),
            (Pending, Attempting)
                | (Pending, Failed)
                | (Attempting, Applied)
                | (Attempting, RetryPending)
                | (Attempting, Failed)
                | (Attempting, NeedsApproval)
                | (RetryPending, Attempting)
                | (RetryPending, Failed)
                | (NeedsApproval, Pending)
                | (NeedsApproval, Failed)
        )
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Attempting => "attempting",
            Self::RetryPending => "retry_pending",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::NeedsApproval => "needs_approval",
        };
        f.write_str(s)
    }
}

/// Edit strategy tag, selected by attempt index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// The usual fix for the item's issue category.
    Primary,
    /// A named alternative approach.
    Alternative,
    /// The smallest change that could plausibly resolve the issue.
    Minimal,
}

impl StrategyKind {
    pub const ORDER: [StrategyKind; 3] = [Self::Primary, Self::Alternative, Self::Minimal];

    /// Strategy for a 1-based attempt number.
    pub fn for_attempt(attempt: u32) -> Option<Self> {
        match attempt {
            1 => Some(Self::Primary),
            2 => Some(Self::Alternative),
            3 => Some(Self::Minimal),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Alternative => "alternative",
            Self::Minimal => "minimal",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a work item came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemOrigin {
    /// Admitted from the external finding batch.
    Finding,
    /// A failure introduced by this run's own edits.
    Cascade { checker: String, signature: String },
}

/// The orchestrator's stateful record of one finding being processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub finding_id: String,
    pub category: String,
    pub description: String,
    pub location: Location,
    pub severity: Severity,
    pub origin: ItemOrigin,
    /// Cascade generation; admitted findings are generation 1.
    pub generation: u32,
    status: WorkItemStatus,
    attempt_count: u32,
    last_error: Option<String>,
    strategy_history: Vec<StrategyKind>,
    /// Human-readable reason, set when the item turns terminal.
    reason: Option<String>,
    approved: bool,
    /// Strategies tried before an approval reset the attempt budget.
    prior_strategies: Vec<StrategyKind>,
}

impl WorkItem {
    /// Admit a finding as a generation-1 item.
    pub fn from_finding(id: WorkItemId, finding: &Finding) -> Self {
        Self {
            id,
            finding_id: finding.id.clone(),
            category: finding.category.clone(),
            description: finding.description.clone(),
            location: finding.location.clone(),
            severity: finding.severity,
            origin: ItemOrigin::Finding,
            generation: 1,
            status: WorkItemStatus::Pending,
            attempt_count: 0,
            last_error: None,
            strategy_history: Vec::new(),
            reason: None,
            approved: false,
            prior_strategies: Vec::new(),
        }
    }

    /// Admit a cascade failure. The finding id records the signature's checker.
    pub fn from_cascade(
        id: WorkItemId,
        finding: &Finding,
        generation: u32,
        checker: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        let mut item = Self::from_finding(id, finding);
        item.generation = generation;
        item.origin = ItemOrigin::Cascade {
            checker: checker.into(),
            signature: signature.into(),
        };
        item
    }

    pub fn status(&self) -> WorkItemStatus {
        self.status
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn strategy_history(&self) -> &[StrategyKind] {
        &self.strategy_history
    }

    pub fn prior_strategies(&self) -> &[StrategyKind] {
        &self.prior_strategies
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn is_approved(&self) -> bool {
        self.approved
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// First strategy in the fixed order that has not been tried yet.
    pub fn next_strategy(&self) -> Option<StrategyKind> {
        StrategyKind::ORDER
            .into_iter()
            .find(|kind| !self.strategy_history.contains(kind))
    }

    fn transition(&mut self, to: WorkItemStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(RemedyError::IllegalTransition {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// `Pending | RetryPending -> Attempting`.
    pub fn begin_attempt(&mut self) -> Result<()> {
        self.transition(WorkItemStatus::Attempting)
    }

    /// Count one executed attempt with `kind`. Refuses repeats and a 4th attempt.
    pub fn record_strategy(&mut self, kind: StrategyKind) -> Result<()> {
        if self.status != WorkItemStatus::Attempting
            || self.strategy_history.contains(&kind)
            || self.attempt_count >= MAX_ATTEMPTS
        {
            return Err(RemedyError::IllegalTransition {
                id: self.id.clone(),
                from: self.status,
                to: WorkItemStatus::Attempting,
            });
        }
        self.strategy_history.push(kind);
        self.attempt_count += 1;
        Ok(())
    }

    pub fn mark_applied(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(WorkItemStatus::Applied)?;
        self.reason = Some(reason.into());
        Ok(())
    }

    pub fn mark_retry_pending(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(WorkItemStatus::RetryPending)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(WorkItemStatus::Failed)?;
        self.reason = Some(reason.into());
        Ok(())
    }

    pub fn mark_needs_approval(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(WorkItemStatus::NeedsApproval)?;
        self.reason = Some(reason.into());
        Ok(())
    }

    /// Approved by an operator: back to `Pending` with a fresh attempt budget.
    pub fn approve(&mut self) -> Result<()> {
        if self.status != WorkItemStatus::NeedsApproval {
            return Err(RemedyError::IllegalTransition {
                id: self.id.clone(),
                from: self.status,
                to: WorkItemStatus::Pending,
            });
        }
        self.transition(WorkItemStatus::Pending)?;
        self.prior_strategies
            .extend(std::mem::take(&mut self.strategy_history));
        self.attempt_count = 0;
        self.last_error = None;
        self.reason = None;
        self.approved = true;
        Ok(())
    }

    /// Declined by an operator: `Failed` with a `Deferred:` reason.
    pub fn decline(&mut self, reason: &str) -> Result<()> {
        if self.status != WorkItemStatus::NeedsApproval {
            return Err(RemedyError::IllegalTransition {
                id: self.id.clone(),
                from: self.status,
                to: WorkItemStatus::Failed,
            });
        }
        self.mark_failed(format!("Deferred: {reason}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> WorkItem {
        let finding = Finding::new("LINT-7", Location::at("src/a.rs", 3), Severity::Low, "x");
        WorkItem::from_finding(WorkItemId::new("F", 1), &finding)
    }

    #[test]
    fn test_id_format() {
        assert_eq!(WorkItemId::new("C2", 7).as_str(), "C2-007");
    }

    #[test]
    fn test_strategy_order_by_attempt() {
        assert_eq!(StrategyKind::for_attempt(1), Some(StrategyKind::Primary));
        assert_eq!(StrategyKind::for_attempt(2), Some(StrategyKind::Alternative));
        assert_eq!(StrategyKind::for_attempt(3), Some(StrategyKind::Minimal));
        assert_eq!(StrategyKind::for_attempt(4), None);
    }

    #[test]
    fn test_happy_path() {
        let mut it = item();
        it.begin_attempt().unwrap();
        it.record_strategy(StrategyKind::Primary).unwrap();
        it.mark_applied("fixed").unwrap();
        assert_eq!(it.status(), WorkItemStatus::Applied);
        assert_eq!(it.attempt_count(), 1);
        assert_eq!(it.reason(), Some("fixed"));
    }

    #[test]
    fn test_terminal_states_are_not_reentered() {
        let mut it = item();
        it.begin_attempt().unwrap();
        it.record_strategy(StrategyKind::Primary).unwrap();
        it.mark_applied("fixed").unwrap();

        assert!(it.begin_attempt().is_err());
        assert!(it.mark_failed("late").is_err());
        assert!(it.approve().is_err());
        assert_eq!(it.status(), WorkItemStatus::Applied);
    }

    #[test]
    fn test_strategy_never_repeats() {
        let mut it = item();
        it.begin_attempt().unwrap();
        it.record_strategy(StrategyKind::Primary).unwrap();
        assert!(it.record_strategy(StrategyKind::Primary).is_err());
        assert_eq!(it.next_strategy(), Some(StrategyKind::Alternative));
    }

    #[test]
    fn test_fourth_attempt_is_refused() {
        let mut it = item();
        for kind in StrategyKind::ORDER {
            it.begin_attempt().unwrap();
            it.record_strategy(kind).unwrap();
            it.mark_retry_pending("nope").unwrap();
        }
        assert_eq!(it.attempt_count(), MAX_ATTEMPTS);
        assert_eq!(it.next_strategy(), None);
        it.begin_attempt().unwrap();
        assert!(it.record_strategy(StrategyKind::Minimal).is_err());
        assert_eq!(it.attempt_count(), MAX_ATTEMPTS);
    }

    #[test]
    fn test_approve_resets_budget() {
        let mut it = item();
        it.begin_attempt().unwrap();
        it.record_strategy(StrategyKind::Primary).unwrap();
        it.mark_needs_approval("touches three crates").unwrap();

        it.approve().unwrap();
        assert_eq!(it.status(), WorkItemStatus::Pending);
        assert_eq!(it.attempt_count(), 0);
        assert!(it.strategy_history().is_empty());
        assert_eq!(it.prior_strategies(), &[StrategyKind::Primary]);
        assert!(it.is_approved());
        assert_eq!(it.reason(), None);
    }

    #[test]
    fn test_decline_prefixes_deferred() {
        let mut it = item();
        it.begin_attempt().unwrap();
        it.mark_needs_approval("breaking change").unwrap();
        it.decline("operator declined").unwrap();
        assert_eq!(it.status(), WorkItemStatus::Failed);
        assert_eq!(it.reason(), Some("Deferred: operator declined"));
    }

    #[test]
    fn test_pending_item_can_fail_without_attempt() {
        let mut it = item();
        it.mark_failed("cascade limit exceeded").unwrap();
        assert_eq!(it.attempt_count(), 0);
        assert!(it.is_terminal());
    }
}
