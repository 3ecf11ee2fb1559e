//! Approval gate for items whose fix exceeds single-item scope.
//!
//! All `NeedsApproval` items are presented to the operator as one batch.
//! Approved items go back to the fix applier with a fresh attempt budget.
//! Declined items become `Failed` with a `Deferred:` reason. Nothing is
//! skipped silently.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{Location, Result, Severity, WorkItem, WorkItemId};
use crate::ledger::Ledger;
use crate::obs;

/// One item awaiting a decision, with enough context to decide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalCandidate {
    pub id: WorkItemId,
    pub finding_id: String,
    pub location: Location,
    pub severity: Severity,
    pub description: String,
    /// Why the fix was flagged.
    pub reason: String,
}

impl From<&WorkItem> for ApprovalCandidate {
    fn from(item: &WorkItem) -> Self {
        Self {
            id: item.id.clone(),
            finding_id: item.finding_id.clone(),
            location: item.location.clone(),
            severity: item.severity,
            description: item.description.clone(),
            reason: item.reason().unwrap_or_default().to_string(),
        }
    }
}

/// The batch decision point presented to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub run_id: Uuid,
    pub candidates: Vec<ApprovalCandidate>,
}

/// Operator answer for a whole batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    ApproveAll,
    /// Approve the listed items; every other candidate is declined.
    ApproveSelected { ids: Vec<WorkItemId> },
    /// Decline the whole batch.
    Defer { reason: Option<String> },
}

/// Synchronous request/response channel to a human approver.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn request(&self, request: &ApprovalRequest) -> Result<ApprovalDecision>;
}

/// Non-interactive channel that defers everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferAll;

#[async_trait]
impl ApprovalChannel for DeferAll {
    async fn request(&self, _request: &ApprovalRequest) -> Result<ApprovalDecision> {
        Ok(ApprovalDecision::Defer {
            reason: Some("no approver available in non-interactive mode".to_string()),
        })
    }
}

/// Non-interactive channel that approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

#[async_trait]
impl ApprovalChannel for ApproveAll {
    async fn request(&self, _request: &ApprovalRequest) -> Result<ApprovalDecision> {
        Ok(ApprovalDecision::ApproveAll)
    }
}

const DEFAULT_DEFER_REASON: &str = "approval deferred by operator";
const NOT_SELECTED_REASON: &str = "not selected for approval";

/// Routes `NeedsApproval` items through an [`ApprovalChannel`].
pub struct ApprovalGate {
    channel: Arc<dyn ApprovalChannel>,
}

impl ApprovalGate {
    pub fn new(channel: Arc<dyn ApprovalChannel>) -> Self {
        Self { channel }
    }

    /// Resolve every `NeedsApproval` item currently in the ledger.
    ///
    /// Declined items are recorded back into the ledger as `Failed`. Approved
    /// items are returned in `Pending` state and must be driven and recorded
    /// by the caller.
    pub async fn review(&self, run_id: Uuid, ledger: &mut Ledger) -> Result<Vec<WorkItem>> {
        let ids = ledger.needs_approval();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let request = ApprovalRequest {
            run_id,
            candidates: ids
                .iter()
                .filter_map(|id| ledger.get(id))
                .map(ApprovalCandidate::from)
                .collect(),
        };
        obs::emit_approval_requested(request.candidates.len());

        let decision = match self.channel.request(&request).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "approval channel failed; deferring batch");
                ApprovalDecision::Defer {
                    reason: Some(format!("approval channel unavailable: {e}")),
                }
            }
        };

        let (selected, decline_reason): (HashSet<WorkItemId>, String) = match decision {
            ApprovalDecision::ApproveAll => (ids.iter().cloned().collect(), String::new()),
            ApprovalDecision::ApproveSelected { ids: chosen } => {
                let chosen: HashSet<_> = chosen.into_iter().collect();
                for unknown in chosen.iter().filter(|id| !ids.contains(id)) {
                    warn!(item = %unknown, "approval names an item that is not awaiting approval");
                }
                (chosen, NOT_SELECTED_REASON.to_string())
            }
            ApprovalDecision::Defer { reason } => (
                HashSet::new(),
                reason.unwrap_or_else(|| DEFAULT_DEFER_REASON.to_string()),
            ),
        };

        let mut approved = Vec::new();
        for id in &ids {
            let mut item = ledger.reopen(id)?;
            if selected.contains(id) {
                item.approve()?;
                approved.push(item);
            } else {
                item.decline(&decline_reason)?;
                ledger.record(&item)?;
            }
        }
        obs::emit_approval_resolved(approved.len(), ids.len() - approved.len());
        Ok(approved)
    }
}
