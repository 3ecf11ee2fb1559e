//! Accounting ledger: the single source of truth for run totals.
//!
//! Every admitted item must end up in exactly one terminal bucket:
//! `applied + failed + needs_approval == total`. The ledger is owned by the
//! orchestrator and mutated through `&mut self`, so there is one writer at
//! a time by construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{RemedyError, Result, WorkItem, WorkItemId, WorkItemStatus};
use crate::obs;

/// Totals by terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accounting {
    pub applied: usize,
    pub failed: usize,
    pub needs_approval: usize,
    pub total: usize,
}

impl Accounting {
    pub fn is_closed(&self) -> bool {
        self.applied + self.failed + self.needs_approval == self.total
    }
}

/// Append-only record of admissions and terminal outcomes.
#[derive(Debug, Default)]
pub struct Ledger {
    /// Admission order, used for stable reporting.
    admitted: Vec<WorkItemId>,
    archived: BTreeMap<WorkItemId, Arc<WorkItem>>,
    accounting: Accounting,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a newly created item towards `total`.
    pub fn admit(&mut self, id: &WorkItemId) -> Result<()> {
        if self.admitted.contains(id) {
            return Err(RemedyError::DuplicateAdmission(id.clone()));
        }
        self.admitted.push(id.clone());
        self.accounting.total += 1;
        Ok(())
    }

    /// Archive an item that reached a terminal state. Called once per arrival.
    pub fn record(&mut self, item: &WorkItem) -> Result<()> {
        if !self.admitted.contains(&item.id) {
            return Err(RemedyError::NotAdmitted(item.id.clone()));
        }
        if !item.is_terminal() {
            return Err(RemedyError::NotTerminal {
                id: item.id.clone(),
                status: item.status(),
            });
        }
        if self.archived.contains_key(&item.id) {
            return Err(RemedyError::DuplicateRecord(item.id.clone()));
        }
        self.bucket(item.status(), 1);
        self.archived.insert(item.id.clone(), Arc::new(item.clone()));
        Ok(())
    }

    /// Hand a `NeedsApproval` item back to the approval gate.
    ///
    /// The item leaves its bucket and must be recorded again once the gate's
    /// decision has driven it to a new terminal state.
    pub fn reopen(&mut self, id: &WorkItemId) -> Result<WorkItem> {
        let status = match self.archived.get(id) {
            Some(item) => item.status(),
            None => return Err(RemedyError::NotAdmitted(id.clone())),
        };
        if status != WorkItemStatus::NeedsApproval {
            return Err(RemedyError::IllegalTransition {
                id: id.clone(),
                from: status,
                to: WorkItemStatus::Pending,
            });
        }
        let archived = self
            .archived
            .remove(id)
            .ok_or_else(|| RemedyError::NotAdmitted(id.clone()))?;
        self.bucket(status, -1);
        Ok(Arc::try_unwrap(archived).unwrap_or_else(|shared| (*shared).clone()))
    }

    fn bucket(&mut self, status: WorkItemStatus, delta: isize) {
        let slot = match status {
            WorkItemStatus::Applied => &mut self.accounting.applied,
            WorkItemStatus::Failed => &mut self.accounting.failed,
            WorkItemStatus::NeedsApproval => &mut self.accounting.needs_approval,
            _ => return,
        };
        *slot = slot.saturating_add_signed(delta);
    }

    pub fn accounting(&self) -> Accounting {
        self.accounting
    }

    /// Whether the closure invariant holds right now.
    pub fn verify_closure(&self) -> bool {
        self.accounting.is_closed() && self.archived.len() == self.admitted.len()
    }

    /// [`verify_closure`](Self::verify_closure) as an internal error.
    pub fn ensure_closed(&self) -> Result<()> {
        if self.verify_closure() {
            Ok(())
        } else {
            let a = self.accounting;
            obs::emit_closure_violation(a.applied, a.failed, a.needs_approval, a.total);
            Err(RemedyError::ClosureViolated {
                applied: a.applied,
                failed: a.failed,
                needs_approval: a.needs_approval,
                total: a.total,
            })
        }
    }

    pub fn get(&self, id: &WorkItemId) -> Option<&WorkItem> {
        self.archived.get(id).map(Arc::as_ref)
    }

    /// Archived items in admission order.
    pub fn items(&self) -> impl Iterator<Item = &WorkItem> {
        self.admitted
            .iter()
            .filter_map(|id| self.archived.get(id).map(Arc::as_ref))
    }

    /// Archived items waiting for an approval decision.
    pub fn needs_approval(&self) -> Vec<WorkItemId> {
        self.items()
            .filter(|item| item.status() == WorkItemStatus::NeedsApproval)
            .map(|item| item.id.clone())
            .collect()
    }

    /// Admitted ids that have no terminal record.
    pub fn open_items(&self) -> Vec<WorkItemId> {
        self.admitted
            .iter()
            .filter(|id| !self.archived.contains_key(*id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Finding, Location, Severity, StrategyKind};

    fn item(seq: usize) -> WorkItem {
        let finding = Finding::new(format!("X-{seq}"), Location::file("a.rs"), Severity::Low, "x");
        WorkItem::from_finding(WorkItemId::new("F", seq), &finding)
    }

    fn applied(seq: usize) -> WorkItem {
        let mut it = item(seq);
        it.begin_attempt().unwrap();
        it.record_strategy(StrategyKind::Primary).unwrap();
        it.mark_applied("ok").unwrap();
        it
    }

    fn needs_approval(seq: usize) -> WorkItem {
        let mut it = item(seq);
        it.begin_attempt().unwrap();
        it.mark_needs_approval("multi-file").unwrap();
        it
    }

    #[test]
    fn test_closure_holds_after_all_recorded() {
        let mut ledger = Ledger::new();
        let a = applied(1);
        let mut b = item(2);
        b.mark_failed("cascade limit exceeded").unwrap();
        let c = needs_approval(3);

        for it in [&a, &b, &c] {
            ledger.admit(&it.id).unwrap();
        }
        assert!(!ledger.verify_closure());
        assert_eq!(ledger.open_items().len(), 3);

        for it in [&a, &b, &c] {
            ledger.record(it).unwrap();
        }
        assert!(ledger.verify_closure());
        ledger.ensure_closed().unwrap();
        assert_eq!(
            ledger.accounting(),
            Accounting {
                applied: 1,
                failed: 1,
                needs_approval: 1,
                total: 3
            }
        );
    }

    #[test]
    fn test_record_rejects_misuse() {
        let mut ledger = Ledger::new();
        let a = applied(1);
        assert!(matches!(ledger.record(&a), Err(RemedyError::NotAdmitted(_))));

        ledger.admit(&a.id).unwrap();
        assert!(matches!(ledger.admit(&a.id), Err(RemedyError::DuplicateAdmission(_))));

        let pending = item(2);
        ledger.admit(&pending.id).unwrap();
        assert!(matches!(ledger.record(&pending), Err(RemedyError::NotTerminal { .. })));

        ledger.record(&a).unwrap();
        assert!(matches!(ledger.record(&a), Err(RemedyError::DuplicateRecord(_))));
    }

    #[test]
    fn test_open_item_violates_closure() {
        let mut ledger = Ledger::new();
        ledger.admit(&item(1).id).unwrap();
        let err = ledger.ensure_closed().unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_reopen_only_for_needs_approval() {
        let mut ledger = Ledger::new();
        let a = applied(1);
        let c = needs_approval(2);
        for it in [&a, &c] {
            ledger.admit(&it.id).unwrap();
            ledger.record(it).unwrap();
        }
        assert_eq!(ledger.needs_approval(), vec![c.id.clone()]);
        assert!(ledger.reopen(&a.id).is_err());

        let mut reopened = ledger.reopen(&c.id).unwrap();
        assert_eq!(ledger.accounting().needs_approval, 0);
        assert!(!ledger.verify_closure());

        reopened.decline("operator declined").unwrap();
        ledger.record(&reopened).unwrap();
        assert!(ledger.verify_closure());
        assert_eq!(ledger.accounting().failed, 1);
        assert_eq!(
            ledger.get(&c.id).unwrap().reason(),
            Some("Deferred: operator declined")
        );
    }

    #[test]
    fn test_items_in_admission_order() {
        let mut ledger = Ledger::new();
        let (b, a) = (applied(2), applied(1));
        for it in [&b, &a] {
            ledger.admit(&it.id).unwrap();
        }
        ledger.record(&a).unwrap();
        ledger.record(&b).unwrap();
        let ids: Vec<_> = ledger.items().map(|i| i.id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["F-002", "F-001"]);
    }
}
