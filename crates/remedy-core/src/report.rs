//! Run report model and persisted artifacts.
//!
//! A report is written as `<dir>/<run_id>/report.json` next to a
//! `report.digest` file holding the SHA-256 of the JSON bytes, so a stored
//! report can be checked for tampering or truncation when read back.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::{
    CheckVerdict, Location, RemedyError, Result, Severity, StrategyKind, WorkItem, WorkItemId,
    WorkItemStatus,
};
use crate::ledger::Accounting;
use crate::preflight::PreflightVerdict;

pub const REPORT_FILE: &str = "report.json";
pub const DIGEST_FILE: &str = "report.digest";

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// An abort was observed at a batch boundary.
    Aborted,
    /// An internal invariant broke; the report is a partial state dump.
    InternalError,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::InternalError => "internal_error",
        }
    }
}

/// One terminal work item as seen by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReport {
    pub item_id: WorkItemId,
    pub finding_id: String,
    pub status: WorkItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub location: Location,
    pub severity: Severity,
    pub generation: u32,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strategies: Vec<StrategyKind>,
    /// Checker verdicts taken right after the item's batch.
    #[serde(default)]
    pub verification_checker_outcomes: BTreeMap<String, CheckVerdict>,
}

impl ItemReport {
    pub fn from_item(item: &WorkItem, outcomes: BTreeMap<String, CheckVerdict>) -> Self {
        let mut strategies = item.prior_strategies().to_vec();
        strategies.extend_from_slice(item.strategy_history());
        Self {
            item_id: item.id.clone(),
            finding_id: item.finding_id.clone(),
            status: item.status(),
            reason: item.reason().map(str::to_string),
            location: item.location.clone(),
            severity: item.severity,
            generation: item.generation,
            attempts: item.attempt_count(),
            strategies,
            verification_checker_outcomes: outcomes,
        }
    }
}

/// Structured outcome of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preflight: Option<PreflightVerdict>,
    pub results: Vec<ItemReport>,
    pub accounting: Accounting,
    pub verification_summary: BTreeMap<String, CheckVerdict>,
    pub generations_run: u32,
    /// Applied strategies that actually changed file content.
    pub mutations: usize,
    /// Admitted items with no terminal record; only non-empty after an internal error.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_items: Vec<WorkItemId>,
}

impl RunReport {
    /// Whether the accounting invariant holds and every admitted item is listed.
    pub fn is_consistent(&self) -> bool {
        self.accounting.is_closed()
            && self.results.len() == self.accounting.total
            && self.open_items.is_empty()
    }

    pub fn result(&self, item_id: &str) -> Option<&ItemReport> {
        self.results.iter().find(|r| r.item_id.as_str() == item_id)
    }

    pub fn with_status(&self, status: WorkItemStatus) -> impl Iterator<Item = &ItemReport> {
        self.results.iter().filter(move |r| r.status == status)
    }
}

fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Persist `report` under `<dir>/<run_id>/`, returning the run directory.
pub fn write_report(report: &RunReport, dir: &Path) -> Result<PathBuf> {
    let run_dir = dir.join(report.run_id.to_string());
    std::fs::create_dir_all(&run_dir)?;

    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(run_dir.join(REPORT_FILE), &json)?;
    std::fs::write(run_dir.join(DIGEST_FILE), digest_hex(&json))?;
    Ok(run_dir)
}

/// Load a stored report and verify it against its digest.
pub fn read_report(dir: &Path, run_id: &str) -> Result<RunReport> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join(REPORT_FILE))?;
    let expected = std::fs::read_to_string(run_dir.join(DIGEST_FILE))?
        .trim()
        .to_string();
    let actual = digest_hex(&json);
    if expected != actual {
        return Err(RemedyError::DigestMismatch { expected, actual });
    }
    Ok(serde_json::from_slice(&json)?)
}

/// Render a markdown summary for terminals and PR comments.
pub fn render_summary_md(report: &RunReport) -> String {
    let a = &report.accounting;
    let mut out = String::new();
    out.push_str("# Remediation Summary\n\n");
    let _ = writeln!(out, "- run: `{}`", report.run_id);
    let _ = writeln!(out, "- outcome: {}", report.outcome.as_str());
    let _ = writeln!(
        out,
        "- applied: {} / failed: {} / needs approval: {} / total: {}",
        a.applied, a.failed, a.needs_approval, a.total
    );
    let _ = writeln!(out, "- generations: {}", report.generations_run);
    let _ = writeln!(out, "- files mutated: {}", report.mutations);

    if !report.verification_summary.is_empty() {
        out.push_str("\n## Verification\n");
        for (checker, verdict) in &report.verification_summary {
            let _ = writeln!(out, "- {checker}: {verdict}");
        }
    }

    if !report.results.is_empty() {
        out.push_str("\n## Items\n");
        for r in &report.results {
            let _ = write!(out, "- `{}` {} ({})", r.item_id, r.status, r.location);
            if let Some(reason) = &r.reason {
                let _ = write!(out, ": {reason}");
            }
            out.push('\n');
        }
    }

    if !report.open_items.is_empty() {
        out.push_str("\n## Unaccounted\n");
        for id in &report.open_items {
            let _ = writeln!(out, "- `{id}`");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Finding;

    fn sample() -> RunReport {
        let finding = Finding::new("SEC-1", Location::at("src/a.rs", 3), Severity::High, "x");
        let mut item = WorkItem::from_finding(WorkItemId::new("F", 1), &finding);
        item.begin_attempt().unwrap();
        item.record_strategy(StrategyKind::Primary).unwrap();
        item.mark_applied("Applied with primary strategy").unwrap();

        let mut verdicts = BTreeMap::new();
        verdicts.insert("fmt".to_string(), CheckVerdict::Pass);

        let at = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        RunReport {
            run_id: Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap(),
            started_at: at,
            finished_at: at,
            outcome: RunOutcome::Completed,
            preflight: Some(PreflightVerdict::Clean),
            results: vec![ItemReport::from_item(&item, verdicts.clone())],
            accounting: Accounting {
                applied: 1,
                failed: 0,
                needs_approval: 0,
                total: 1,
            },
            verification_summary: verdicts,
            generations_run: 1,
            mutations: 1,
            open_items: Vec::new(),
        }
    }

    #[test]
    fn report_schema_has_expected_keys() {
        let raw = serde_json::to_value(sample()).unwrap();
        let obj = raw.as_object().unwrap();
        for key in ["results", "accounting", "verification_summary", "outcome"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert!(!obj.contains_key("open_items"));
        assert_eq!(raw["outcome"], "completed");
        assert_eq!(raw["verification_summary"]["fmt"], "PASS");
        assert_eq!(raw["results"][0]["status"], "applied");
        assert_eq!(raw["results"][0]["verification_checker_outcomes"]["fmt"], "PASS");
    }

    #[test]
    fn write_then_read_verifies_digest() {
        let dir = tempfile::tempdir().unwrap();
        let report = sample();
        let run_dir = write_report(&report, dir.path()).unwrap();
        assert!(run_dir.join(DIGEST_FILE).exists());

        let loaded = read_report(dir.path(), &report.run_id.to_string()).unwrap();
        assert_eq!(loaded, report);
        assert!(loaded.is_consistent());
    }

    #[test]
    fn tampered_report_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let report = sample();
        let run_dir = write_report(&report, dir.path()).unwrap();

        let path = run_dir.join(REPORT_FILE);
        let tampered = std::fs::read_to_string(&path)
            .unwrap()
            .replace("\"applied\": 1", "\"applied\": 2");
        std::fs::write(&path, tampered).unwrap();

        let err = read_report(dir.path(), &report.run_id.to_string()).unwrap_err();
        assert!(matches!(err, RemedyError::DigestMismatch { .. }));
    }

    #[test]
    fn summary_lists_items_and_totals() {
        let md = render_summary_md(&sample());
        assert!(md.starts_with("# Remediation Summary\n"));
        assert!(md.contains("- applied: 1 / failed: 0 / needs approval: 0 / total: 1\n"));
        assert!(md.contains("- fmt: PASS\n"));
        assert!(md.contains("- `F-001` applied (src/a.rs:3): Applied with primary strategy\n"));
    }
}
