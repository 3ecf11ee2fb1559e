//! Interactive stdin channels for the dirty-workspace and approval decisions.
//!
//! Prompts go to stderr so stdout stays reserved for reports.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use remedy_core::{
    ApprovalCandidate, ApprovalChannel, ApprovalDecision, ApprovalRequest, DirtyResolution,
    OperatorChannel, PreflightReport, RemedyError,
};

/// Read one line from stdin without blocking the runtime. `None` on EOF.
async fn read_line(prompt: String) -> Option<String> {
    tokio::task::spawn_blocking(move || {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{prompt}");
        let _ = stderr.flush();
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    })
    .await
    .ok()
    .flatten()
}

pub fn parse_resolution(answer: &str) -> Option<DirtyResolution> {
    match answer.trim().to_lowercase().as_str() {
        "c" | "commit" | "committed" => Some(DirtyResolution::Committed),
        "s" | "stash" | "stashed" => Some(DirtyResolution::Stashed),
        "g" | "go" | "continue" => Some(DirtyResolution::Continue),
        "a" | "abort" | "q" => Some(DirtyResolution::Abort),
        _ => None,
    }
}

/// Asks the operator how to handle a dirty workspace.
pub struct PromptOperator;

#[async_trait]
impl OperatorChannel for PromptOperator {
    async fn resolve_dirty(&self, report: &PreflightReport) -> DirtyResolution {
        eprintln!("Workspace is not clean: {}", report.reason);
        for path in &report.dirty_paths {
            eprintln!("  {path}");
        }
        eprintln!("Commit or stash the changes in another shell, then answer.");

        loop {
            let prompt = "[c]ommitted / [s]tashed / [g]o on anyway / [a]bort: ".to_string();
            let Some(answer) = read_line(prompt).await else {
                return DirtyResolution::Abort;
            };
            if let Some(resolution) = parse_resolution(&answer) {
                return resolution;
            }
            eprintln!("Unrecognized answer: {answer}");
        }
    }
}

/// `a` approves all, `n` defers all, `1,3` approves the listed candidates.
pub fn parse_selection(answer: &str, candidates: &[ApprovalCandidate]) -> Option<ApprovalDecision> {
    let answer = answer.trim().to_lowercase();
    match answer.as_str() {
        "a" | "all" => return Some(ApprovalDecision::ApproveAll),
        "n" | "none" | "d" | "defer" => {
            return Some(ApprovalDecision::Defer {
                reason: Some("operator deferred the batch".to_string()),
            })
        }
        _ => {}
    }

    let mut ids = Vec::new();
    for part in answer.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let index: usize = part.parse().ok()?;
        let candidate = candidates.get(index.checked_sub(1)?)?;
        ids.push(candidate.id.clone());
    }
    if ids.is_empty() {
        None
    } else {
        Some(ApprovalDecision::ApproveSelected { ids })
    }
}

/// Presents the `NeedsApproval` batch on stderr and reads the decision.
pub struct PromptApprover;

#[async_trait]
impl ApprovalChannel for PromptApprover {
    async fn request(&self, request: &ApprovalRequest) -> remedy_core::Result<ApprovalDecision> {
        eprintln!();
        eprintln!("{} item(s) need approval:", request.candidates.len());
        for (i, c) in request.candidates.iter().enumerate() {
            eprintln!(
                "  {}. {} [{}] {} ({}): {}",
                i + 1,
                c.id,
                c.severity,
                c.description,
                c.location,
                c.reason
            );
        }

        loop {
            let prompt = "approve [a]ll, [n]one, or numbers (e.g. 1,3): ".to_string();
            let answer = read_line(prompt).await.ok_or_else(|| {
                RemedyError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stdin closed before an approval decision",
                ))
            })?;
            if let Some(decision) = parse_selection(&answer, &request.candidates) {
                return Ok(decision);
            }
            eprintln!("Unrecognized answer: {answer}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_core::{Location, Severity, WorkItemId};

    fn candidates() -> Vec<ApprovalCandidate> {
        (1..=3)
            .map(|n| ApprovalCandidate {
                id: WorkItemId::new("F", n),
                finding_id: format!("ARCH-{n}"),
                location: Location::file("a.rs"),
                severity: Severity::High,
                description: "x".to_string(),
                reason: "Architectural: spans modules".to_string(),
            })
            .collect()
    }

    #[test]
    fn resolution_answers() {
        assert_eq!(parse_resolution("S"), Some(DirtyResolution::Stashed));
        assert_eq!(parse_resolution(" continue "), Some(DirtyResolution::Continue));
        assert_eq!(parse_resolution("a"), Some(DirtyResolution::Abort));
        assert_eq!(parse_resolution("maybe"), None);
    }

    #[test]
    fn selection_answers() {
        let c = candidates();
        assert_eq!(parse_selection("all", &c), Some(ApprovalDecision::ApproveAll));
        assert!(matches!(
            parse_selection("n", &c),
            Some(ApprovalDecision::Defer { .. })
        ));
        assert_eq!(
            parse_selection("1, 3", &c),
            Some(ApprovalDecision::ApproveSelected {
                ids: vec![WorkItemId::new("F", 1), WorkItemId::new("F", 3)]
            })
        );
    }

    #[test]
    fn out_of_range_selection_is_rejected() {
        let c = candidates();
        assert_eq!(parse_selection("0", &c), None);
        assert_eq!(parse_selection("4", &c), None);
        assert_eq!(parse_selection("x", &c), None);
        assert_eq!(parse_selection("", &c), None);
    }
}
