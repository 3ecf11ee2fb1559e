//! Domain-level error taxonomy for remedy.

use std::path::PathBuf;

use super::work_item::{WorkItemId, WorkItemStatus};

/// Errors produced while validating externally supplied findings.
#[derive(Debug, thiserror::Error)]
pub enum FindingError {
    #[error("finding id must not be empty")]
    EmptyId,

    #[error("duplicate finding id: {0}")]
    DuplicateId(String),

    #[error("finding {id} has an empty file path")]
    EmptyPath { id: String },

    #[error("finding {id} has end_line {end_line} before line {line}")]
    InvertedRegion { id: String, line: u32, end_line: u32 },

    #[error("finding {id} points outside the workspace: {}", .path.display())]
    OutsideWorkspace { id: String, path: PathBuf },
}

/// Remedy domain errors.
#[derive(Debug, thiserror::Error)]
pub enum RemedyError {
    #[error("invalid finding: {0}")]
    InvalidFinding(#[from] FindingError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("illegal transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: WorkItemId,
        from: WorkItemStatus,
        to: WorkItemStatus,
    },

    #[error("work item {0} admitted twice")]
    DuplicateAdmission(WorkItemId),

    #[error("work item {0} was never admitted")]
    NotAdmitted(WorkItemId),

    #[error("work item {0} recorded twice")]
    DuplicateRecord(WorkItemId),

    #[error("work item {id} is not terminal ({status})")]
    NotTerminal {
        id: WorkItemId,
        status: WorkItemStatus,
    },

    #[error(
        "accounting closure violated: applied {applied} + failed {failed} + needs_approval {needs_approval} != total {total}"
    )]
    ClosureViolated {
        applied: usize,
        failed: usize,
        needs_approval: usize,
        total: usize,
    },

    #[error("checker {checker} crashed: {message}")]
    CheckerCrashed { checker: String, message: String },

    #[error("fix worker failed: {0}")]
    WorkerFailed(String),

    #[error("preflight rejected workspace: {0}")]
    PreflightRejected(String),

    #[error("git error: {0}")]
    GitError(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemedyError {
    /// Whether this error indicates a bookkeeping or infrastructure bug that
    /// must abort the run instead of being attributed to a single item.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::IllegalTransition { .. }
                | Self::DuplicateAdmission(_)
                | Self::NotAdmitted(_)
                | Self::DuplicateRecord(_)
                | Self::NotTerminal { .. }
                | Self::ClosureViolated { .. }
                | Self::CheckerCrashed { .. }
                | Self::WorkerFailed(_)
        )
    }
}

/// Result type for remedy domain operations.
pub type Result<T> = std::result::Result<T, RemedyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finding_error_display() {
        let err = RemedyError::from(FindingError::DuplicateId("SEC-1".to_string()));
        assert!(err.to_string().contains("invalid finding"));
        assert!(err.to_string().contains("SEC-1"));
    }

    #[test]
    fn test_closure_violation_is_internal() {
        let err = RemedyError::ClosureViolated {
            applied: 1,
            failed: 1,
            needs_approval: 0,
            total: 3,
        };
        assert!(err.is_internal());
        assert!(err.to_string().contains("!= total 3"));
    }

    #[test]
    fn test_config_errors_are_not_internal() {
        assert!(!RemedyError::InvalidConfig("max_workers".into()).is_internal());
        assert!(!RemedyError::PreflightRejected("dirty".into()).is_internal());
    }
}
