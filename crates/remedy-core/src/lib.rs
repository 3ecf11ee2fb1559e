//! Remedy core library.
//!
//! Batch remediation: admit findings as work items, apply bounded,
//! strategy-escalating fixes, re-verify with external checkers, chase the
//! failures those fixes introduce, and account for every item.

pub mod approval;
pub mod cascade;
pub mod config;
pub mod domain;
pub mod fix;
pub mod ledger;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod preflight;
pub mod report;
pub mod retry;
pub mod telemetry;
pub mod verify;

pub use approval::{
    ApprovalCandidate, ApprovalChannel, ApprovalDecision, ApprovalGate, ApprovalRequest,
    ApproveAll, DeferAll,
};
pub use cascade::{CascadeDetector, FailureSignature, NewFailure, SignatureExtractor};
pub use config::{ApprovalConfig, RemedyConfig, RunConfig};
pub use domain::{
    confine_findings, validate_findings, workspace_relative, CheckVerdict, Finding,
    FindingError, ItemOrigin, Location, RemedyError, Result, Severity, StrategyKind,
    VerificationResult, VerificationSnapshot, WorkItem, WorkItemId, WorkItemStatus,
    MAX_ATTEMPTS, MAX_CASCADE_GENERATIONS,
};
pub use fix::{
    ApplyOutcome, CommandFix, EditResult, FixApplier, FixCommandConfig, FixContext, FixPlugin,
    FixRegistry,
};
pub use ledger::{Accounting, Ledger};
pub use metrics::{Metrics, MetricsSnapshot, METRICS};
pub use orchestrator::{
    abort_pair, AbortHandle, AbortSignal, Orchestrator, OrchestratorBuilder, RunError,
    ABORTED_REASON, CASCADE_LIMIT_REASON,
};
pub use preflight::{
    capture_head_sha, is_git_repo, DirtyResolution, FixedResolution, GitProbe, OperatorChannel,
    PreflightGuard, PreflightReport, PreflightVerdict, WorkspaceProbe,
};
pub use report::{read_report, render_summary_md, write_report, ItemReport, RunOutcome, RunReport};
pub use retry::{ItemRun, RetryController, RetryDecision, RetryPolicy};
pub use verify::{
    BuiltinChecker, CheckOutput, Checker, CheckerConfig, CommandChecker, VerificationRunner,
};

/// Crate version, stamped into CLI output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
